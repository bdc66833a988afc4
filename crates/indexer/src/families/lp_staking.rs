//! LP-staking indexer: staker balances, raw swaps and reward harvests.
//!
//! Runs once per pool on DFK Chain ("unified") and per pool on Harmony,
//! where the older Serendale deployment has no swap or harvest tables.

use {
    super::{EventCounters, LogIndexer, big_decimal, db_address, log_meta},
    crate::db::Postgres,
    alloy::{
        primitives::{Address, U256},
        rpc::types::{Filter, FilterSet, Log},
        sol_types::SolEvent,
    },
    anyhow::{Context, Result, bail},
    contracts::{
        MasterGardener, Profiles, UniswapV2Pair,
        deployments::StakingDeployment,
    },
    database::stakers::{ActivityKind, Staker},
    ethrpc::{RetryConfig, RpcPool, with_retry},
    std::{collections::HashMap, sync::Arc},
    tokio::sync::OnceCell,
};

pub const BATCH_SIZE: u64 = 200_000;
pub const WORKERS: usize = 5;
pub const MIN_WORKERS: usize = 3;

/// What one indexer instance extracts from the shared topic set.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StakingMode {
    /// Stakers, swaps and harvests: the canonical per-pool indexer.
    Full,
    /// The legacy Harmony deployment predates the swap and harvest tables.
    StakersOnly,
    /// Raw LP-pair swaps, nothing else.
    SwapsOnly,
    /// Reward-harvest events, nothing else.
    RewardsOnly,
}

impl StakingMode {
    fn stakers(&self) -> bool {
        matches!(self, Self::Full | Self::StakersOnly)
    }

    fn swaps(&self) -> bool {
        matches!(self, Self::Full | Self::SwapsOnly)
    }

    fn harvests(&self) -> bool {
        matches!(self, Self::Full | Self::RewardsOnly)
    }
}

pub struct LpStakingIndexer {
    db: Postgres,
    rpc: Arc<RpcPool>,
    family: &'static str,
    pid: u64,
    deployment: &'static StakingDeployment,
    genesis: u64,
    mode: StakingMode,
    lp_token: OnceCell<Address>,
}

impl LpStakingIndexer {
    fn new(
        db: Postgres,
        rpc: Arc<RpcPool>,
        family: &'static str,
        pid: u64,
        deployment: &'static StakingDeployment,
        genesis: u64,
        mode: StakingMode,
    ) -> Self {
        Self {
            db,
            rpc,
            family,
            pid,
            deployment,
            genesis,
            mode,
            lp_token: OnceCell::new(),
        }
    }

    pub fn dfk(db: Postgres, rpc: Arc<RpcPool>, pid: u64) -> Self {
        Self::new(
            db,
            rpc,
            "unified",
            pid,
            &contracts::deployments::DFK_STAKING,
            0,
            StakingMode::Full,
        )
    }

    pub fn harmony(db: Postgres, rpc: Arc<RpcPool>, pid: u64) -> Self {
        Self::new(
            db,
            rpc,
            "harmony_lp",
            pid,
            &contracts::deployments::HARMONY_STAKING,
            contracts::deployments::HARMONY_GENESIS_BLOCK,
            StakingMode::StakersOnly,
        )
    }

    pub fn swaps_only(db: Postgres, rpc: Arc<RpcPool>, pid: u64) -> Self {
        Self::new(
            db,
            rpc,
            "swap",
            pid,
            &contracts::deployments::DFK_STAKING,
            0,
            StakingMode::SwapsOnly,
        )
    }

    pub fn rewards_only(db: Postgres, rpc: Arc<RpcPool>, pid: u64) -> Self {
        Self::new(
            db,
            rpc,
            "reward",
            pid,
            &contracts::deployments::DFK_STAKING,
            0,
            StakingMode::RewardsOnly,
        )
    }

    /// The pool's LP pair, resolved once via `poolInfo`. A zero address is a
    /// precondition failure that aborts the batch.
    async fn lp_token(&self) -> Result<Address> {
        self.lp_token
            .get_or_try_init(|| async {
                let provider = self.rpc.provider(self.deployment.chain_id)?;
                let gardener = MasterGardener::new(self.deployment.master_gardener, provider);
                let info = with_retry("pool_info", RetryConfig::default(), || async {
                    gardener.poolInfo(U256::from(self.pid)).call().await
                })
                .await
                .context("read poolInfo")?;
                if info.lpToken == Address::ZERO {
                    bail!("pool {} has no LP token", self.pid);
                }
                Ok(info.lpToken)
            })
            .await
            .copied()
    }

    /// Live staked balance; the staker table mirrors `userInfo.amount`
    /// instead of reconstructing balances from events.
    async fn live_balance(&self, wallet: Address) -> Result<U256> {
        let provider = self.rpc.provider(self.deployment.chain_id)?;
        let gardener = MasterGardener::new(self.deployment.master_gardener, provider);
        let info = with_retry("user_info", RetryConfig::default(), || async {
            gardener.userInfo(U256::from(self.pid), wallet).call().await
        })
        .await
        .context("read userInfo")?;
        Ok(info.amount)
    }

    /// Best effort: a missing or failing profile lookup leaves the name
    /// NULL, it never fails the batch.
    async fn summoner_name(&self, wallet: Address) -> Option<String> {
        let provider = self.rpc.provider(self.deployment.chain_id).ok()?;
        let profiles = Profiles::new(self.deployment.profiles, provider);
        match profiles.addressToProfile(wallet).call().await {
            Ok(profile) if !profile.name.is_empty() => Some(profile.name),
            Ok(_) => None,
            Err(err) => {
                tracing::debug!(%wallet, ?err, "profile lookup failed");
                None
            }
        }
    }
}

/// The latest staking action of one wallet within a batch.
struct LastActivity {
    kind: ActivityKind,
    amount: U256,
    block_number: u64,
    log_index: i64,
    tx_hash: database::TransactionHash,
}

#[async_trait::async_trait]
impl LogIndexer for LpStakingIndexer {
    fn indexer_type(&self) -> &'static str {
        self.family
    }

    fn scope(&self) -> String {
        format!("pool_{}", self.pid)
    }

    fn chain_id(&self) -> u64 {
        self.deployment.chain_id
    }

    fn batch_size(&self) -> u64 {
        BATCH_SIZE
    }

    fn genesis_block(&self) -> u64 {
        self.genesis
    }

    async fn filter(&self) -> Result<Filter> {
        let mut addresses = Vec::new();
        let mut topics = Vec::new();
        if self.mode.stakers() {
            topics.extend([
                MasterGardener::Deposit::SIGNATURE_HASH,
                MasterGardener::Withdraw::SIGNATURE_HASH,
                MasterGardener::EmergencyWithdraw::SIGNATURE_HASH,
            ]);
        }
        if self.mode.harvests() {
            topics.push(MasterGardener::Harvest::SIGNATURE_HASH);
        }
        if self.mode.stakers() || self.mode.harvests() {
            addresses.push(self.deployment.master_gardener);
        }
        if self.mode.swaps() {
            addresses.push(self.lp_token().await?);
            topics.push(UniswapV2Pair::Swap::SIGNATURE_HASH);
        }
        Ok(Filter::new()
            .address(addresses)
            .event_signature(FilterSet::from_iter(topics)))
    }

    async fn process_logs(&self, logs: Vec<Log>) -> Result<EventCounters> {
        let mut counters = EventCounters::default();
        let mut last_activity: HashMap<Address, LastActivity> = HashMap::new();
        let mut swaps = Vec::new();
        let mut harvests = Vec::new();
        let pid = i64::try_from(self.pid).context("pool id exceeds i64")?;

        for log in &logs {
            let Some((tx_hash, log_index, block_number)) = log_meta(log) else {
                tracing::warn!(?log, "skipping log without metadata");
                continue;
            };
            let block = i64::try_from(block_number).context("block number exceeds i64")?;
            let Some(topic0) = log.topic0() else {
                continue;
            };

            let topic = *topic0;

            if topic == MasterGardener::Harvest::SIGNATURE_HASH && self.mode.harvests() {
                match MasterGardener::Harvest::decode_log(&log.inner) {
                    Ok(event) if event.pid == U256::from(self.pid) => {
                        harvests.push(database::reward_events::RewardEvent {
                            tx_hash,
                            log_index,
                            pid,
                            wallet: db_address(event.user),
                            amount: big_decimal(event.amount),
                            block_number: block,
                        });
                        counters.increment("harvest");
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(?err, "undecodable Harvest log, skipping"),
                }
                continue;
            }
            if topic == UniswapV2Pair::Swap::SIGNATURE_HASH && self.mode.swaps() {
                match UniswapV2Pair::Swap::decode_log(&log.inner) {
                    Ok(event) => {
                        swaps.push(database::swap_events::SwapEvent {
                            tx_hash,
                            log_index,
                            pid,
                            pair: db_address(log.inner.address),
                            sender: db_address(event.sender),
                            amount0_in: big_decimal(event.amount0In),
                            amount1_in: big_decimal(event.amount1In),
                            amount0_out: big_decimal(event.amount0Out),
                            amount1_out: big_decimal(event.amount1Out),
                            recipient: db_address(event.to),
                            block_number: block,
                        });
                        counters.increment("swap");
                    }
                    Err(err) => tracing::warn!(?err, "undecodable Swap log, skipping"),
                }
                continue;
            }

            if !self.mode.stakers() {
                continue;
            }
            let staking_event = if topic == MasterGardener::Deposit::SIGNATURE_HASH {
                MasterGardener::Deposit::decode_log(&log.inner)
                    .map(|event| (event.user, event.pid, event.amount, ActivityKind::Deposit, "deposit"))
            } else if topic == MasterGardener::Withdraw::SIGNATURE_HASH {
                MasterGardener::Withdraw::decode_log(&log.inner)
                    .map(|event| (event.user, event.pid, event.amount, ActivityKind::Withdraw, "withdraw"))
            } else if topic == MasterGardener::EmergencyWithdraw::SIGNATURE_HASH {
                MasterGardener::EmergencyWithdraw::decode_log(&log.inner).map(|event| {
                    (
                        event.user,
                        event.pid,
                        event.amount,
                        ActivityKind::EmergencyWithdraw,
                        "emergency_withdraw",
                    )
                })
            } else {
                continue;
            };

            let (user, event_pid, amount, kind, counter_kind) = match staking_event {
                Ok(event) => event,
                Err(err) => {
                    tracing::warn!(?err, "undecodable staking log, skipping");
                    continue;
                }
            };
            // one getLogs serves all pools; only this worker's pool matters
            if event_pid != U256::from(self.pid) {
                continue;
            }
            counters.increment(counter_kind);
            let activity = LastActivity {
                kind,
                amount,
                block_number,
                log_index,
                tx_hash,
            };
            match last_activity.get(&user) {
                Some(existing)
                    if (existing.block_number, existing.log_index)
                        > (activity.block_number, activity.log_index) => {}
                _ => {
                    last_activity.insert(user, activity);
                }
            }
        }

        // re-read the live balance for every touched wallet, then write
        // everything in one transaction
        let mut stakers = Vec::with_capacity(last_activity.len());
        for (wallet, activity) in last_activity {
            let staked_lp = self.live_balance(wallet).await?;
            let summoner_name = self.summoner_name(wallet).await;
            stakers.push(Staker {
                pid,
                wallet: db_address(wallet),
                staked_lp: big_decimal(staked_lp),
                summoner_name,
                last_activity_kind: activity.kind,
                last_activity_amount: big_decimal(activity.amount),
                last_activity_block: i64::try_from(activity.block_number)
                    .context("block number exceeds i64")?,
                last_activity_tx: activity.tx_hash,
                last_updated_at: chrono::Utc::now(),
            });
        }

        let mut transaction = self.db.pool.begin().await?;
        database::swap_events::append(&mut transaction, &swaps).await?;
        database::reward_events::append(&mut transaction, &harvests).await?;
        for staker in &stakers {
            database::stakers::upsert(&mut transaction, staker).await?;
        }
        transaction.commit().await?;
        Ok(counters)
    }
}
