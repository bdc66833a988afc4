//! Gardening-quest reward indexer.
//!
//! Rewards are minted by the reward contract without saying which quest type
//! they belong to, so the quest type is resolved from the same transaction:
//! a `QuestCompleted` there means a manually run quest, an
//! `ExpeditionIterationProcessed` means an expedition, and failing both the
//! quest contract is asked directly.

use {
    super::{EventCounters, LogIndexer, big_decimal, db_address, log_meta},
    crate::db::Postgres,
    alloy::{
        primitives::{B256, U256},
        rpc::types::{Filter, FilterSet, Log},
        sol_types::SolEvent,
    },
    anyhow::{Context, Result},
    contracts::{QuestCore, QuestRewardMinter, deployments::GardeningDeployment},
    database::gardening_rewards::{GardeningReward, RewardSource},
    ethrpc::{RetryConfig, RpcPool, with_retry},
    std::{collections::BTreeMap, sync::Arc},
};

pub const BATCH_SIZE: u64 = 200_000;
pub const WORKERS: usize = 5;
pub const MIN_WORKERS: usize = 3;

/// Quest types `0..=14` are gardening quests. The range is asserted upstream
/// but not documented; it was verified against indexed on-chain data.
const GARDENING_QUEST_TYPE_MAX: u8 = 14;

pub struct GardeningIndexer {
    db: Postgres,
    rpc: Arc<RpcPool>,
    deployment: &'static GardeningDeployment,
}

impl GardeningIndexer {
    pub fn dfk(db: Postgres, rpc: Arc<RpcPool>) -> Self {
        Self {
            db,
            rpc,
            deployment: &contracts::deployments::DFK_GARDENING,
        }
    }

    /// View-call fallback when the same transaction carries no quest-type
    /// hint.
    async fn quest_type_of(&self, quest_id: U256) -> Result<u8> {
        let provider = self.rpc.provider(self.deployment.chain_id)?;
        let quests = QuestCore::new(self.deployment.quest_core, provider);
        with_retry("get_quest_type", RetryConfig::default(), || async {
            quests.getQuestType(quest_id).call().await
        })
        .await
        .context("read quest type")
    }
}

#[async_trait::async_trait]
impl LogIndexer for GardeningIndexer {
    fn indexer_type(&self) -> &'static str {
        "gardening"
    }

    fn scope(&self) -> String {
        "dfk".to_string()
    }

    fn chain_id(&self) -> u64 {
        self.deployment.chain_id
    }

    fn batch_size(&self) -> u64 {
        BATCH_SIZE
    }

    async fn filter(&self) -> Result<Filter> {
        Ok(Filter::new()
            .address(vec![
                self.deployment.reward_minter,
                self.deployment.quest_core,
            ])
            .event_signature(FilterSet::from_iter([
                QuestRewardMinter::RewardMinted::SIGNATURE_HASH,
                QuestCore::QuestCompleted::SIGNATURE_HASH,
                QuestCore::ExpeditionIterationProcessed::SIGNATURE_HASH,
            ])))
    }

    async fn process_logs(&self, logs: Vec<Log>) -> Result<EventCounters> {
        let mut counters = EventCounters::default();

        let mut by_transaction: BTreeMap<B256, Vec<Log>> = BTreeMap::new();
        for log in logs {
            let Some(tx_hash) = log.transaction_hash else {
                tracing::warn!(?log, "skipping log without transaction hash");
                continue;
            };
            by_transaction.entry(tx_hash).or_default().push(log);
        }

        let mut rewards = Vec::new();
        for (tx_hash, group) in by_transaction {
            // quest-type hint from sibling logs of the same transaction
            let mut hint: Option<(u8, RewardSource)> = None;
            for log in &group {
                let Some(topic) = log.topic0() else { continue };
                if *topic == QuestCore::QuestCompleted::SIGNATURE_HASH {
                    match QuestCore::QuestCompleted::decode_log(&log.inner) {
                        Ok(event) => {
                            hint = Some((event.questType, RewardSource::ManualQuest));
                            break;
                        }
                        Err(err) => tracing::warn!(%tx_hash, ?err, "undecodable QuestCompleted"),
                    }
                } else if *topic == QuestCore::ExpeditionIterationProcessed::SIGNATURE_HASH
                    && hint.is_none()
                {
                    match QuestCore::ExpeditionIterationProcessed::decode_log(&log.inner) {
                        Ok(event) => hint = Some((event.questType, RewardSource::Expedition)),
                        Err(err) => {
                            tracing::warn!(%tx_hash, ?err, "undecodable expedition iteration")
                        }
                    }
                }
            }

            for log in &group {
                let Some(topic) = log.topic0() else { continue };
                if *topic != QuestRewardMinter::RewardMinted::SIGNATURE_HASH
                    || log.inner.address != self.deployment.reward_minter
                {
                    continue;
                }
                let event = match QuestRewardMinter::RewardMinted::decode_log(&log.inner) {
                    Ok(event) => event,
                    Err(err) => {
                        tracing::warn!(%tx_hash, ?err, "undecodable RewardMinted, skipping");
                        continue;
                    }
                };
                let Some((db_tx_hash, log_index, block_number)) = log_meta(log) else {
                    continue;
                };
                let (quest_type, source) = match hint {
                    Some(hint) => hint,
                    None => (
                        self.quest_type_of(event.questId).await?,
                        RewardSource::ManualQuest,
                    ),
                };
                if quest_type > GARDENING_QUEST_TYPE_MAX {
                    counters.increment("non_gardening_skipped");
                    continue;
                }
                rewards.push(GardeningReward {
                    tx_hash: db_tx_hash,
                    log_index,
                    player: db_address(event.player),
                    quest_id: i64::try_from(event.questId).ok(),
                    quest_type: i32::from(quest_type),
                    item_address: db_address(event.reward),
                    amount: big_decimal(event.amount),
                    source,
                    block_number: i64::try_from(block_number)
                        .context("block number exceeds i64")?,
                });
                counters.increment(match source {
                    RewardSource::ManualQuest => "manual_quest_reward",
                    RewardSource::Expedition => "expedition_reward",
                });
            }
        }

        let mut transaction = self.db.pool.begin().await?;
        database::gardening_rewards::append(&mut transaction, &rewards).await?;
        transaction.commit().await?;
        Ok(counters)
    }
}
