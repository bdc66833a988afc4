//! PvE indexer: hunt completions on DFK Chain, patrol completions on Metis.
//!
//! Hunts are enriched for the drop-rate inference: party luck is read per
//! hero at the completion's block (archive RPC) and the scavenger pet bonus
//! is resolved from the party's pets. Patrols carry no enrichment.

use {
    super::{EventCounters, LogIndexer, big_decimal, db_address, log_meta},
    crate::db::Postgres,
    alloy::{
        primitives::{Address, B256, U256},
        rpc::types::{BlockId, Filter, FilterSet, Log},
        sol_types::SolEvent,
    },
    anyhow::{Context, Result},
    contracts::{HeroCore, HuntCore, PatrolCore, PetCore, deployments::PveDeployment},
    ethrpc::{RetryConfig, RpcPool, with_retry},
    sqlx::types::Json,
    std::{collections::BTreeMap, sync::Arc},
};

pub const BATCH_SIZE: u64 = 100_000;
pub const WORKERS: usize = 4;
pub const MIN_WORKERS: usize = 1;

/// Pet combat-bonus ids that count as "Scavenger", one per tier
/// (common/rare/mythic). The bonus value itself is `combatBonusScalar`.
const SCAVENGER_BONUS_IDS: [u16; 3] = [13, 63, 113];

/// Metadata for loot addresses we know; backfilled into `pve_loot_items`.
const KNOWN_LOOT: &[(Address, &str, &str, &str)] = &[
    (
        alloy::primitives::address!("0x576C260513204392F0eC0bc865450872025CB1cA"),
        "Gold",
        "currency",
        "common",
    ),
    (
        alloy::primitives::address!("0x24eA0D436d3c2602fbfEfBe6a16bBc304C963D04"),
        "Gaia's Tears",
        "material",
        "common",
    ),
    (
        alloy::primitives::address!("0x9678518e04Fe02FB30b55e2D0e554f26EB3D9539"),
        "Void Fragment",
        "material",
        "rare",
    ),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PveVariant {
    Hunts,
    Patrols,
}

pub struct PveIndexer {
    db: Postgres,
    rpc: Arc<RpcPool>,
    variant: PveVariant,
    deployment: &'static PveDeployment,
}

impl PveIndexer {
    pub fn dfk_hunts(db: Postgres, rpc: Arc<RpcPool>) -> Self {
        Self {
            db,
            rpc,
            variant: PveVariant::Hunts,
            deployment: &contracts::deployments::DFK_HUNTS,
        }
    }

    pub fn metis_patrols(db: Postgres, rpc: Arc<RpcPool>) -> Self {
        Self {
            db,
            rpc,
            variant: PveVariant::Patrols,
            deployment: &contracts::deployments::METIS_PATROLS,
        }
    }

    fn activity_type(&self) -> &'static str {
        match self.variant {
            PveVariant::Hunts => "hunt",
            PveVariant::Patrols => "patrol",
        }
    }

    /// `Σ stats.luck` over the party, read at the completion's block so the
    /// inference sees the luck that actually applied.
    async fn party_luck(&self, hero_ids: &[U256], block_number: u64) -> Result<i64> {
        let provider = self.rpc.provider(self.deployment.chain_id)?;
        let heroes = HeroCore::new(self.deployment.hero_core, provider);
        let mut total = 0i64;
        for hero_id in hero_ids {
            let hero = with_retry("get_hero_v3", RetryConfig::default(), || async {
                heroes
                    .getHeroV3(*hero_id)
                    .block(BlockId::number(block_number))
                    .call()
                    .await
            })
            .await
            .context("read hero at block")?;
            total += i64::from(hero.stats.luck);
        }
        Ok(total)
    }

    /// Highest scavenger-tier bonus among the party's pets, as a percentage.
    async fn scavenger_bonus(&self, pet_ids: &[U256]) -> Result<Option<f64>> {
        let provider = self.rpc.provider(self.deployment.chain_id)?;
        let pets = PetCore::new(self.deployment.pet_core, provider);
        let mut best: Option<u16> = None;
        for pet_id in pet_ids {
            let pet = with_retry("get_pet_v2", RetryConfig::default(), || async {
                pets.getPetV2(*pet_id).call().await
            })
            .await
            .context("read pet")?;
            if SCAVENGER_BONUS_IDS.contains(&pet.combatBonus) {
                best = Some(best.map_or(pet.combatBonusScalar, |current| {
                    current.max(pet.combatBonusScalar)
                }));
            }
        }
        Ok(best.map(f64::from))
    }
}

struct DecodedCompletion {
    activity_id: U256,
    player: Address,
    victory: bool,
    hero_ids: Vec<U256>,
    pet_ids: Vec<U256>,
}

fn decode_completion(variant: PveVariant, log: &Log) -> Option<Result<DecodedCompletion, alloy::sol_types::Error>> {
    let topic = log.topic0()?;
    match variant {
        PveVariant::Hunts if *topic == HuntCore::HuntCompleted::SIGNATURE_HASH => {
            Some(HuntCore::HuntCompleted::decode_log(&log.inner).map(|event| DecodedCompletion {
                activity_id: event.activityId,
                player: event.player,
                victory: event.victory,
                hero_ids: event.heroIds.clone(),
                pet_ids: event.petIds.clone(),
            }))
        }
        PveVariant::Patrols if *topic == PatrolCore::PatrolCompleted::SIGNATURE_HASH => {
            Some(
                PatrolCore::PatrolCompleted::decode_log(&log.inner).map(|event| DecodedCompletion {
                    activity_id: event.activityId,
                    player: event.player,
                    victory: event.victory,
                    hero_ids: event.heroIds.clone(),
                    pet_ids: event.petIds.clone(),
                }),
            )
        }
        _ => None,
    }
}

/// `(item, amount, is_equipment)` of one reward log.
fn decode_reward(
    variant: PveVariant,
    log: &Log,
) -> Option<Result<(Address, U256, bool), alloy::sol_types::Error>> {
    let topic = log.topic0()?;
    match variant {
        PveVariant::Hunts if *topic == HuntCore::HuntRewardMinted::SIGNATURE_HASH => Some(
            HuntCore::HuntRewardMinted::decode_log(&log.inner)
                .map(|event| (event.item, event.amount, false)),
        ),
        PveVariant::Hunts if *topic == HuntCore::HuntEquipmentMinted::SIGNATURE_HASH => Some(
            HuntCore::HuntEquipmentMinted::decode_log(&log.inner)
                .map(|event| (event.equipment, U256::from(1u64), true)),
        ),
        PveVariant::Patrols if *topic == PatrolCore::PatrolRewardMinted::SIGNATURE_HASH => Some(
            PatrolCore::PatrolRewardMinted::decode_log(&log.inner)
                .map(|event| (event.item, event.amount, false)),
        ),
        PveVariant::Patrols if *topic == PatrolCore::PatrolEquipmentMinted::SIGNATURE_HASH => Some(
            PatrolCore::PatrolEquipmentMinted::decode_log(&log.inner)
                .map(|event| (event.equipment, U256::from(1u64), true)),
        ),
        _ => None,
    }
}

#[async_trait::async_trait]
impl LogIndexer for PveIndexer {
    fn indexer_type(&self) -> &'static str {
        "pve"
    }

    fn scope(&self) -> String {
        match self.variant {
            PveVariant::Hunts => "dfk".to_string(),
            PveVariant::Patrols => "metis".to_string(),
        }
    }

    fn chain_id(&self) -> u64 {
        self.deployment.chain_id
    }

    fn batch_size(&self) -> u64 {
        BATCH_SIZE
    }

    async fn filter(&self) -> Result<Filter> {
        let topics = match self.variant {
            PveVariant::Hunts => vec![
                HuntCore::HuntCompleted::SIGNATURE_HASH,
                HuntCore::HuntRewardMinted::SIGNATURE_HASH,
                HuntCore::HuntEquipmentMinted::SIGNATURE_HASH,
                HuntCore::HuntPetBonusReceived::SIGNATURE_HASH,
            ],
            PveVariant::Patrols => vec![
                PatrolCore::PatrolCompleted::SIGNATURE_HASH,
                PatrolCore::PatrolRewardMinted::SIGNATURE_HASH,
                PatrolCore::PatrolEquipmentMinted::SIGNATURE_HASH,
            ],
        };
        Ok(Filter::new()
            .address(self.deployment.activity_core)
            .event_signature(FilterSet::from_iter(topics)))
    }

    async fn process_logs(&self, logs: Vec<Log>) -> Result<EventCounters> {
        let mut counters = EventCounters::default();
        let chain_id = i64::try_from(self.deployment.chain_id).context("chain id exceeds i64")?;

        // everything belonging to one activity run shares a transaction
        let mut by_transaction: BTreeMap<B256, Vec<Log>> = BTreeMap::new();
        for log in logs {
            let Some(tx_hash) = log.transaction_hash else {
                tracing::warn!(?log, "skipping log without transaction hash");
                continue;
            };
            by_transaction.entry(tx_hash).or_default().push(log);
        }

        let mut completions = Vec::new();
        let mut rewards = Vec::new();

        for (tx_hash, group) in by_transaction {
            let Some((completion_log, decoded)) = group.iter().find_map(|log| {
                decode_completion(self.variant, log).map(|decoded| (log, decoded))
            }) else {
                continue;
            };
            let completion = match decoded {
                Ok(completion) => completion,
                Err(err) => {
                    tracing::warn!(%tx_hash, ?err, "undecodable completion, skipping transaction");
                    continue;
                }
            };
            if !completion.victory {
                counters.increment("defeat_skipped");
                continue;
            }
            let Some((db_tx_hash, _, block_number)) = log_meta(completion_log) else {
                continue;
            };

            let (party_luck, scavenger_bonus_pct) = match self.variant {
                PveVariant::Hunts => (
                    Some(self.party_luck(&completion.hero_ids, block_number).await?),
                    self.scavenger_bonus(&completion.pet_ids).await?,
                ),
                PveVariant::Patrols => (None, None),
            };

            let activity_id =
                i64::try_from(completion.activity_id).context("activity id exceeds i64")?;
            let to_i64_list = |ids: &[U256]| -> Result<Vec<i64>> {
                ids.iter()
                    .map(|id| i64::try_from(*id).context("token id exceeds i64"))
                    .collect()
            };
            completions.push(database::pve_completions::Completion {
                tx_hash: db_tx_hash,
                chain_id,
                activity_type: self.activity_type().to_string(),
                activity_id,
                player: db_address(completion.player),
                hero_ids: Json(to_i64_list(&completion.hero_ids)?),
                pet_ids: Json(to_i64_list(&completion.pet_ids)?),
                party_luck,
                scavenger_bonus_pct,
                block_number: i64::try_from(block_number).context("block number exceeds i64")?,
            });
            counters.increment("completion");

            for log in &group {
                let Some(decoded) = decode_reward(self.variant, log) else {
                    continue;
                };
                let (item, amount, is_equipment) = match decoded {
                    Ok(reward) => reward,
                    Err(err) => {
                        tracing::warn!(%tx_hash, ?err, "undecodable reward log, skipping");
                        continue;
                    }
                };
                let Some((db_tx_hash, log_index, block_number)) = log_meta(log) else {
                    continue;
                };
                rewards.push(database::pve_rewards::Reward {
                    tx_hash: db_tx_hash,
                    log_index,
                    chain_id,
                    activity_type: self.activity_type().to_string(),
                    activity_id,
                    player: db_address(completion.player),
                    item_address: db_address(item),
                    amount: big_decimal(amount),
                    is_equipment,
                    party_luck,
                    scavenger_bonus_pct,
                    block_number: i64::try_from(block_number)
                        .context("block number exceeds i64")?,
                });
                counters.increment(if is_equipment { "equipment" } else { "reward" });
            }
        }

        let mut transaction = self.db.pool.begin().await?;
        for completion in &completions {
            database::pve_activities::record(
                &mut transaction,
                &database::pve_activities::Activity {
                    chain_id,
                    activity_type: self.activity_type().to_string(),
                    activity_id: completion.activity_id,
                    first_seen_block: completion.block_number,
                },
            )
            .await?;
            database::pve_completions::insert(&mut transaction, completion).await?;
        }
        for reward in &rewards {
            database::pve_loot_items::record(&mut transaction, chain_id, &reward.item_address)
                .await?;
            if let Some((_, name, item_type, rarity)) = KNOWN_LOOT
                .iter()
                .find(|(address, ..)| db_address(*address) == reward.item_address)
            {
                database::pve_loot_items::backfill_metadata(
                    &mut transaction,
                    chain_id,
                    &reward.item_address,
                    name,
                    item_type,
                    rarity,
                )
                .await?;
            }
        }
        database::pve_rewards::append(&mut transaction, &rewards).await?;
        transaction.commit().await?;
        Ok(counters)
    }
}
