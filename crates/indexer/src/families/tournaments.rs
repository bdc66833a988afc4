//! PvP tournament indexer.
//!
//! Pages the battles GraphQL API newest-first with a small worker pool. Page
//! tasks live in an in-memory queue with one slot per worker; a worker whose
//! slot runs dry refills it from the page generator, and once the API is
//! exhausted it steals leftover pages from the fullest sibling instead of
//! idling.

use {
    crate::runtime::IndexerRuntime,
    anyhow::{Context, Result, anyhow},
    database::{
        byte_array::ByteArray,
        hero_snapshots::HeroSnapshot,
        tournaments::{Placement, Tournament},
    },
    futures::future::try_join_all,
    serde::Deserialize,
    sqlx::types::Json,
    std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicBool, AtomicI64, Ordering},
        },
        sync::Arc,
    },
    url::Url,
};

pub const WORKERS: usize = 5;
pub const PAGE_SIZE: i64 = 50;
/// Pages a worker pulls from the generator per refill.
const REFILL: usize = 4;

#[derive(Clone, Debug)]
pub struct TournamentConfig {
    pub graphql_url: Url,
    pub workers: usize,
}

#[derive(Debug, Deserialize)]
struct BattlesResponse {
    data: Option<BattlesData>,
}

#[derive(Debug, Deserialize)]
struct BattlesData {
    battles: Vec<Battle>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    #[serde(default)]
    pub heroes: Vec<BattleHero>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleHero {
    pub id: i64,
    pub main_class: i32,
    pub sub_class: i32,
    pub level: i32,
    pub rarity: i32,
    pub generation: i32,
    pub strength: i32,
    pub agility: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub luck: i32,
    pub vitality: i32,
    pub endurance: i32,
    pub dexterity: i32,
    pub active1: i32,
    pub active2: i32,
    pub passive1: i32,
    pub passive2: i32,
    pub stat_genes: Option<String>,
    pub summons_remaining: Option<i32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battle {
    #[serde(deserialize_with = "id_from_string")]
    pub id: i64,
    #[serde(default)]
    pub tournament_format: Option<String>,
    pub party_count: Option<i64>,
    pub level_min: Option<i64>,
    pub level_max: Option<i64>,
    pub rarity_min: Option<i64>,
    pub rarity_max: Option<i64>,
    #[serde(default)]
    pub unique_heroes: bool,
    #[serde(default, rename = "noTripleClass")]
    pub no_triple_class: bool,
    pub excluded_mask: Option<i64>,
    pub cons_mask: Option<i64>,
    pub orig_mask: Option<i64>,
    /// The upstream encodes this either as a boolean flag or directly as the
    /// class id; both shapes occur in the wild.
    pub must_include_class1: Option<serde_json::Value>,
    pub included_class1: Option<i64>,
    pub stat_score_min: Option<i64>,
    pub stat_score_max: Option<i64>,
    pub team_score_min: Option<i64>,
    pub team_score_max: Option<i64>,
    pub map_id: Option<i64>,
    pub battle_inventory: Option<bool>,
    pub battle_budget: Option<i64>,
    pub rewards: Option<serde_json::Value>,
    pub host_player: Option<Player>,
    pub opponent_player: Option<Player>,
    pub winner: Option<Player>,
}

fn id_from_string<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(id) => Ok(id),
        Raw::Text(text) => text.parse().map_err(serde::de::Error::custom),
    }
}

/// Normalized `mustIncludeClass1`: a flag plus the included class id,
/// whichever way the source encoded it.
pub fn included_class(battle: &Battle) -> Option<i64> {
    let flag = match &battle.must_include_class1 {
        None => false,
        Some(serde_json::Value::Bool(flag)) => *flag,
        Some(serde_json::Value::Number(id)) => id.as_i64().is_some_and(|id| id != 0),
        Some(other) => {
            tracing::warn!(?other, "unexpected mustIncludeClass1 shape, ignoring");
            false
        }
    };
    if !flag {
        return None;
    }
    battle.included_class1.or_else(|| {
        battle
            .must_include_class1
            .as_ref()
            .and_then(serde_json::Value::as_i64)
            .filter(|id| *id != 0)
    })
}

/// Canonical signature of a restriction bundle, used to group similar
/// tournaments. Fixed component order, components absent unless non-default,
/// joined by `_`.
pub fn type_signature(battle: &Battle) -> String {
    let mut components = Vec::new();
    if battle.level_min.is_some() || battle.level_max.is_some() {
        components.push(format!(
            "lv{}-{}",
            battle.level_min.unwrap_or(1),
            battle.level_max.unwrap_or(100)
        ));
    }
    if battle.rarity_min.is_some() || battle.rarity_max.is_some() {
        components.push(format!(
            "r{}-{}",
            battle.rarity_min.unwrap_or(0),
            battle.rarity_max.unwrap_or(4)
        ));
    }
    if let Some(party) = battle.party_count {
        components.push(format!("p{party}"));
    }
    if battle.unique_heroes {
        components.push("unique".to_string());
    }
    if battle.no_triple_class {
        components.push("no3x".to_string());
    }
    if let Some(mask) = battle.excluded_mask.filter(|mask| *mask != 0) {
        components.push(format!("excl{mask}"));
    }
    if let Some(mask) = battle.cons_mask.filter(|mask| *mask != 0) {
        components.push(format!("cons{mask}"));
    }
    if let Some(mask) = battle.orig_mask.filter(|mask| *mask != 0) {
        components.push(format!("orig{mask}"));
    }
    if let Some(class) = included_class(battle) {
        components.push(format!("inc{class}"));
    }
    if battle.stat_score_min.is_some() || battle.stat_score_max.is_some() {
        components.push(format!(
            "stat{}-{}",
            battle.stat_score_min.unwrap_or(0),
            battle.stat_score_max.unwrap_or(0)
        ));
    }
    if battle.team_score_min.is_some() || battle.team_score_max.is_some() {
        components.push(format!(
            "team{}-{}",
            battle.team_score_min.unwrap_or(0),
            battle.team_score_max.unwrap_or(0)
        ));
    }
    components.join("_")
}

/// Sum of the eight primary stats over a party.
pub fn combat_power_score(heroes: &[BattleHero]) -> i64 {
    heroes
        .iter()
        .map(|hero| {
            i64::from(
                hero.strength
                    + hero.agility
                    + hero.intelligence
                    + hero.wisdom
                    + hero.luck
                    + hero.vitality
                    + hero.endurance
                    + hero.dexterity,
            )
        })
        .sum()
}

/// Page tasks, one slot per worker, stealable once the generator dried up.
struct WorkQueue {
    slots: Vec<Mutex<VecDeque<i64>>>,
    next_skip: AtomicI64,
    exhausted: AtomicBool,
}

impl WorkQueue {
    fn new(workers: usize) -> Self {
        Self {
            slots: (0..workers).map(|_| Mutex::new(VecDeque::new())).collect(),
            next_skip: AtomicI64::new(0),
            exhausted: AtomicBool::new(false),
        }
    }

    fn mark_exhausted(&self) {
        self.exhausted.store(true, Ordering::SeqCst);
    }

    fn next(&self, worker: usize) -> Option<i64> {
        if let Some(skip) = self.slots[worker].lock().unwrap().pop_front() {
            return Some(skip);
        }
        if !self.exhausted.load(Ordering::SeqCst) {
            // refill the own slot from the page generator
            let mut slot = self.slots[worker].lock().unwrap();
            for _ in 0..REFILL {
                slot.push_back(self.next_skip.fetch_add(PAGE_SIZE, Ordering::SeqCst));
            }
            return slot.pop_front();
        }
        // generator is dry: steal from the fullest sibling
        let victim = (0..self.slots.len())
            .filter(|index| *index != worker)
            .max_by_key(|index| self.slots[*index].lock().unwrap().len())?;
        self.slots[victim].lock().unwrap().pop_back()
    }
}

pub struct TournamentIndexer {
    runtime: Arc<IndexerRuntime>,
    http: reqwest::Client,
    config: TournamentConfig,
}

#[derive(Debug, Default)]
pub struct TournamentSummary {
    pub battles_indexed: usize,
    pub pages_fetched: usize,
}

impl TournamentIndexer {
    pub fn new(runtime: Arc<IndexerRuntime>, config: TournamentConfig) -> Self {
        Self {
            runtime,
            http: reqwest::Client::new(),
            config,
        }
    }

    pub async fn run(&self) -> Result<TournamentSummary> {
        let workers = self.config.workers.max(1);
        let queue = WorkQueue::new(workers);
        let known_up_to = {
            let mut ex = self.runtime.db.pool.acquire().await?;
            database::tournaments::last_indexed_id(&mut ex).await?
        };

        let summaries = try_join_all(
            (0..workers).map(|worker| self.worker_loop(worker, &queue, known_up_to)),
        )
        .await?;

        let summary = summaries.into_iter().fold(
            TournamentSummary::default(),
            |mut total, partial| {
                total.battles_indexed += partial.battles_indexed;
                total.pages_fetched += partial.pages_fetched;
                total
            },
        );
        tracing::info!(
            battles = summary.battles_indexed,
            pages = summary.pages_fetched,
            "tournament pass complete"
        );
        Ok(summary)
    }

    async fn worker_loop(
        &self,
        worker: usize,
        queue: &WorkQueue,
        known_up_to: Option<i64>,
    ) -> Result<TournamentSummary> {
        let mut summary = TournamentSummary::default();
        while let Some(skip) = queue.next(worker) {
            if self.runtime.cancel.is_cancelled() {
                return Err(anyhow!("cancelled during tournament pass"));
            }
            let battles = self.fetch_page(skip).await?;
            summary.pages_fetched += 1;

            let exhausted = battles.len() < usize::try_from(PAGE_SIZE).unwrap_or(usize::MAX)
                || known_up_to
                    .is_some_and(|known| battles.iter().all(|battle| battle.id <= known));
            for battle in &battles {
                self.store_battle(battle).await?;
                summary.battles_indexed += 1;
            }
            if exhausted {
                queue.mark_exhausted();
            }
        }
        Ok(summary)
    }

    async fn fetch_page(&self, skip: i64) -> Result<Vec<Battle>> {
        const QUERY: &str = r#"
query($first: Int!, $skip: Int!) {
  battles(first: $first, skip: $skip, orderBy: id, orderDirection: desc) {
    id tournamentFormat partyCount
    levelMin levelMax rarityMin rarityMax
    uniqueHeroes noTripleClass
    excludedMask consMask origMask
    mustIncludeClass1 includedClass1
    statScoreMin statScoreMax teamScoreMin teamScoreMax
    mapId battleInventory battleBudget rewards
    hostPlayer { id heroes { id mainClass subClass level rarity generation
      strength agility intelligence wisdom luck vitality endurance dexterity
      active1 active2 passive1 passive2 statGenes summonsRemaining } }
    opponentPlayer { id heroes { id mainClass subClass level rarity generation
      strength agility intelligence wisdom luck vitality endurance dexterity
      active1 active2 passive1 passive2 statGenes summonsRemaining } }
    winner { id }
  }
}"#;
        let body = serde_json::json!({
            "query": QUERY,
            "variables": { "first": PAGE_SIZE, "skip": skip },
        });
        let response: BattlesResponse = self
            .http
            .post(self.config.graphql_url.clone())
            .json(&body)
            .send()
            .await
            .context("battles request failed")?
            .error_for_status()
            .context("battles request rejected")?
            .json()
            .await
            .context("battles response is not json")?;
        Ok(response.data.map(|data| data.battles).unwrap_or_default())
    }

    async fn store_battle(&self, battle: &Battle) -> Result<()> {
        let winner_id = battle.winner.as_ref().map(|player| player.id.clone());
        let restrictions = serde_json::json!({
            "levelMin": battle.level_min,
            "levelMax": battle.level_max,
            "rarityMin": battle.rarity_min,
            "rarityMax": battle.rarity_max,
            "partyCount": battle.party_count,
            "uniqueHeroes": battle.unique_heroes,
            "noTripleClass": battle.no_triple_class,
            "excludedMask": battle.excluded_mask,
            "consMask": battle.cons_mask,
            "origMask": battle.orig_mask,
            "includedClass1": included_class(battle),
            "statScoreMin": battle.stat_score_min,
            "statScoreMax": battle.stat_score_max,
            "teamScoreMin": battle.team_score_min,
            "teamScoreMax": battle.team_score_max,
            "mapId": battle.map_id,
            "battleInventory": battle.battle_inventory,
            "battleBudget": battle.battle_budget,
        });

        let tournament = Tournament {
            tournament_id: battle.id,
            format: battle
                .tournament_format
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            party_size: battle
                .party_count
                .and_then(|count| i32::try_from(count).ok())
                .unwrap_or(1),
            restrictions: Json(restrictions),
            rewards: battle.rewards.clone().map(Json),
            host_player: battle
                .host_player
                .as_ref()
                .and_then(|player| parse_address(&player.id)),
            opponent_player: battle
                .opponent_player
                .as_ref()
                .and_then(|player| parse_address(&player.id)),
            winner_player: winner_id.as_deref().and_then(parse_address),
            type_signature: type_signature(battle),
        };

        let mut placements = Vec::new();
        let mut snapshots = Vec::new();
        for player in [&battle.host_player, &battle.opponent_player]
            .into_iter()
            .flatten()
        {
            let Some(address) = parse_address(&player.id) else {
                tracing::warn!(player = %player.id, "unparseable player address, skipping");
                continue;
            };
            placements.push(Placement {
                tournament_id: battle.id,
                player: address,
                is_winner: winner_id.as_deref() == Some(player.id.as_str()),
                combat_power_score: combat_power_score(&player.heroes),
            });
            for hero in &player.heroes {
                snapshots.push(HeroSnapshot {
                    tournament_id: battle.id,
                    hero_id: hero.id,
                    player: address,
                    main_class: hero.main_class,
                    sub_class: hero.sub_class,
                    level: hero.level,
                    rarity: hero.rarity,
                    generation: hero.generation,
                    strength: hero.strength,
                    agility: hero.agility,
                    intelligence: hero.intelligence,
                    wisdom: hero.wisdom,
                    luck: hero.luck,
                    vitality: hero.vitality,
                    endurance: hero.endurance,
                    dexterity: hero.dexterity,
                    active1: hero.active1,
                    active2: hero.active2,
                    passive1: hero.passive1,
                    passive2: hero.passive2,
                    stat_genes: hero.stat_genes.clone(),
                    summons_remaining: hero.summons_remaining,
                });
            }
        }

        let mut transaction = self.runtime.db.pool.begin().await?;
        database::tournaments::upsert(&mut transaction, &tournament).await?;
        database::tournaments::insert_placements(&mut transaction, &placements).await?;
        database::hero_snapshots::append(&mut transaction, &snapshots).await?;
        transaction.commit().await?;
        Ok(())
    }
}

fn parse_address(text: &str) -> Option<database::Address> {
    let address: alloy::primitives::Address = text.parse().ok()?;
    Some(ByteArray(address.into_array()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_component_order_and_defaults() {
        let battle = Battle {
            id: 7,
            level_min: Some(1),
            level_max: Some(20),
            rarity_min: Some(0),
            rarity_max: Some(4),
            party_count: Some(3),
            unique_heroes: true,
            no_triple_class: true,
            excluded_mask: Some(12),
            included_class1: Some(5),
            must_include_class1: Some(serde_json::Value::Bool(true)),
            stat_score_min: Some(100),
            stat_score_max: Some(700),
            team_score_min: Some(300),
            team_score_max: Some(2100),
            ..Default::default()
        };
        assert_eq!(
            type_signature(&battle),
            "lv1-20_r0-4_p3_unique_no3x_excl12_inc5_stat100-700_team300-2100"
        );

        // absent restrictions leave no component behind
        let bare = Battle {
            id: 8,
            party_count: Some(1),
            excluded_mask: Some(0),
            ..Default::default()
        };
        assert_eq!(type_signature(&bare), "p1");
    }

    #[test]
    fn must_include_class_tolerates_both_shapes() {
        // boolean flag plus separate id
        let battle = Battle {
            must_include_class1: Some(serde_json::Value::Bool(true)),
            included_class1: Some(9),
            ..Default::default()
        };
        assert_eq!(included_class(&battle), Some(9));

        // the id arrives in the flag field itself
        let battle = Battle {
            must_include_class1: Some(serde_json::json!(9)),
            included_class1: None,
            ..Default::default()
        };
        assert_eq!(included_class(&battle), Some(9));

        let battle = Battle {
            must_include_class1: Some(serde_json::Value::Bool(false)),
            included_class1: Some(9),
            ..Default::default()
        };
        assert_eq!(included_class(&battle), None);

        assert_eq!(included_class(&Battle::default()), None);
    }

    #[test]
    fn combat_power_is_the_stat_sum() {
        let hero = BattleHero {
            strength: 10,
            agility: 11,
            intelligence: 12,
            wisdom: 13,
            luck: 14,
            vitality: 15,
            endurance: 16,
            dexterity: 17,
            ..Default::default()
        };
        assert_eq!(combat_power_score(&[hero.clone(), hero]), 216);
    }

    #[test]
    fn queue_refills_then_steals() {
        let queue = WorkQueue::new(2);
        // worker 0 refills its slot from the generator
        assert_eq!(queue.next(0), Some(0));
        assert_eq!(queue.next(0), Some(50));
        // worker 1 gets the next generator block
        assert_eq!(queue.next(1), Some(200));

        queue.mark_exhausted();
        // worker 1's slot still holds 250/300/350; worker 0 steals from it
        assert_eq!(queue.next(0), Some(100));
        assert_eq!(queue.next(0), Some(150));
        assert_eq!(queue.next(0), Some(350));
        assert_eq!(queue.next(1), Some(250));
        assert_eq!(queue.next(1), Some(300));
        assert_eq!(queue.next(1), None);
        assert_eq!(queue.next(0), None);
    }

    #[test]
    fn battle_ids_parse_from_strings_and_numbers() {
        let json = serde_json::json!({"id": "123", "uniqueHeroes": true});
        let battle: Battle = serde_json::from_value(json).unwrap();
        assert_eq!(battle.id, 123);
        assert!(battle.unique_heroes);

        let json = serde_json::json!({"id": 456});
        let battle: Battle = serde_json::from_value(json).unwrap();
        assert_eq!(battle.id, 456);
    }
}
