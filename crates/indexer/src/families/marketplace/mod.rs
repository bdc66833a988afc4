//! Marketplace snapshot indexer.
//!
//! A pool of cooperative workers pages through the marketplace REST API with
//! disjoint offset windows; each full pass stamps the heroes it saw with a
//! fresh batch id, and heroes missing from the latest batch are swept away
//! afterwards (delistings). Gene backfill runs separately, see [`genes`].

pub mod genes;

use {
    super::EventCounters,
    crate::runtime::IndexerRuntime,
    anyhow::{Context, Result, anyhow},
    bigdecimal::BigDecimal,
    database::tavern_heroes::{GenesStatus, Realm, TavernHero},
    ethrpc::{RetryConfig, Retryable, with_retry},
    futures::future::join_all,
    serde::Deserialize,
    std::{str::FromStr, sync::Arc},
    url::Url,
};

/// Cooperative fetch workers per pass.
pub const FETCH_WORKERS: usize = 10;
/// Heroes per REST page.
pub const PAGE_LIMIT: usize = 100;
/// Hard stop; the tavern has never listed remotely this many heroes.
pub const SAFETY_CAP: usize = 50_000;
/// All-empty fleet-wide passes before the snapshot is considered done.
const EMPTY_PASSES_TO_STOP: u32 = 2;

/// Hero ids at or above this belong to Sundered Isles; ids in
/// `[HERO_ID_REALM_BASE, 2 * HERO_ID_REALM_BASE)` to Crystalvale.
const HERO_ID_REALM_BASE: i64 = 1_000_000_000_000;

#[derive(Clone, Debug)]
pub struct MarketplaceConfig {
    pub api_url: Url,
    pub graphql_url: Url,
    pub fetch_workers: usize,
    pub gene_workers: usize,
}

/// One hero as the REST API returns it.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHero {
    pub id: i64,
    pub network: Option<String>,
    pub main_class: i32,
    pub sub_class: i32,
    pub profession: i32,
    pub rarity: i32,
    pub level: i32,
    pub generation: i32,
    pub summons: i32,
    pub max_summons: i32,
    pub strength: i32,
    pub agility: i32,
    pub intelligence: i32,
    pub wisdom: i32,
    pub luck: i32,
    pub vitality: i32,
    pub endurance: i32,
    pub dexterity: i32,
    pub hp: i32,
    pub mp: i32,
    pub stamina: i32,
    pub active1: i32,
    pub active2: i32,
    pub passive1: i32,
    pub passive2: i32,
    pub summon_stone: Option<String>,
    pub sale_price: String,
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("marketplace api returned status {0}")]
    Status(reqwest::StatusCode),
}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            FetchError::Status(status) => {
                *status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct SnapshotSummary {
    pub batch_id: String,
    pub heroes_indexed: usize,
    pub stale_deleted: u64,
    pub passes: u32,
}

pub struct MarketplaceIndexer {
    runtime: Arc<IndexerRuntime>,
    http: reqwest::Client,
    config: MarketplaceConfig,
}

impl MarketplaceIndexer {
    pub fn new(runtime: Arc<IndexerRuntime>, config: MarketplaceConfig) -> Self {
        Self {
            runtime,
            http: reqwest::Client::new(),
            config,
        }
    }

    /// One full snapshot pass: page until two consecutive fleet-wide passes
    /// come back all-empty, then sweep stale listings.
    pub async fn run_snapshot(&self) -> Result<SnapshotSummary> {
        let batch_id = format!("batch_{}", chrono::Utc::now().timestamp_millis());
        let workers = self.config.fetch_workers.max(1);
        let mut summary = SnapshotSummary {
            batch_id: batch_id.clone(),
            ..Default::default()
        };
        let mut consecutive_empty = 0;
        let mut next_offset = 0usize;

        while consecutive_empty < EMPTY_PASSES_TO_STOP {
            if self.runtime.cancel.is_cancelled() {
                return Err(anyhow!("cancelled during marketplace snapshot"));
            }
            // one fleet-wide pass: every worker takes a disjoint window
            let windows: Vec<usize> = (0..workers)
                .map(|worker| next_offset + worker * PAGE_LIMIT)
                .collect();
            next_offset += workers * PAGE_LIMIT;

            let pages = join_all(windows.iter().map(|offset| self.fetch_page(*offset))).await;
            summary.passes += 1;

            let mut all_empty = true;
            let mut heroes = Vec::new();
            for page in pages {
                let page = page?;
                if !page.is_empty() {
                    all_empty = false;
                }
                heroes.extend(page);
            }
            consecutive_empty = if all_empty { consecutive_empty + 1 } else { 0 };

            let mut counters = EventCounters::default();
            let mut ex = self.runtime.db.pool.acquire().await?;
            for hero in heroes {
                let Some(row) = normalize(&hero, &batch_id) else {
                    counters.increment("unknown_realm_dropped");
                    continue;
                };
                database::tavern_heroes::upsert(&mut ex, &row).await?;
                summary.heroes_indexed += 1;
                counters.increment("hero");
            }
            drop(ex);
            tracing::debug!(
                pass = summary.passes,
                heroes = summary.heroes_indexed,
                dropped = counters.0.get("unknown_realm_dropped").copied().unwrap_or(0),
                "marketplace pass finished"
            );

            if summary.heroes_indexed >= SAFETY_CAP {
                tracing::warn!(cap = SAFETY_CAP, "marketplace safety cap reached, stopping pass");
                break;
            }
        }

        let mut ex = self.runtime.db.pool.acquire().await?;
        summary.stale_deleted = database::tavern_heroes::delete_stale(&mut ex, &batch_id)
            .await
            .context("sweep stale listings")?;
        tracing::info!(
            batch = %batch_id,
            heroes = summary.heroes_indexed,
            swept = summary.stale_deleted,
            "marketplace snapshot complete"
        );
        Ok(summary)
    }

    async fn fetch_page(&self, offset: usize) -> Result<Vec<ApiHero>> {
        let body = serde_json::json!({ "limit": PAGE_LIMIT, "offset": offset });
        let heroes = with_retry("marketplace_page", RetryConfig::default(), || async {
            let response = self
                .http
                .post(self.config.api_url.clone())
                .json(&body)
                .send()
                .await
                .map_err(FetchError::Http)?;
            if !response.status().is_success() {
                return Err(FetchError::Status(response.status()));
            }
            response
                .json::<Vec<ApiHero>>()
                .await
                .map_err(FetchError::Http)
        })
        .await
        .with_context(|| format!("fetch marketplace page at offset {offset}"))?;
        Ok(heroes)
    }
}

/// Realm inference. The `network` field wins when present; otherwise the
/// hero-id range decides. Heroes of unknown realm are dropped.
pub fn infer_realm(network: Option<&str>, hero_id: i64) -> Option<Realm> {
    match network {
        Some("met") => return Some(Realm::Sd),
        Some("dfk") | Some("avax") => return Some(Realm::Cv),
        _ => {}
    }
    if (HERO_ID_REALM_BASE..2 * HERO_ID_REALM_BASE).contains(&hero_id) {
        Some(Realm::Cv)
    } else if hero_id >= 2 * HERO_ID_REALM_BASE {
        Some(Realm::Sd)
    } else {
        None
    }
}

/// Tier points of one ability id. Actives: `0-7 -> 0, 8-11 -> 1,
/// 12-13 -> 2, 14 -> 3`; passives: `16-23 -> 0, 24-27 -> 1, 28-29 -> 2,
/// 30 -> 3`. Anything else scores 0.
pub fn ability_tier_points(ability: i32) -> i32 {
    match ability {
        8..=11 | 24..=27 => 1,
        12..=13 | 28..=29 => 2,
        14 | 30 => 3,
        _ => 0,
    }
}

pub fn trait_score(abilities: [i32; 4]) -> i32 {
    abilities.into_iter().map(ability_tier_points).sum()
}

/// Tier index of a summoning stone by contract address; `None` for a missing
/// or zero address.
fn stone_tier(summon_stone: Option<&str>) -> Option<i32> {
    let address: alloy::primitives::Address = summon_stone?.parse().ok()?;
    if address.is_zero() {
        return None;
    }
    contracts::deployments::SUMMON_STONES
        .iter()
        .position(|(stone, ..)| *stone == address)
        .and_then(|position| i32::try_from(position).ok())
}

pub fn normalize(hero: &ApiHero, batch_id: &str) -> Option<TavernHero> {
    let realm = infer_realm(hero.network.as_deref(), hero.id)?;
    let sale_price_wei = BigDecimal::from_str(&hero.sale_price).ok()?;
    let price_native = f64::from_str(&hero.sale_price).ok()? / 1e18;
    let native_token = match realm {
        Realm::Cv => "CRYSTAL",
        Realm::Sd => "JEWEL",
    };
    Some(TavernHero {
        hero_id: hero.id,
        realm: realm.as_str().to_string(),
        main_class: hero.main_class,
        sub_class: hero.sub_class,
        profession: hero.profession,
        rarity: hero.rarity,
        level: hero.level,
        generation: hero.generation,
        summons: hero.summons,
        max_summons: hero.max_summons,
        strength: hero.strength,
        agility: hero.agility,
        intelligence: hero.intelligence,
        wisdom: hero.wisdom,
        luck: hero.luck,
        vitality: hero.vitality,
        endurance: hero.endurance,
        dexterity: hero.dexterity,
        hp: hero.hp,
        mp: hero.mp,
        stamina: hero.stamina,
        active1: hero.active1,
        active2: hero.active2,
        passive1: hero.passive1,
        passive2: hero.passive2,
        stones_used: stone_tier(hero.summon_stone.as_deref()),
        trait_score: trait_score([hero.active1, hero.active2, hero.passive1, hero.passive2]),
        combat_power: hero.strength
            + hero.agility
            + hero.intelligence
            + hero.wisdom
            + hero.luck
            + hero.vitality
            + hero.endurance
            + hero.dexterity,
        sale_price_wei,
        price_native,
        native_token: native_token.to_string(),
        genes_status: GenesStatus::Pending,
        batch_id: batch_id.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_hero(id: i64) -> ApiHero {
        ApiHero {
            id,
            network: None,
            main_class: 0,
            sub_class: 1,
            profession: 2,
            rarity: 3,
            level: 10,
            generation: 4,
            summons: 0,
            max_summons: 10,
            strength: 10,
            agility: 11,
            intelligence: 12,
            wisdom: 13,
            luck: 14,
            vitality: 15,
            endurance: 16,
            dexterity: 17,
            hp: 300,
            mp: 60,
            stamina: 27,
            active1: 14,
            active2: 8,
            passive1: 30,
            passive2: 16,
            summon_stone: None,
            sale_price: "2500000000000000000".to_string(),
        }
    }

    #[test]
    fn realm_inference_order() {
        // the network field wins over the id range
        assert_eq!(infer_realm(Some("met"), HERO_ID_REALM_BASE), Some(Realm::Sd));
        assert_eq!(infer_realm(Some("dfk"), 3 * HERO_ID_REALM_BASE), Some(Realm::Cv));
        assert_eq!(infer_realm(Some("avax"), 1), Some(Realm::Cv));
        // fall back to the id range
        assert_eq!(infer_realm(None, HERO_ID_REALM_BASE), Some(Realm::Cv));
        assert_eq!(infer_realm(None, 2 * HERO_ID_REALM_BASE), Some(Realm::Sd));
        assert_eq!(infer_realm(Some("unknown"), 5 * HERO_ID_REALM_BASE), Some(Realm::Sd));
        // Serendale v1 ids below the base have no marketplace realm
        assert_eq!(infer_realm(None, 123_456), None);
    }

    #[test]
    fn ability_tier_table() {
        assert_eq!(ability_tier_points(0), 0);
        assert_eq!(ability_tier_points(7), 0);
        assert_eq!(ability_tier_points(8), 1);
        assert_eq!(ability_tier_points(11), 1);
        assert_eq!(ability_tier_points(12), 2);
        assert_eq!(ability_tier_points(14), 3);
        // the gap between actives and passives scores nothing
        assert_eq!(ability_tier_points(15), 0);
        assert_eq!(ability_tier_points(16), 0);
        assert_eq!(ability_tier_points(23), 0);
        assert_eq!(ability_tier_points(24), 1);
        assert_eq!(ability_tier_points(28), 2);
        assert_eq!(ability_tier_points(30), 3);
        assert_eq!(ability_tier_points(31), 0);
        assert_eq!(ability_tier_points(-1), 0);

        assert_eq!(trait_score([14, 8, 30, 16]), 7);
    }

    #[test]
    fn normalization() {
        let hero = api_hero(HERO_ID_REALM_BASE + 5);
        let row = normalize(&hero, "batch_1").unwrap();
        assert_eq!(row.realm, "cv");
        assert_eq!(row.native_token, "CRYSTAL");
        assert_eq!(row.price_native, 2.5);
        assert_eq!(row.combat_power, 108);
        assert_eq!(row.trait_score, 7);
        assert_eq!(row.genes_status, GenesStatus::Pending);
        assert_eq!(row.stones_used, None);

        // unknown realm heroes are dropped
        assert!(normalize(&api_hero(17), "batch_1").is_none());
    }
}
