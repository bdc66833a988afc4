//! Bargain-pair scoring: which two tavern heroes produce the most expected
//! summon value per token spent.
//!
//! A single-shot job, not a streaming indexer. It reads the latest
//! marketplace snapshot, scores same-realm hero pairs through the external
//! summoning engine and publishes a bucketed top-K cache for the UI.

use {
    crate::{
        db::Postgres,
        summoning::SummonEngine,
    },
    anyhow::{Context, Result, anyhow},
    database::{
        bargain_cache::{CacheEntry, SummonType},
        tavern_heroes::BargainHero,
    },
    itertools::Itertools,
    serde::Serialize,
    sqlx::types::Json,
    std::{collections::BTreeMap, sync::Arc},
};

/// Cheapest listings considered per rarity bucket.
const PER_RARITY: usize = 150;
/// Published pairs per min-rarity bucket.
const TOP_PER_BUCKET: usize = 200;
const RARITIES: i32 = 5;
/// Gaia's tears needed scale with the parents' generations.
const TEAR_PRICE: f64 = 0.05;

/// Base summoning fee in native tokens; dark summons burn a quarter of it.
pub fn base_summon_cost(generation1: i32, generation2: i32, summon_type: SummonType) -> f64 {
    let cost = f64::from(6 + 2 * generation1.max(generation2));
    match summon_type {
        SummonType::Regular => cost,
        SummonType::Dark => cost / 4.0,
    }
}

pub fn tear_count(generation1: i32, generation2: i32) -> i32 {
    ((generation1 + generation2 + 2) / 4).max(1)
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairScore {
    pub hero_id1: i64,
    pub hero_id2: i64,
    pub realm: String,
    pub rarity1: i32,
    pub rarity2: i32,
    pub generation1: i32,
    pub generation2: i32,
    pub price1: f64,
    pub price2: f64,
    pub purchase_cost: f64,
    pub base_summon_cost: f64,
    pub tear_count: i32,
    pub tear_cost: f64,
    pub total_cost: f64,
    pub total_cost_usd: f64,
    pub expected_tts: f64,
    pub elite_chance: f64,
    pub exalted_chance: f64,
    /// Expected trait score per native token; deliberately USD-free so a
    /// stale price feed cannot reorder the ranking.
    pub efficiency: f64,
}

#[derive(Debug, Default)]
pub struct ScoredSet {
    pub pairs: Vec<PairScore>,
    pub total_pairs_scored: u64,
    pub skipped: BTreeMap<&'static str, u64>,
}

pub struct TokenPrices {
    pub crystal: f64,
    pub jewel: f64,
}

impl TokenPrices {
    fn for_realm(&self, realm: &str) -> f64 {
        match realm {
            "sd" => self.jewel,
            _ => self.crystal,
        }
    }
}

fn score_pair(
    engine: &dyn SummonEngine,
    summon_type: SummonType,
    prices: &TokenPrices,
    first: &BargainHero,
    second: &BargainHero,
) -> Result<PairScore> {
    let purchase_cost = first.price_native + second.price_native;
    let summon_cost = base_summon_cost(first.generation, second.generation, summon_type);
    let tears = tear_count(first.generation, second.generation);
    let tear_cost = TEAR_PRICE * f64::from(tears);
    let total_cost = purchase_cost + summon_cost + tear_cost;

    let probs = engine.summoning_probabilities(
        &first.genes,
        &second.genes,
        first.rarity,
        second.rarity,
    )?;
    let tts = engine.tts_probabilities(&probs);
    let chances = engine.elite_exalted_chances(&tts.slot_tier_probs);

    Ok(PairScore {
        hero_id1: first.hero_id,
        hero_id2: second.hero_id,
        realm: first.realm.clone(),
        rarity1: first.rarity,
        rarity2: second.rarity,
        generation1: first.generation,
        generation2: second.generation,
        price1: first.price_native,
        price2: second.price_native,
        purchase_cost,
        base_summon_cost: summon_cost,
        tear_count: tears,
        tear_cost,
        total_cost,
        total_cost_usd: total_cost * prices.for_realm(&first.realm),
        expected_tts: tts.expected_tts,
        elite_chance: chances.elite,
        exalted_chance: chances.exalted,
        efficiency: tts.expected_tts / total_cost,
    })
}

/// Buckets candidates by rarity (150 cheapest each), enumerates unordered
/// same-realm pairs, scores them, and keeps the top 200 per min-rarity
/// bucket sorted by efficiency.
pub fn score_candidates(
    engine: &dyn SummonEngine,
    summon_type: SummonType,
    prices: &TokenPrices,
    candidates: &[BargainHero],
) -> ScoredSet {
    let mut set = ScoredSet::default();

    // 150 cheapest per rarity; candidates arrive cheapest-first
    let mut by_rarity: BTreeMap<i32, Vec<&BargainHero>> = BTreeMap::new();
    for hero in candidates {
        let bucket = by_rarity.entry(hero.rarity.clamp(0, RARITIES - 1)).or_default();
        if bucket.len() < PER_RARITY {
            bucket.push(hero);
        }
    }

    // pairs never cross realms
    let mut by_realm: BTreeMap<&str, Vec<&BargainHero>> = BTreeMap::new();
    for hero in by_rarity.into_values().flatten() {
        by_realm.entry(hero.realm.as_str()).or_default().push(hero);
    }

    let mut by_min_rarity: BTreeMap<i32, Vec<PairScore>> = BTreeMap::new();
    for heroes in by_realm.into_values() {
        for (first, second) in heroes.iter().tuple_combinations() {
            match score_pair(engine, summon_type, prices, first, second) {
                Ok(score) => {
                    set.total_pairs_scored += 1;
                    by_min_rarity
                        .entry(first.rarity.min(second.rarity))
                        .or_default()
                        .push(score);
                }
                Err(err) => {
                    tracing::debug!(
                        hero1 = first.hero_id,
                        hero2 = second.hero_id,
                        ?err,
                        "pair not scorable, skipping"
                    );
                    *set.skipped.entry("probability_failed").or_default() += 1;
                }
            }
        }
    }

    for pairs in by_min_rarity.into_values() {
        set.pairs.extend(
            pairs
                .into_iter()
                .sorted_by(|a, b| b.efficiency.total_cmp(&a.efficiency))
                .take(TOP_PER_BUCKET),
        );
    }
    set.pairs
        .sort_by(|a, b| b.efficiency.total_cmp(&a.efficiency));
    set
}

pub struct BargainJob {
    db: Postgres,
    engine: Arc<dyn SummonEngine>,
}

#[derive(Debug, Default)]
pub struct BargainSummary {
    pub heroes_considered: [usize; 2],
    pub pairs_published: [usize; 2],
}

impl BargainJob {
    pub fn new(db: Postgres, engine: Arc<dyn SummonEngine>) -> Self {
        Self { db, engine }
    }

    pub async fn run(&self) -> Result<BargainSummary> {
        let mut summary = BargainSummary::default();
        for (index, summon_type) in [SummonType::Regular, SummonType::Dark].into_iter().enumerate()
        {
            let (heroes, pairs) = self.refresh(summon_type).await?;
            summary.heroes_considered[index] = heroes;
            summary.pairs_published[index] = pairs;
        }
        Ok(summary)
    }

    async fn refresh(&self, summon_type: SummonType) -> Result<(usize, usize)> {
        let mut ex = self.db.pool.acquire().await?;
        let crystal = database::token_prices::fetch(&mut ex, "CRYSTAL")
            .await?
            .ok_or_else(|| anyhow!("no CRYSTAL price in token_price_graph"))?;
        let jewel = database::token_prices::fetch(&mut ex, "JEWEL")
            .await?
            .ok_or_else(|| anyhow!("no JEWEL price in token_price_graph"))?;
        let prices = TokenPrices { crystal, jewel };

        // regular summons need a summon left on both sides; dark summons
        // work on exhausted heroes
        let require_summons_left = summon_type == SummonType::Regular;
        let candidates =
            database::tavern_heroes::fetch_bargain_candidates(&mut ex, require_summons_left)
                .await
                .context("load bargain candidates")?;

        let set = score_candidates(self.engine.as_ref(), summon_type, &prices, &candidates);
        if !set.skipped.is_empty() {
            tracing::info!(summon_type = summon_type.as_str(), skipped = ?set.skipped, "pairs skipped");
        }

        let entry = CacheEntry {
            summon_type,
            total_heroes: i64::try_from(candidates.len()).unwrap_or(i64::MAX),
            total_pairs_scored: i64::try_from(set.total_pairs_scored).unwrap_or(i64::MAX),
            crystal_price: prices.crystal,
            jewel_price: prices.jewel,
            top_pairs: Json(serde_json::to_value(&set.pairs).context("serialize top pairs")?),
            computed_at: chrono::Utc::now(),
        };
        database::bargain_cache::upsert(&mut ex, &entry).await?;
        tracing::info!(
            summon_type = summon_type.as_str(),
            heroes = candidates.len(),
            pairs = set.pairs.len(),
            "bargain cache refreshed"
        );
        Ok((candidates.len(), set.pairs.len()))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::summoning::{MockSummonEngine, SummonProbabilities, TtsData},
        database::tavern_heroes::GeneSet,
    };

    fn hero(id: i64, realm: &str, rarity: i32, generation: i32, price: f64) -> BargainHero {
        BargainHero {
            hero_id: id,
            realm: realm.to_string(),
            rarity,
            generation,
            summons: 0,
            max_summons: 10,
            price_native: price,
            native_token: if realm == "sd" { "JEWEL" } else { "CRYSTAL" }.to_string(),
            genes: GeneSet::default(),
        }
    }

    fn engine_with_tts(tts: f64) -> MockSummonEngine {
        let mut engine = MockSummonEngine::new();
        engine
            .expect_summoning_probabilities()
            .returning(|_, _, _, _| Ok(SummonProbabilities::default()));
        engine.expect_tts_probabilities().returning(move |_| TtsData {
            expected_tts: tts,
            ..Default::default()
        });
        engine
            .expect_elite_exalted_chances()
            .returning(|_| Default::default());
        engine
    }

    #[test]
    fn summon_cost_and_tears_are_exact() {
        assert_eq!(base_summon_cost(5, 7, SummonType::Regular), 20.0);
        assert_eq!(base_summon_cost(5, 7, SummonType::Dark), 5.0);
        assert_eq!(base_summon_cost(0, 0, SummonType::Regular), 6.0);
        assert_eq!(tear_count(5, 7), 3);
        assert_eq!(tear_count(0, 0), 1);
        assert_eq!(tear_count(1, 1), 1);
        assert_eq!(tear_count(3, 3), 2);
    }

    #[test]
    fn dark_mythic_pair_cost_breakdown() {
        let engine = engine_with_tts(10.0);
        let prices = TokenPrices {
            crystal: 0.2,
            jewel: 0.35,
        };
        let pair = score_pair(
            &engine,
            SummonType::Dark,
            &prices,
            &hero(1, "cv", 4, 5, 100.0),
            &hero(2, "cv", 4, 7, 150.0),
        )
        .unwrap();
        assert_eq!(pair.purchase_cost, 250.0);
        assert_eq!(pair.base_summon_cost, 5.0);
        assert_eq!(pair.tear_count, 3);
        assert!((pair.tear_cost - 0.15).abs() < 1e-12);
        assert!((pair.total_cost - 255.15).abs() < 1e-12);
        assert!((pair.total_cost_usd - 51.03).abs() < 1e-9);
        assert!((pair.efficiency - 10.0 / 255.15).abs() < 1e-12);
    }

    #[test]
    fn pairs_stay_within_a_realm() {
        let engine = engine_with_tts(5.0);
        let prices = TokenPrices {
            crystal: 0.2,
            jewel: 0.35,
        };
        let candidates = vec![
            hero(1, "cv", 0, 0, 10.0),
            hero(2, "cv", 0, 0, 20.0),
            hero(3, "sd", 0, 0, 30.0),
        ];
        let set = score_candidates(&engine, SummonType::Regular, &prices, &candidates);
        // only the cv pair; the lone sd hero pairs with nobody
        assert_eq!(set.total_pairs_scored, 1);
        assert_eq!(
            (set.pairs[0].hero_id1, set.pairs[0].hero_id2),
            (1, 2)
        );
    }

    #[test]
    fn failed_probabilities_are_skipped_and_counted() {
        let mut engine = MockSummonEngine::new();
        engine
            .expect_summoning_probabilities()
            .returning(|_, _, _, _| Err(anyhow!("incompatible genes")));
        let prices = TokenPrices {
            crystal: 1.0,
            jewel: 1.0,
        };
        let candidates = vec![hero(1, "cv", 0, 0, 1.0), hero(2, "cv", 0, 0, 2.0)];
        let set = score_candidates(&engine, SummonType::Regular, &prices, &candidates);
        assert!(set.pairs.is_empty());
        assert_eq!(set.total_pairs_scored, 0);
        assert_eq!(set.skipped["probability_failed"], 1);
    }

    #[test]
    fn empty_candidate_set_scores_nothing() {
        let engine = engine_with_tts(5.0);
        let prices = TokenPrices {
            crystal: 1.0,
            jewel: 1.0,
        };
        let set = score_candidates(&engine, SummonType::Regular, &prices, &[]);
        assert!(set.pairs.is_empty());
        assert_eq!(set.total_pairs_scored, 0);
    }

    #[test]
    fn ranking_prefers_efficiency() {
        let engine = engine_with_tts(12.0);
        let prices = TokenPrices {
            crystal: 0.2,
            jewel: 0.35,
        };
        let candidates = vec![
            hero(1, "cv", 0, 0, 5.0),
            hero(2, "cv", 0, 0, 50.0),
            hero(3, "cv", 0, 0, 500.0),
        ];
        let set = score_candidates(&engine, SummonType::Regular, &prices, &candidates);
        assert_eq!(set.total_pairs_scored, 3);
        // cheapest pair first: identical expected TTS, lowest total cost
        assert_eq!(
            (set.pairs[0].hero_id1, set.pairs[0].hero_id2),
            (1, 2)
        );
        assert!(set.pairs.windows(2).all(|w| w[0].efficiency >= w[1].efficiency));
    }
}
