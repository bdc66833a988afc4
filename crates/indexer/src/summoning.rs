//! Seam to the external summoning-probability engine.
//!
//! The probability arithmetic itself lives outside this service; the bargain
//! scorer only needs the documented signature below. Implementations are
//! injected through the composition root, tests use the generated mock.

use {anyhow::Result, database::tavern_heroes::GeneSet};

/// Output of `calculateSummoningProbabilities`: per gene slot, the
/// probability of each possible raw id surfacing as the child's dominant.
#[derive(Clone, Debug, Default)]
pub struct SummonProbabilities {
    pub slot_outcomes: [Vec<(i32, f64)>; 12],
}

/// Team-trait-score distribution derived from the probabilities.
#[derive(Clone, Debug, Default)]
pub struct TtsData {
    /// Expected value of the produced summon's trait score.
    pub expected_tts: f64,
    /// Per slot, probability mass of each ability tier (0..=3).
    pub slot_tier_probs: [[f64; 4]; 12],
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EliteExaltedChances {
    pub elite: f64,
    pub exalted: f64,
}

#[cfg_attr(test, mockall::automock)]
pub trait SummonEngine: Send + Sync {
    /// `calculateSummoningProbabilities(g1, g2, rarity1, rarity2)`.
    fn summoning_probabilities(
        &self,
        genes1: &GeneSet,
        genes2: &GeneSet,
        rarity1: i32,
        rarity2: i32,
    ) -> Result<SummonProbabilities>;

    /// `calculateTTSProbabilities(probs)`.
    fn tts_probabilities(&self, probs: &SummonProbabilities) -> TtsData;

    /// `calculateEliteExaltedChances(slotTierProbs)`.
    fn elite_exalted_chances(&self, slot_tier_probs: &[[f64; 4]; 12]) -> EliteExaltedChances;
}
