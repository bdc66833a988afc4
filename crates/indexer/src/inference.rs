//! Base drop-rate inference from observed PvE completions.
//!
//! Observed drop rates are inflated by party luck and pet scavenger bonuses.
//! The linear adjustment `base = observed - 0.0002 * luck - scavenger / 100`
//! strips both out; the Wilson interval quantifies how much the observation
//! itself can be trusted.

use {
    crate::db::Postgres,
    anyhow::{Context, Result},
    database::byte_array::ByteArray,
};

/// Drop-rate contribution per point of party luck.
const LUCK_COEFFICIENT: f64 = 0.0002;
/// 95% confidence.
const WILSON_Z: f64 = 1.96;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DropRateReport {
    pub total_drops: i64,
    pub total_completions: i64,
    pub avg_party_luck: f64,
    pub avg_scavenger_bonus_pct: f64,
    pub observed_rate: f64,
    pub luck_contribution: f64,
    pub scavenger_bonus_value: f64,
    pub calculated_base_rate: f64,
    pub confidence_lower: f64,
    pub confidence_upper: f64,
}

/// Wilson score interval around observed proportion `p` over `n` trials,
/// clamped to `[0, 1]`.
pub fn wilson_interval(p: f64, n: f64, z: f64) -> (f64, f64) {
    if n <= 0.0 {
        return (0.0, 1.0);
    }
    let z2 = z * z;
    let denominator = 1.0 + z2 / n;
    let center = (p + z2 / (2.0 * n)) / denominator;
    let margin = z * ((p * (1.0 - p) + z2 / (4.0 * n)) / n).sqrt() / denominator;
    ((center - margin).max(0.0), (center + margin).min(1.0))
}

/// Pure core of the inference. Returns `None` when there are no completions
/// to infer from.
pub fn compute(
    total_drops: i64,
    total_completions: i64,
    avg_party_luck: f64,
    avg_scavenger_bonus_pct: f64,
) -> Option<DropRateReport> {
    if total_completions == 0 {
        return None;
    }
    let observed_rate = total_drops as f64 / total_completions as f64;
    let luck_contribution = LUCK_COEFFICIENT * avg_party_luck;
    let scavenger_bonus_value = avg_scavenger_bonus_pct / 100.0;
    let calculated_base_rate = (observed_rate - luck_contribution - scavenger_bonus_value).max(0.0);
    let (confidence_lower, confidence_upper) =
        wilson_interval(observed_rate, total_completions as f64, WILSON_Z);
    Some(DropRateReport {
        total_drops,
        total_completions,
        avg_party_luck,
        avg_scavenger_bonus_pct,
        observed_rate,
        luck_contribution,
        scavenger_bonus_value,
        calculated_base_rate,
        confidence_lower,
        confidence_upper,
    })
}

/// Infers the base drop rate of `item` in `activity`, optionally restricted
/// to completions with one specific scavenger bonus tier.
pub async fn infer_drop_rate(
    db: &Postgres,
    chain_id: u64,
    activity_id: i64,
    item_address: [u8; 20],
    scavenger_bonus_pct: Option<f64>,
) -> Result<Option<DropRateReport>> {
    let mut ex = db.pool.acquire().await?;
    let chain_id = i64::try_from(chain_id).context("chain id exceeds i64")?;
    let completions = database::pve_completions::count(
        &mut ex,
        chain_id,
        activity_id,
        scavenger_bonus_pct,
    )
    .await
    .context("count completions")?;
    let aggregates = database::pve_rewards::drop_aggregates(
        &mut ex,
        chain_id,
        activity_id,
        &ByteArray(item_address),
        scavenger_bonus_pct,
    )
    .await
    .context("aggregate drops")?;
    Ok(compute(
        aggregates.drops,
        completions,
        aggregates.avg_party_luck.unwrap_or(0.0),
        aggregates.avg_scavenger_bonus_pct.unwrap_or(0.0),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_completions_yields_nothing() {
        assert_eq!(compute(0, 0, 0.0, 0.0), None);
    }

    #[test]
    fn luck_and_scavenger_adjustments() {
        // 375 drops over 2500 completions at 600 avg luck and 15% scavenger
        let report = compute(375, 2500, 600.0, 15.0).unwrap();
        assert!((report.observed_rate - 0.15).abs() < 1e-12);
        assert!((report.luck_contribution - 0.12).abs() < 1e-12);
        assert!((report.scavenger_bonus_value - 0.15).abs() < 1e-12);
        // observed is fully explained by luck and scavenger, floor kicks in
        assert_eq!(report.calculated_base_rate, 0.0);
        assert!((report.confidence_lower - 0.136).abs() < 0.002);
        assert!((report.confidence_upper - 0.165).abs() < 0.002);
    }

    #[test]
    fn base_rate_never_negative() {
        for (drops, completions, luck, scavenger) in
            [(1, 1000, 5000.0, 0.0), (0, 10, 0.0, 25.0), (5, 10, 100.0, 99.0)]
        {
            let report = compute(drops, completions, luck, scavenger).unwrap();
            assert!(report.calculated_base_rate >= 0.0);
        }
    }

    #[test]
    fn wilson_reduces_to_standard_formula() {
        let (lower, upper) = wilson_interval(0.5, 100.0, 1.96);
        // textbook values for p=0.5, n=100
        assert!((lower - 0.404).abs() < 0.002);
        assert!((upper - 0.596).abs() < 0.002);

        // degenerate cases stay clamped
        let (lower, upper) = wilson_interval(0.0, 10.0, 1.96);
        assert_eq!(lower, 0.0);
        assert!(upper > 0.0 && upper < 1.0);
        let (lower, upper) = wilson_interval(1.0, 10.0, 1.96);
        assert!(lower > 0.0 && lower < 1.0);
        assert_eq!(upper, 1.0);
    }
}
