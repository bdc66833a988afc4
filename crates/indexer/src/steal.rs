//! Work stealing between fleet siblings.
//!
//! Without it, a worker that drew a quiet quarter of history finishes early
//! and idles while a sibling keeps grinding for days. A finished worker asks
//! the arbiter for the sibling with the most unindexed blocks, halves that
//! sibling's remaining range and takes the upper half.

use {
    crate::{
        db::{to_i64, to_u64},
        runtime::{IndexerRuntime, RESERVATION_TTL},
    },
    anyhow::{Context, Result},
    database::checkpoints::{Checkpoint, IndexerStatus},
};

/// A range below this is not worth splitting.
pub const MIN_STEAL: u64 = 500_000;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StealOutcome {
    pub donor: String,
    pub new_donor_end: u64,
    pub thief_range_start: u64,
    pub thief_range_end: u64,
    pub blocks_stolen: u64,
}

/// What the arbiter needs to know about a sibling.
#[derive(Clone, Debug)]
struct DonorView {
    name: String,
    /// `range_end ?? chain head` for tail workers.
    target: u64,
    remaining: u64,
}

fn donor_candidates(
    siblings: &[Checkpoint],
    thief: &str,
    chain_head: u64,
    reserved: impl Fn(&str) -> bool,
) -> Vec<DonorView> {
    siblings
        .iter()
        .filter(|sibling| sibling.indexer_name != thief)
        .filter(|sibling| sibling.status != IndexerStatus::Complete)
        .filter(|sibling| !reserved(&sibling.indexer_name))
        .filter_map(|sibling| {
            let target = sibling
                .range_end
                .map(|end| to_u64(end).ok())
                .unwrap_or(Some(chain_head))?;
            let current = to_u64(sibling.last_indexed_block).ok()?;
            let remaining = target.saturating_sub(current);
            (remaining >= 2 * MIN_STEAL).then_some(DonorView {
                name: sibling.indexer_name.clone(),
                target,
                remaining,
            })
        })
        .collect()
}

/// Splits a donor's remainder: the thief takes the upper half. `None` when
/// the half is below the steal minimum.
fn split(donor: &DonorView) -> Option<StealOutcome> {
    let stolen = donor.remaining / 2;
    if stolen < MIN_STEAL {
        return None;
    }
    let new_donor_end = donor.target - stolen;
    Some(StealOutcome {
        donor: donor.name.clone(),
        new_donor_end,
        thief_range_start: new_donor_end + 1,
        thief_range_end: donor.target,
        blocks_stolen: donor.target - (new_donor_end + 1),
    })
}

/// Finds, reserves and executes a steal for `thief`. On success the donor's
/// range has been shrunk and the thief's checkpoint reassigned; the
/// reservation on the donor is still held and MUST be released by the
/// caller once it observed the outcome.
pub async fn find_work_to_steal(
    runtime: &IndexerRuntime,
    indexer_type: &str,
    scope: &str,
    thief: &str,
    chain_head: u64,
) -> Result<Option<StealOutcome>> {
    let mut ex = runtime.db.pool.acquire().await?;
    let siblings = database::checkpoints::fetch_fleet(&mut ex, indexer_type, scope)
        .await
        .context("fetch fleet checkpoints")?;
    let candidates = donor_candidates(&siblings, thief, chain_head, |name| {
        runtime.leases.reservation_active(name)
    });
    let Some(best) = candidates.into_iter().max_by_key(|donor| donor.remaining) else {
        return Ok(None);
    };

    // serialize against other thieves eyeing the same donor
    if !runtime.leases.try_reserve(&best.name, RESERVATION_TTL) {
        return Ok(None);
    }
    let Some(outcome) = split(&best) else {
        runtime.leases.release_reservation(&best.name);
        return Ok(None);
    };

    // Shrink the donor first, then reassign the thief. If we crash in
    // between, the reservation TTL unblocks the donor and the next steal
    // attempt observes consistent ranges.
    let shrunk = database::checkpoints::shrink_range_end(
        &mut ex,
        &outcome.donor,
        to_i64(outcome.new_donor_end)?,
    )
    .await
    .context("shrink donor range")?;
    if !shrunk {
        // the donor raced past the split point
        runtime.leases.release_reservation(&best.name);
        return Ok(None);
    }
    database::checkpoints::reassign_range(
        &mut ex,
        thief,
        to_i64(outcome.thief_range_start)?,
        Some(to_i64(outcome.thief_range_end)?),
    )
    .await
    .context("reassign thief range")?;

    tracing::info!(
        thief,
        donor = %outcome.donor,
        new_donor_end = outcome.new_donor_end,
        blocks_stolen = outcome.blocks_stolen,
        "stole work from sibling"
    );
    Ok(Some(outcome))
}

#[cfg(test)]
mod tests {
    use {super::*, chrono::Utc};

    fn checkpoint(name: &str, current: u64, end: Option<u64>, status: IndexerStatus) -> Checkpoint {
        Checkpoint {
            indexer_name: name.to_string(),
            indexer_type: "pve".to_string(),
            scope: "dfk".to_string(),
            lp_token: None,
            range_start: 0,
            range_end: end.map(|end| i64::try_from(end).unwrap()),
            last_indexed_block: i64::try_from(current).unwrap(),
            total_events_indexed: 0,
            status,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn picks_sibling_with_most_remaining() {
        let siblings = vec![
            checkpoint("w0", 10_000_000, Some(10_000_000), IndexerStatus::Complete),
            checkpoint("w1", 15_000_000, Some(50_000_000), IndexerStatus::Idle),
            checkpoint("w2", 55_000_000, Some(60_000_000), IndexerStatus::Idle),
        ];
        let candidates = donor_candidates(&siblings, "w0", 60_000_000, |_| false);
        // w0 is the thief, w2 has less than 2 * MIN_STEAL remaining
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "w1");
        assert_eq!(candidates[0].remaining, 35_000_000);

        let outcome = split(&candidates[0]).unwrap();
        assert_eq!(
            outcome,
            StealOutcome {
                donor: "w1".to_string(),
                new_donor_end: 32_500_000,
                thief_range_start: 32_500_001,
                thief_range_end: 50_000_000,
                blocks_stolen: 17_499_999,
            }
        );
    }

    #[test]
    fn tail_worker_measured_against_chain_head() {
        let siblings = vec![checkpoint("w1", 1_000_000, None, IndexerStatus::Idle)];
        let candidates = donor_candidates(&siblings, "w0", 9_000_000, |_| false);
        assert_eq!(candidates[0].remaining, 8_000_000);
        assert_eq!(candidates[0].target, 9_000_000);
    }

    #[test]
    fn respects_reservations_and_completion() {
        let siblings = vec![
            checkpoint("w1", 0, Some(50_000_000), IndexerStatus::Idle),
            checkpoint("w2", 0, Some(50_000_000), IndexerStatus::Complete),
        ];
        assert!(donor_candidates(&siblings, "w0", 0, |_| true).is_empty());
        let unreserved = donor_candidates(&siblings, "w0", 0, |_| false);
        assert_eq!(unreserved.len(), 1);
        assert_eq!(unreserved[0].name, "w1");
    }

    #[test]
    fn small_remainders_are_not_split() {
        let donor = DonorView {
            name: "w1".to_string(),
            target: 1_500_000,
            remaining: 999_999,
        };
        assert!(split(&donor).is_none());
    }
}
