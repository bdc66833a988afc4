//! Live, process-memory progress counters per worker.
//!
//! Nothing here is persisted; a restart rebuilds the map from checkpoints.
//! Aggregated views answer "how far along is pool 3" style questions and
//! feed the metrics endpoint.

use {
    chrono::{DateTime, Utc},
    std::{
        collections::{BTreeMap, HashMap, VecDeque},
        sync::Mutex,
        time::Duration,
    },
    tokio::time::Instant,
};

/// Throughput is measured over a rolling window this long.
const THROUGHPUT_WINDOW: Duration = Duration::from_secs(300);

#[derive(Clone, Debug, Default)]
pub struct WorkerProgress {
    pub is_running: bool,
    pub current_block: u64,
    pub target_block: u64,
    pub range_start: u64,
    pub range_end: Option<u64>,
    pub events_found: BTreeMap<String, u64>,
    pub batches_completed: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub last_batch_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl WorkerProgress {
    pub fn percent_complete(&self) -> f64 {
        let end = self.range_end.unwrap_or(self.target_block);
        if end <= self.range_start {
            return if self.current_block >= end { 100.0 } else { 0.0 };
        }
        let done = self.current_block.saturating_sub(self.range_start) as f64;
        let total = (end - self.range_start) as f64;
        (done / total * 100.0).clamp(0.0, 100.0)
    }
}

/// Aggregate view over one fleet.
#[derive(Clone, Debug, Default)]
pub struct FleetProgress {
    pub is_running: bool,
    pub workers: usize,
    pub current_block: u64,
    pub target_block: u64,
    pub events_found: BTreeMap<String, u64>,
    pub batches_completed: u64,
    pub percent_complete: f64,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
struct WorkerSlot {
    progress: WorkerProgress,
    window: VecDeque<(Instant, u64)>,
}

impl WorkerSlot {
    fn prune_window(&mut self, now: Instant) {
        while let Some((at, _)) = self.window.front() {
            if now.duration_since(*at) > THROUGHPUT_WINDOW {
                self.window.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Default)]
pub struct Registry {
    slots: Mutex<HashMap<(String, usize), WorkerSlot>>,
}

impl Registry {
    /// (Re)announces a worker, typically right after its checkpoint was read.
    pub fn init_worker(
        &self,
        fleet: &str,
        worker: usize,
        range_start: u64,
        range_end: Option<u64>,
        current_block: u64,
    ) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry((fleet.to_string(), worker)).or_default();
        slot.progress.range_start = range_start;
        slot.progress.range_end = range_end;
        slot.progress.current_block = current_block;
        slot.progress.target_block = range_end.unwrap_or(current_block);
        slot.progress.completed_at = None;
    }

    pub fn begin_batch(&self, fleet: &str, worker: usize) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry((fleet.to_string(), worker)).or_default();
        slot.progress.is_running = true;
        slot.progress.started_at.get_or_insert_with(Utc::now);
        slot.progress.last_error = None;
    }

    /// Records a finished batch and feeds the throughput window.
    pub fn record_batch(
        &self,
        fleet: &str,
        worker: usize,
        current_block: u64,
        target_block: u64,
        events: &BTreeMap<String, u64>,
    ) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry((fleet.to_string(), worker)).or_default();
        let blocks = current_block.saturating_sub(slot.progress.current_block);
        slot.progress.is_running = false;
        slot.progress.current_block = current_block;
        slot.progress.target_block = target_block;
        slot.progress.batches_completed += 1;
        slot.progress.last_batch_at = Some(Utc::now());
        for (kind, count) in events {
            *slot.progress.events_found.entry(kind.clone()).or_default() += count;
        }
        let now = Instant::now();
        slot.window.push_back((now, blocks));
        slot.prune_window(now);
    }

    pub fn mark_complete(&self, fleet: &str, worker: usize) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry((fleet.to_string(), worker)).or_default();
        slot.progress.is_running = false;
        slot.progress.completed_at.get_or_insert_with(Utc::now);
    }

    pub fn mark_error(&self, fleet: &str, worker: usize, message: &str) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry((fleet.to_string(), worker)).or_default();
        slot.progress.is_running = false;
        slot.progress.last_error = Some(message.to_string());
    }

    /// Applies a steal: the worker continues on a new range.
    pub fn set_range(&self, fleet: &str, worker: usize, range_start: u64, range_end: Option<u64>) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry((fleet.to_string(), worker)).or_default();
        slot.progress.range_start = range_start;
        slot.progress.range_end = range_end;
        slot.progress.current_block = range_start;
        slot.progress.completed_at = None;
    }

    pub fn worker(&self, fleet: &str, worker: usize) -> Option<WorkerProgress> {
        let slots = self.slots.lock().unwrap();
        slots
            .get(&(fleet.to_string(), worker))
            .map(|slot| slot.progress.clone())
    }

    /// Estimated time to target from the rolling throughput window.
    pub fn eta(&self, fleet: &str, worker: usize) -> Option<Duration> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(&(fleet.to_string(), worker))?;
        slot.prune_window(Instant::now());
        let (first, _) = slot.window.front()?;
        let elapsed = slot.window.back()?.0.duration_since(*first);
        let blocks: u64 = slot.window.iter().map(|(_, blocks)| blocks).sum();
        if blocks == 0 || elapsed.is_zero() {
            return None;
        }
        let per_second = blocks as f64 / elapsed.as_secs_f64();
        let remaining = slot
            .progress
            .target_block
            .saturating_sub(slot.progress.current_block);
        Some(Duration::from_secs_f64(remaining as f64 / per_second))
    }

    /// Aggregation over one fleet: `is_running` if any worker runs, block
    /// cursors are maxima, counters sum, percent is the plain mean, and the
    /// fleet is complete only once every worker is.
    pub fn fleet(&self, fleet: &str) -> FleetProgress {
        let slots = self.slots.lock().unwrap();
        let workers: Vec<&WorkerSlot> = slots
            .iter()
            .filter(|((name, _), _)| name == fleet)
            .map(|(_, slot)| slot)
            .collect();
        if workers.is_empty() {
            return FleetProgress::default();
        }
        let mut aggregate = FleetProgress {
            workers: workers.len(),
            ..Default::default()
        };
        let mut percent_sum = 0.0;
        let mut completed_at = Some(DateTime::<Utc>::MIN_UTC);
        for slot in &workers {
            let progress = &slot.progress;
            aggregate.is_running |= progress.is_running;
            aggregate.current_block = aggregate.current_block.max(progress.current_block);
            aggregate.target_block = aggregate.target_block.max(progress.target_block);
            aggregate.batches_completed += progress.batches_completed;
            for (kind, count) in &progress.events_found {
                *aggregate.events_found.entry(kind.clone()).or_default() += count;
            }
            percent_sum += progress.percent_complete();
            completed_at = match (completed_at, progress.completed_at) {
                (Some(so_far), Some(at)) => Some(so_far.max(at)),
                _ => None,
            };
        }
        aggregate.percent_complete = percent_sum / workers.len() as f64;
        aggregate.completed_at = completed_at;
        aggregate
    }

    /// Forgets everything; used by "stop all".
    pub fn clear(&self) {
        self.slots.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use {super::*, maplit::btreemap};

    #[test]
    fn percent_complete_is_clamped() {
        let progress = WorkerProgress {
            range_start: 1000,
            range_end: Some(3000),
            current_block: 2000,
            ..Default::default()
        };
        assert_eq!(progress.percent_complete(), 50.0);

        let overshot = WorkerProgress {
            range_start: 1000,
            range_end: Some(3000),
            current_block: 9000,
            ..Default::default()
        };
        assert_eq!(overshot.percent_complete(), 100.0);

        let head_tracker = WorkerProgress {
            range_start: 0,
            range_end: None,
            target_block: 200,
            current_block: 100,
            ..Default::default()
        };
        assert_eq!(head_tracker.percent_complete(), 50.0);
    }

    #[test]
    fn fleet_aggregation_rules() {
        let registry = Registry::default();
        registry.init_worker("unified_pool_0", 0, 0, Some(1000), 0);
        registry.init_worker("unified_pool_0", 1, 1000, Some(2000), 1000);

        registry.begin_batch("unified_pool_0", 0);
        registry.record_batch(
            "unified_pool_0",
            0,
            500,
            1000,
            &btreemap! {"deposit".to_string() => 3},
        );
        registry.begin_batch("unified_pool_0", 1);
        registry.record_batch(
            "unified_pool_0",
            1,
            2000,
            2000,
            &btreemap! {"deposit".to_string() => 2, "swap".to_string() => 5},
        );

        let fleet = registry.fleet("unified_pool_0");
        assert_eq!(fleet.workers, 2);
        assert!(!fleet.is_running);
        assert_eq!(fleet.current_block, 2000);
        assert_eq!(fleet.events_found["deposit"], 5);
        assert_eq!(fleet.events_found["swap"], 5);
        assert_eq!(fleet.batches_completed, 2);
        // (50 + 100) / 2
        assert_eq!(fleet.percent_complete, 75.0);
        // not complete until every worker is
        assert_eq!(fleet.completed_at, None);

        registry.mark_complete("unified_pool_0", 0);
        registry.mark_complete("unified_pool_0", 1);
        assert!(registry.fleet("unified_pool_0").completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn eta_from_rolling_window() {
        let registry = Registry::default();
        registry.init_worker("pve_dfk", 0, 0, Some(1_000_000), 0);
        registry.record_batch("pve_dfk", 0, 100_000, 1_000_000, &BTreeMap::new());
        tokio::time::advance(Duration::from_secs(100)).await;
        registry.record_batch("pve_dfk", 0, 200_000, 1_000_000, &BTreeMap::new());

        // 200k blocks in 100s -> 2000 blocks/s, 800k remaining -> 400s
        let eta = registry.eta("pve_dfk", 0).unwrap();
        assert_eq!(eta.as_secs(), 400);

        // a single stale sample gives no estimate
        tokio::time::advance(Duration::from_secs(400)).await;
        assert!(registry.eta("pve_dfk", 0).is_none());
    }

    #[test]
    fn error_and_clear() {
        let registry = Registry::default();
        registry.begin_batch("gardening_dfk", 0);
        registry.mark_error("gardening_dfk", 0, "rpc_failed");
        let progress = registry.worker("gardening_dfk", 0).unwrap();
        assert!(!progress.is_running);
        assert_eq!(progress.last_error.as_deref(), Some("rpc_failed"));

        registry.clear();
        assert!(registry.worker("gardening_dfk", 0).is_none());
    }
}
