//! Fleet supervision: launching `N` staggered workers per pool/chain and
//! the RPC failsafe that steps the fleet size down when launches keep
//! failing.

use {
    crate::{
        families::LogIndexer,
        runtime::IndexerRuntime,
        worker::Worker,
    },
    anyhow::Result,
    std::{future::Future, sync::Arc, time::Duration},
    tokio::task::JoinHandle,
};

/// Wait between a teardown and the retry with one worker less.
const RETRY_DELAY: Duration = Duration::from_secs(3);
/// Consecutive launch failures that trigger the down-step.
const MAX_CONSECUTIVE_FAILURES: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    /// The chain head probe failed even after retry; nothing was launched.
    #[error("rpc_failed: {0:#}")]
    RpcFailed(anyhow::Error),
    /// Launches kept failing all the way down to the minimum fleet size.
    #[error("fleet launch failed at minimum worker count {minimum}")]
    Exhausted { minimum: usize },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Clone, Copy, Debug)]
pub struct FleetConfig {
    /// Target worker count.
    pub workers: usize,
    /// The failsafe never steps below this.
    pub min_workers: usize,
    /// Controller wake-up interval per worker.
    pub interval: Duration,
}

pub struct FleetHandle {
    pub fleet_key: String,
    /// Worker count actually achieved after failsafe down-steps.
    pub effective_workers: usize,
    tasks: Vec<JoinHandle<()>>,
}

impl FleetHandle {
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Launches the fleet for one indexer scope: reads the chain head, divides
/// `[genesis, head]` into equal ranges (the last worker tails the head), and
/// spawns one controller loop per worker with staggered start offsets to
/// spread RPC load.
pub async fn launch(
    runtime: Arc<IndexerRuntime>,
    indexer: Arc<dyn LogIndexer>,
    config: FleetConfig,
) -> Result<FleetHandle, FleetError> {
    let head = runtime
        .rpc
        .current_block(indexer.chain_id())
        .await
        .map_err(FleetError::RpcFailed)?;
    let genesis = indexer.genesis_block();
    let fleet_key = format!("{}_{}", indexer.indexer_type(), indexer.scope());

    let launch_one = |index: usize, fleet_size: usize| {
        let runtime = Arc::clone(&runtime);
        let indexer = Arc::clone(&indexer);
        async move {
            let (range_start, range_end) = worker_range(genesis, head, index, fleet_size);
            let worker = Worker::new(Arc::clone(&runtime), indexer, index);
            worker.register(range_start, range_end).await?;
            Ok(spawn_controller(runtime, worker, index, fleet_size, config.interval))
        }
    };
    let tasks = launch_with_failsafe(
        config.workers,
        config.min_workers,
        RETRY_DELAY,
        launch_one,
        |tasks: &mut Vec<JoinHandle<()>>| {
            for task in tasks.drain(..) {
                task.abort();
            }
        },
    )
    .await?;

    tracing::info!(
        fleet = %fleet_key,
        target = config.workers,
        effective = tasks.len(),
        head,
        "fleet launched"
    );
    Ok(FleetHandle {
        fleet_key,
        effective_workers: tasks.len(),
        tasks,
    })
}

/// Equal division of `[genesis, head]`; the last worker gets
/// `range_end = None` and tails the chain head forever.
pub(crate) fn worker_range(genesis: u64, head: u64, index: usize, fleet_size: usize) -> (u64, Option<u64>) {
    let span = (head.saturating_sub(genesis) + 1) / fleet_size as u64;
    let start = genesis + span * index as u64;
    let end = if index + 1 == fleet_size {
        None
    } else {
        Some(genesis + span * (index as u64 + 1) - 1)
    };
    (start, end)
}

fn spawn_controller(
    runtime: Arc<IndexerRuntime>,
    worker: Worker,
    index: usize,
    fleet_size: usize,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // staggered start: worker i waits i/N of an interval
        let offset = interval.mul_f64(index as f64 / fleet_size as f64);
        if runtime.cancel.sleep(offset).await {
            return;
        }
        loop {
            if let Err(err) = worker.tick().await {
                tracing::warn!(worker = %worker.name(), ?err, "tick failed");
            }
            if runtime.cancel.sleep(interval).await {
                return;
            }
        }
    })
}

/// The failsafe proper, factored out of the IO so it can be exercised
/// directly: launches `target` workers; after two consecutive per-worker
/// failures everything launched so far is torn down and the whole fleet
/// retries with one worker less, until `minimum`.
async fn launch_with_failsafe<H, F, Fut>(
    target: usize,
    minimum: usize,
    retry_delay: Duration,
    mut launch: F,
    mut teardown: impl FnMut(&mut Vec<H>),
) -> Result<Vec<H>, FleetError>
where
    F: FnMut(usize, usize) -> Fut,
    Fut: Future<Output = Result<H>>,
{
    let mut fleet_size = target.max(minimum);
    'attempt: loop {
        let mut handles = Vec::with_capacity(fleet_size);
        let mut consecutive_failures = 0;
        for index in 0..fleet_size {
            match launch(index, fleet_size).await {
                Ok(handle) => {
                    handles.push(handle);
                    consecutive_failures = 0;
                }
                Err(err) => {
                    consecutive_failures += 1;
                    tracing::warn!(index, fleet_size, ?err, "worker launch failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        teardown(&mut handles);
                        if fleet_size > minimum {
                            tracing::warn!(
                                from = fleet_size,
                                to = fleet_size - 1,
                                "repeated launch failures, stepping fleet size down"
                            );
                            tokio::time::sleep(retry_delay).await;
                            fleet_size -= 1;
                            continue 'attempt;
                        }
                        return Err(FleetError::Exhausted { minimum });
                    }
                }
            }
        }
        return Ok(handles);
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::{
            Mutex,
            atomic::{AtomicUsize, Ordering},
        },
    };

    #[test]
    fn ranges_partition_history() {
        let ranges: Vec<_> = (0..4).map(|i| worker_range(0, 40_000_000, i, 4)).collect();
        assert_eq!(ranges[0], (0, Some(9_999_999)));
        assert_eq!(ranges[1], (10_000_000, Some(19_999_999)));
        assert_eq!(ranges[2], (20_000_000, Some(29_999_999)));
        // the tail worker tracks the head
        assert_eq!(ranges[3], (30_000_000, None));
    }

    #[test]
    fn harmony_ranges_start_at_genesis() {
        let (start, end) = worker_range(16_350_000, 16_350_009, 0, 5);
        assert_eq!((start, end), (16_350_000, Some(16_350_001)));
        let (start, end) = worker_range(16_350_000, 16_350_009, 4, 5);
        assert_eq!((start, end), (16_350_008, None));
    }

    #[tokio::test(start_paused = true)]
    async fn failsafe_steps_down_to_minimum() {
        // workers 2 and 3 always fail: 5 -> 4 -> 3, which succeeds because a
        // 3-worker fleet never reaches index 3
        let teardowns = Mutex::new(Vec::new());
        let launches = AtomicUsize::new(0);
        let handles = launch_with_failsafe(
            5,
            3,
            Duration::from_secs(3),
            |index, fleet_size| {
                launches.fetch_add(1, Ordering::SeqCst);
                async move {
                    if index == 2 && fleet_size > 3 {
                        anyhow::bail!("socket hang up");
                    }
                    if index == 3 {
                        anyhow::bail!("socket hang up");
                    }
                    Ok(index)
                }
            },
            |handles| teardowns.lock().unwrap().push(handles.len()),
        )
        .await
        .unwrap();
        assert_eq!(handles, vec![0, 1, 2]);
        // torn down twice: at size 5 (w2+w3 fail) and size 4 (w2+w3 fail)
        assert_eq!(*teardowns.lock().unwrap(), vec![2, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn failsafe_gives_up_at_minimum() {
        // already at the minimum size, so repeated failures cannot step down
        let result = launch_with_failsafe(
            3,
            3,
            Duration::from_secs(3),
            |_, _| async { anyhow::bail!("connection reset") },
            |_: &mut Vec<()>| {},
        )
        .await;
        assert!(matches!(result, Err(FleetError::Exhausted { minimum: 3 })));
    }

    #[tokio::test]
    async fn single_failures_do_not_step_down() {
        // worker 1 fails once; no two consecutive failures, fleet stays at 4
        let handles = launch_with_failsafe(
            4,
            3,
            Duration::from_millis(1),
            |index, _| async move {
                if index == 1 {
                    anyhow::bail!("timeout");
                }
                Ok(index)
            },
            |_: &mut Vec<usize>| panic!("no teardown expected"),
        )
        .await
        .unwrap();
        assert_eq!(handles, vec![0, 2, 3]);
    }
}
