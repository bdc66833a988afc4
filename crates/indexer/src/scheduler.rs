//! Periodic triggers with overlap suppression.
//!
//! Each registered indexer gets a loop that fires its tick on a fixed
//! interval. A tick that is still running when the next interval elapses is
//! simply skipped; suppression is a compare-and-swap on a per-trigger
//! in-flight flag, so a manual one-shot run and the periodic trigger can
//! never overlap either.

use {
    crate::runtime::Cancellation,
    chrono::{DateTime, Utc},
    futures::future::BoxFuture,
    std::{
        collections::HashMap,
        sync::{
            Arc, Mutex,
            atomic::{AtomicBool, AtomicU64, Ordering},
        },
        time::Duration,
    },
    tokio::task::JoinHandle,
};

type Tick = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Trigger {
    tick: Tick,
    in_flight: Arc<AtomicBool>,
    last_run_at: Arc<Mutex<Option<DateTime<Utc>>>>,
    runs_completed: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

#[derive(Clone, Debug)]
pub struct TriggerStatus {
    pub in_flight: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub runs_completed: u64,
}

#[derive(Default)]
pub struct Scheduler {
    triggers: Mutex<HashMap<String, Trigger>>,
}

impl Scheduler {
    /// Registers a periodic trigger. Replaces an existing one of the same
    /// name (the old loop is stopped).
    pub fn register<F, Fut>(&self, name: &str, interval: Duration, cancel: Cancellation, tick: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let tick: Tick = Arc::new(move || Box::pin(tick()));
        let in_flight = Arc::new(AtomicBool::new(false));
        let last_run_at = Arc::new(Mutex::new(None));
        let runs_completed = Arc::new(AtomicU64::new(0));

        let task = {
            let tick = Arc::clone(&tick);
            let in_flight = Arc::clone(&in_flight);
            let last_run_at = Arc::clone(&last_run_at);
            let runs_completed = Arc::clone(&runs_completed);
            let name = name.to_string();
            tokio::spawn(async move {
                loop {
                    if cancel.sleep(interval).await {
                        return;
                    }
                    run_guarded(&name, &tick, &in_flight, &last_run_at, &runs_completed).await;
                }
            })
        };

        let trigger = Trigger {
            tick,
            in_flight,
            last_run_at,
            runs_completed,
            task,
        };
        if let Some(previous) = self
            .triggers
            .lock()
            .unwrap()
            .insert(name.to_string(), trigger)
        {
            previous.task.abort();
        }
    }

    /// Manual one-shot run, honoring overlap suppression. Returns false when
    /// a tick was already in flight.
    pub async fn run_once(&self, name: &str) -> Option<bool> {
        let (tick, in_flight, last_run_at, runs_completed) = {
            let triggers = self.triggers.lock().unwrap();
            let trigger = triggers.get(name)?;
            (
                Arc::clone(&trigger.tick),
                Arc::clone(&trigger.in_flight),
                Arc::clone(&trigger.last_run_at),
                Arc::clone(&trigger.runs_completed),
            )
        };
        Some(run_guarded(name, &tick, &in_flight, &last_run_at, &runs_completed).await)
    }

    pub fn status(&self, name: &str) -> Option<TriggerStatus> {
        let triggers = self.triggers.lock().unwrap();
        let trigger = triggers.get(name)?;
        Some(TriggerStatus {
            in_flight: trigger.in_flight.load(Ordering::SeqCst),
            last_run_at: *trigger.last_run_at.lock().unwrap(),
            runs_completed: trigger.runs_completed.load(Ordering::SeqCst),
        })
    }

    /// Stops one trigger's loop.
    pub fn stop(&self, name: &str) {
        if let Some(trigger) = self.triggers.lock().unwrap().remove(name) {
            trigger.task.abort();
        }
    }

    /// Stops every registered trigger.
    pub fn stop_all(&self) {
        for (_, trigger) in self.triggers.lock().unwrap().drain() {
            trigger.task.abort();
        }
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<_> = self.triggers.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }
}

async fn run_guarded(
    name: &str,
    tick: &Tick,
    in_flight: &AtomicBool,
    last_run_at: &Mutex<Option<DateTime<Utc>>>,
    runs_completed: &AtomicU64,
) -> bool {
    if in_flight
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        tracing::debug!(trigger = name, "tick still in flight, skipping");
        return false;
    }
    tick().await;
    *last_run_at.lock().unwrap() = Some(Utc::now());
    runs_completed.fetch_add(1, Ordering::SeqCst);
    in_flight.store(false, Ordering::SeqCst);
    true
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::AtomicUsize,
    };

    #[tokio::test(start_paused = true)]
    async fn fires_on_interval_until_stopped() {
        let scheduler = Scheduler::default();
        let cancel = Cancellation::default();
        let runs = Arc::new(AtomicUsize::new(0));
        {
            let runs = Arc::clone(&runs);
            scheduler.register("unified_pool_0", Duration::from_secs(60), cancel.clone(), move || {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        tokio::time::sleep(Duration::from_secs(185)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.status("unified_pool_0").unwrap().runs_completed, 3);

        scheduler.stop("unified_pool_0");
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(scheduler.status("unified_pool_0").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_suppressed() {
        let scheduler = Scheduler::default();
        let cancel = Cancellation::default();
        let concurrent = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        {
            let concurrent = Arc::clone(&concurrent);
            let peak = Arc::clone(&peak);
            scheduler.register("pve_dfk", Duration::from_secs(10), cancel.clone(), move || {
                let concurrent = Arc::clone(&concurrent);
                let peak = Arc::clone(&peak);
                async move {
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    // a tick three intervals long
                    tokio::time::sleep(Duration::from_secs(35)).await;
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }
        // a manual run during an in-flight tick is suppressed too
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert_eq!(scheduler.run_once("pve_dfk").await, Some(false));

        tokio::time::sleep(Duration::from_secs(108)).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn manual_run_respects_suppression() {
        let scheduler = Scheduler::default();
        let cancel = Cancellation::default();
        scheduler.register("bargain", Duration::from_secs(3600), cancel, || async {});
        assert_eq!(scheduler.run_once("bargain").await, Some(true));
        assert_eq!(scheduler.status("bargain").unwrap().runs_completed, 1);
        assert_eq!(scheduler.run_once("missing").await, None);
    }
}
