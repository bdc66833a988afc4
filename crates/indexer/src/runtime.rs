//! Process-wide mutable state, owned by one long-lived value instead of
//! module-level statics: worker run leases, steal reservations and the
//! shared cancellation flag.

use {
    crate::{db::Postgres, progress},
    ethrpc::RpcPool,
    std::{
        collections::HashMap,
        sync::{Arc, Mutex, atomic::{AtomicBool, Ordering}},
        time::Duration,
    },
    tokio::{sync::Notify, time::Instant},
};

pub struct IndexerRuntime {
    pub db: Postgres,
    pub rpc: Arc<RpcPool>,
    pub progress: progress::Registry,
    pub leases: LeaseTable,
    pub cancel: Cancellation,
}

impl IndexerRuntime {
    pub fn new(db: Postgres, rpc: Arc<RpcPool>) -> Self {
        Self {
            db,
            rpc,
            progress: progress::Registry::default(),
            leases: LeaseTable::default(),
            cancel: Cancellation::default(),
        }
    }
}

/// Cooperative cancellation, polled at batch and chunk boundaries.
#[derive(Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Cancellation {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }

    /// Sleeps, returning early (true) if cancelled in the meantime.
    pub async fn sleep(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_cancelled(),
            _ = self.cancelled() => true,
        }
    }
}

/// Run leases and steal reservations.
///
/// A worker holds its name's lease while a tick is in flight, which makes
/// the controller re-entrant safe. Reservations serialize concurrent
/// thieves competing for the same donor; they expire after a TTL so a
/// crashed thief cannot wedge a donor.
#[derive(Default)]
pub struct LeaseTable {
    running: Mutex<HashMap<String, ()>>,
    reservations: Mutex<HashMap<String, Instant>>,
}

pub const RESERVATION_TTL: Duration = Duration::from_secs(60);

impl LeaseTable {
    /// Takes the run lease for `name`, or `None` if a tick is already in
    /// flight. The lease is released when the guard drops.
    pub fn acquire(&self, name: &str) -> Option<RunLease<'_>> {
        let mut running = self.running.lock().unwrap();
        if running.contains_key(name) {
            return None;
        }
        running.insert(name.to_string(), ());
        Some(RunLease {
            table: self,
            name: name.to_string(),
        })
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.running.lock().unwrap().contains_key(name)
    }

    /// Atomic test-and-set of a steal reservation. An expired reservation is
    /// never respected.
    pub fn try_reserve(&self, name: &str, ttl: Duration) -> bool {
        let mut reservations = self.reservations.lock().unwrap();
        let now = Instant::now();
        match reservations.get(name) {
            Some(expiry) if *expiry > now => false,
            _ => {
                reservations.insert(name.to_string(), now + ttl);
                true
            }
        }
    }

    pub fn reservation_active(&self, name: &str) -> bool {
        let reservations = self.reservations.lock().unwrap();
        reservations
            .get(name)
            .is_some_and(|expiry| *expiry > Instant::now())
    }

    pub fn release_reservation(&self, name: &str) {
        self.reservations.lock().unwrap().remove(name);
    }

    /// Clears all leases and reservations; used by "stop all".
    pub fn clear(&self) {
        self.running.lock().unwrap().clear();
        self.reservations.lock().unwrap().clear();
    }
}

pub struct RunLease<'a> {
    table: &'a LeaseTable,
    name: String,
}

impl Drop for RunLease<'_> {
    fn drop(&mut self) {
        self.table.running.lock().unwrap().remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_lease_is_exclusive_until_dropped() {
        let table = LeaseTable::default();
        let lease = table.acquire("unified_pool_0_w0").unwrap();
        assert!(table.acquire("unified_pool_0_w0").is_none());
        assert!(table.is_running("unified_pool_0_w0"));
        // a different worker is unaffected
        assert!(table.acquire("unified_pool_0_w1").is_some());
        drop(lease);
        assert!(table.acquire("unified_pool_0_w0").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reservations_expire_after_ttl() {
        let table = LeaseTable::default();
        assert!(table.try_reserve("pve_dfk_w1", RESERVATION_TTL));
        assert!(!table.try_reserve("pve_dfk_w1", RESERVATION_TTL));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(table.try_reserve("pve_dfk_w1", RESERVATION_TTL));

        table.release_reservation("pve_dfk_w1");
        assert!(table.try_reserve("pve_dfk_w1", RESERVATION_TTL));
    }

    #[tokio::test]
    async fn cancellation_wakes_sleepers() {
        let cancel = Cancellation::default();
        assert!(!cancel.is_cancelled());
        let waiter = cancel.clone();
        let task = tokio::spawn(async move { waiter.sleep(Duration::from_secs(3600)).await });
        cancel.cancel();
        assert!(task.await.unwrap());
        assert!(cancel.is_cancelled());
    }
}
