// ==========================================
// Per-assignment exclusive locks for remediation commits
// ==========================================
// A commit names every assignment it supersedes and takes all of them
// at once, so two commits touching the same assignment serialize and
// commits on disjoint assignments proceed in parallel. Acquiring the
// whole set in one step rules out lock-order deadlocks.
// ==========================================

use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub struct AssignmentLocks {
    held: Mutex<BTreeSet<String>>,
    released: Condvar,
}

impl AssignmentLocks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Wait until every id is free, then hold them all.
    ///
    /// Returns None when `timeout` elapses first or the lock table is poisoned.
    pub fn acquire(self: &Arc<Self>, ids: &[String], timeout: Duration) -> Option<AssignmentLockGuard> {
        let wanted: BTreeSet<String> = ids.iter().cloned().collect();
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().ok()?;

        while wanted.iter().any(|id| held.contains(id)) {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(ids = ?wanted, "assignment lock wait timed out");
                return None;
            }
            let (guard, _) = self.released.wait_timeout(held, deadline - now).ok()?;
            held = guard;
        }

        held.extend(wanted.iter().cloned());
        Some(AssignmentLockGuard {
            locks: Arc::clone(self),
            ids: wanted,
        })
    }

    pub fn is_held(&self, id: &str) -> bool {
        self.held.lock().map(|h| h.contains(id)).unwrap_or(false)
    }
}

/// Releases its ids on drop.
#[derive(Debug)]
pub struct AssignmentLockGuard {
    locks: Arc<AssignmentLocks>,
    ids: BTreeSet<String>,
}

impl AssignmentLockGuard {
    pub fn ids(&self) -> impl Iterator<Item = &String> {
        self.ids.iter()
    }
}

impl Drop for AssignmentLockGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.locks.held.lock() {
            for id in &self.ids {
                held.remove(id);
            }
        }
        self.locks.released.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_disjoint_sets_do_not_block() {
        let locks = AssignmentLocks::new();
        let a = locks.acquire(&ids(&["A1", "A2"]), Duration::from_millis(10)).unwrap();
        let b = locks.acquire(&ids(&["B1"]), Duration::from_millis(10)).unwrap();
        assert!(locks.is_held("A1") && locks.is_held("B1"));
        drop(a);
        drop(b);
        assert!(!locks.is_held("A1"));
    }

    #[test]
    fn test_overlapping_set_times_out() {
        let locks = AssignmentLocks::new();
        let _held = locks.acquire(&ids(&["A1"]), Duration::from_millis(10)).unwrap();
        assert!(locks.acquire(&ids(&["A2", "A1"]), Duration::from_millis(20)).is_none());
        // nothing partially taken
        assert!(!locks.is_held("A2"));
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let locks = AssignmentLocks::new();
        let held = locks.acquire(&ids(&["A1"]), Duration::from_millis(10)).unwrap();
        let waiter = {
            let locks = locks.clone();
            thread::spawn(move || locks.acquire(&ids(&["A1"]), Duration::from_secs(5)).is_some())
        };
        thread::sleep(Duration::from_millis(20));
        drop(held);
        assert!(waiter.join().unwrap());
    }
}
