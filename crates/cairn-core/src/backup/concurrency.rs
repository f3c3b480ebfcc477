use std::mem;
use std::sync::{Condvar, Mutex};

use crate::error::{CairnError, Result};

// ---------------------------------------------------------------------------
// ByteBudget — semaphore-style memory cap for in-flight pipeline data
// ---------------------------------------------------------------------------

/// Tracks available bytes for in-flight pipeline data.
///
/// The walk thread acquires a file's size before dispatching it to a
/// worker and the consumer releases it after committing the file, capping
/// the total encoded data held in channels to approximately `capacity`.
pub(super) struct ByteBudget {
    state: Mutex<BudgetState>,
    freed: Condvar,
}

struct BudgetState {
    available: usize,
    capacity: usize,
    poisoned: bool,
}

impl ByteBudget {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BudgetState {
                available: capacity,
                capacity,
                poisoned: false,
            }),
            freed: Condvar::new(),
        }
    }

    /// Block until `n` bytes are available, then subtract them.
    ///
    /// If `n > capacity` it is clamped, so a single file larger than the
    /// whole budget still proceeds (it just runs alone). Returns `Err`
    /// once the budget has been poisoned.
    pub(super) fn acquire(&self, n: usize) -> Result<usize> {
        let mut st = self.state.lock().unwrap();
        let n = n.min(st.capacity);
        loop {
            if st.poisoned {
                return Err(CairnError::Other("pipeline budget poisoned".into()));
            }
            if st.available >= n {
                st.available -= n;
                return Ok(n);
            }
            st = self.freed.wait(st).unwrap();
        }
    }

    /// Return `n` bytes and wake blocked acquirers.
    pub(super) fn release(&self, n: usize) {
        let mut st = self.state.lock().unwrap();
        st.available = (st.available + n).min(st.capacity);
        self.freed.notify_all();
    }

    /// Make all current and future `acquire` calls fail. Used to unwind
    /// the walk thread on terminal errors and cancellation.
    pub(super) fn poison(&self) {
        let mut st = self.state.lock().unwrap();
        st.poisoned = true;
        self.freed.notify_all();
    }
}

/// RAII guard releasing budget bytes on drop, so a worker that bails with
/// `?` cannot leak its reservation. `defuse` transfers ownership to the
/// consumer, which then releases explicitly after commit.
pub(super) struct BudgetGuard<'a> {
    budget: &'a ByteBudget,
    bytes: usize,
}

impl<'a> BudgetGuard<'a> {
    pub(super) fn from_pre_acquired(budget: &'a ByteBudget, bytes: usize) -> Self {
        Self { budget, bytes }
    }

    pub(super) fn defuse(self) -> usize {
        let bytes = self.bytes;
        mem::forget(self);
        bytes
    }
}

impl Drop for BudgetGuard<'_> {
    fn drop(&mut self) {
        if self.bytes > 0 {
            self.budget.release(self.bytes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn acquire_release_cycle() {
        let budget = ByteBudget::new(1024);
        budget.acquire(512).unwrap();
        budget.acquire(512).unwrap();
        budget.release(1024);
        budget.acquire(1024).unwrap();
    }

    #[test]
    fn blocks_until_released() {
        let budget = Arc::new(ByteBudget::new(100));
        budget.acquire(100).unwrap();

        let acquired = Arc::new(AtomicBool::new(false));
        let acquired2 = Arc::clone(&acquired);
        let budget2 = Arc::clone(&budget);
        let handle = std::thread::spawn(move || {
            budget2.acquire(50).unwrap();
            acquired2.store(true, Ordering::SeqCst);
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst), "should be blocked");

        budget.release(100);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn oversized_request_clamps_to_capacity() {
        let budget = ByteBudget::new(64);
        let got = budget.acquire(4096).unwrap();
        assert_eq!(got, 64);
        budget.release(got);
    }

    #[test]
    fn poison_unblocks_waiters() {
        let budget = Arc::new(ByteBudget::new(100));
        budget.acquire(100).unwrap();

        let budget2 = Arc::clone(&budget);
        let handle = std::thread::spawn(move || {
            assert!(budget2.acquire(50).is_err());
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        budget.poison();
        handle.join().unwrap();
        assert!(budget.acquire(1).is_err());
    }

    #[test]
    fn guard_releases_on_drop() {
        let budget = ByteBudget::new(100);
        {
            let _guard = BudgetGuard::from_pre_acquired(&budget, budget.acquire(100).unwrap());
        }
        budget.acquire(100).unwrap();
    }

    #[test]
    fn guard_defuse_transfers_ownership() {
        let budget = ByteBudget::new(100);
        let bytes = {
            let guard = BudgetGuard::from_pre_acquired(&budget, budget.acquire(80).unwrap());
            guard.defuse()
        };
        assert_eq!(bytes, 80);
        // Only 20 left until the consumer releases the defused bytes.
        budget.acquire(20).unwrap();
        budget.release(80);
        budget.acquire(80).unwrap();
    }
}
