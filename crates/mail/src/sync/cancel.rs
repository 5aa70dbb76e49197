//! Cancellation and per-account mutual exclusion for sync runs

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use crate::error::CancelledError;

/// Caller-supplied cancellation flag
///
/// Clones share the flag. Sync code checks it before every remote call.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Fail with [`CancelledError`] if cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(CancelledError.into());
        }
        Ok(())
    }
}

/// One mutex per account id
///
/// Holding an account's guard for a whole refresh keeps two runs from
/// reading the same checkpoint or persisting checkpoints out of order.
/// Different accounts never contend.
#[derive(Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the lock for an account, creating it on first use
    pub fn lock_for(&self, account_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(account_id).or_default().clone()
    }

    /// Drop the lock entry of a deleted account
    pub fn remove(&self, account_id: i64) {
        self.locks.lock().unwrap().remove(&account_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        let err = token.check().unwrap_err();
        assert!(err.downcast_ref::<CancelledError>().is_some());
    }

    #[test]
    fn test_same_account_shares_lock() {
        let locks = AccountLocks::new();
        assert!(Arc::ptr_eq(&locks.lock_for(1), &locks.lock_for(1)));
        assert!(!Arc::ptr_eq(&locks.lock_for(1), &locks.lock_for(2)));
    }

    #[test]
    fn test_lock_serializes_runs() {
        let locks = Arc::new(AccountLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_inside = Arc::clone(&max_inside);
                thread::spawn(move || {
                    let lock = locks.lock_for(7);
                    let _guard = lock.lock().unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    }
}
