//! Per-account exclusive locks for the in-memory store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tracing::{debug, warn};

use bankcore_common::AccountNumber;

use crate::error::{LedgerError, LedgerResult};

/// Held locks for one unit of work. Released on drop.
#[derive(Debug)]
pub struct AccountLocks {
    guards: Vec<OwnedMutexGuard<()>>,
}

impl AccountLocks {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Lock statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockStats {
    /// Accounts with a lock entry.
    pub tracked: usize,
    /// Successful acquisitions.
    pub acquired: u64,
    /// Acquisitions abandoned at the deadline.
    pub timed_out: u64,
}

/// Manager for account locks.
///
/// Callers always acquire in ascending account-number order, so two units
/// over overlapping accounts cannot deadlock. A wait that exceeds the
/// timeout surfaces as a retryable [`LedgerError::Conflict`].
pub struct AccountLockManager {
    locks: DashMap<AccountNumber, Arc<Mutex<()>>>,
    timeout: Duration,
    acquired: AtomicU64,
    timed_out: AtomicU64,
}

impl AccountLockManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
            acquired: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        }
    }

    /// Lock every listed account, deduplicated and in sorted order.
    pub async fn acquire(&self, accounts: &[AccountNumber]) -> LedgerResult<AccountLocks> {
        let mut ordered: Vec<&AccountNumber> = accounts.iter().collect();
        ordered.sort();
        ordered.dedup();

        let deadline = Instant::now() + self.timeout;
        let mut guards = Vec::with_capacity(ordered.len());

        for number in ordered {
            let lock = self
                .locks
                .entry(number.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone();

            match tokio::time::timeout_at(deadline, lock.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => {
                    self.timed_out.fetch_add(1, Ordering::Relaxed);
                    warn!(account = %number.masked(), "Timed out waiting for account lock");
                    return Err(LedgerError::Conflict(format!(
                        "lock wait on {} exceeded {:?}",
                        number.masked(),
                        self.timeout
                    )));
                }
            }
        }

        self.acquired.fetch_add(1, Ordering::Relaxed);
        debug!(accounts = guards.len(), "Account locks acquired");
        Ok(AccountLocks { guards })
    }

    /// Drop lock entries nobody holds or waits on.
    pub fn prune_idle(&self) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - self.locks.len()
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            tracked: self.locks.len(),
            acquired: self.acquired.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

impl Default for AccountLockManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}
