//! Engine counters.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bankcore_common::BankError;
use bankcore_ledger::LockStats;

/// Money-movement operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Deposit,
    Withdraw,
    Transfer,
}

impl Operation {
    pub const ALL: [Operation; 3] = [Operation::Deposit, Operation::Withdraw, Operation::Transfer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Deposit => "deposit",
            Operation::Withdraw => "withdraw",
            Operation::Transfer => "transfer",
        }
    }

    fn index(&self) -> usize {
        match self {
            Operation::Deposit => 0,
            Operation::Withdraw => 1,
            Operation::Transfer => 2,
        }
    }
}

#[derive(Default)]
struct OperationCounters {
    success: AtomicU64,
    /// Refused before any mutation: validation, authorization, balance.
    rejected: AtomicU64,
    /// Failed after validation: conversion, store, internal.
    failed: AtomicU64,
}

/// Engine metrics.
#[derive(Default)]
pub struct Metrics {
    operations: [OperationCounters; 3],
    /// Cross-currency conversions performed.
    conversions: AtomicU64,
    /// Conversions that failed or timed out.
    conversions_failed: AtomicU64,
    /// Units of work re-run after a store conflict.
    store_retries: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of an operation.
    pub fn observe<T>(&self, op: Operation, result: &Result<T, BankError>) {
        let counters = &self.operations[op.index()];
        let counter = match result {
            Ok(_) => &counters.success,
            Err(
                BankError::InvalidAmount(_)
                | BankError::InvalidRequest { .. }
                | BankError::Unauthenticated(_)
                | BankError::AccountFrozenOrInactive
                | BankError::Forbidden(_)
                | BankError::AccountNotFound(_)
                | BankError::PrincipalNotFound(_)
                | BankError::InsufficientBalance { .. },
            ) => &counters.rejected,
            Err(_) => &counters.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conversion(&self, ok: bool) {
        if ok {
            self.conversions.fetch_add(1, Ordering::Relaxed);
        } else {
            self.conversions_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn store_retries(&self, retries: u32) {
        if retries > 0 {
            self.store_retries
                .fetch_add(u64::from(retries), Ordering::Relaxed);
        }
    }

    /// Get current metrics snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            operations: Operation::ALL.map(|op| {
                let c = &self.operations[op.index()];
                OperationSnapshot {
                    operation: op,
                    success: load(&c.success),
                    rejected: load(&c.rejected),
                    failed: load(&c.failed),
                }
            }),
            conversions: load(&self.conversions),
            conversions_failed: load(&self.conversions_failed),
            store_retries: load(&self.store_retries),
        }
    }

    /// Export metrics in Prometheus format, with the store's lock counters
    /// when it keeps any.
    pub fn to_prometheus(&self, locks: Option<LockStats>) -> String {
        let snapshot = self.snapshot();
        let mut out = String::new();

        let _ = writeln!(out, "# HELP bankcore_operations_total Money-movement operations by outcome");
        let _ = writeln!(out, "# TYPE bankcore_operations_total counter");
        for op in &snapshot.operations {
            for (outcome, value) in [
                ("success", op.success),
                ("rejected", op.rejected),
                ("failed", op.failed),
            ] {
                let _ = writeln!(
                    out,
                    "bankcore_operations_total{{operation=\"{}\",outcome=\"{}\"}} {}",
                    op.operation.as_str(),
                    outcome,
                    value
                );
            }
        }

        let _ = write!(
            out,
            r#"
# HELP bankcore_conversions_total Cross-currency conversions performed
# TYPE bankcore_conversions_total counter
bankcore_conversions_total {}

# HELP bankcore_conversions_failed_total Conversions that failed or timed out
# TYPE bankcore_conversions_failed_total counter
bankcore_conversions_failed_total {}

# HELP bankcore_store_retries_total Units of work re-run after a store conflict
# TYPE bankcore_store_retries_total counter
bankcore_store_retries_total {}
"#,
            snapshot.conversions, snapshot.conversions_failed, snapshot.store_retries,
        );

        if let Some(locks) = locks {
            let _ = write!(
                out,
                r#"
# HELP bankcore_account_locks_tracked Accounts with a lock entry
# TYPE bankcore_account_locks_tracked gauge
bankcore_account_locks_tracked {}

# HELP bankcore_account_locks_acquired_total Lock sets acquired
# TYPE bankcore_account_locks_acquired_total counter
bankcore_account_locks_acquired_total {}

# HELP bankcore_account_locks_timed_out_total Lock waits abandoned at the deadline
# TYPE bankcore_account_locks_timed_out_total counter
bankcore_account_locks_timed_out_total {}
"#,
                locks.tracked, locks.acquired, locks.timed_out,
            );
        }
        out
    }
}

/// Per-operation counters at a point in time.
#[derive(Debug, Clone, Copy)]
pub struct OperationSnapshot {
    pub operation: Operation,
    pub success: u64,
    pub rejected: u64,
    pub failed: u64,
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub operations: [OperationSnapshot; 3],
    pub conversions: u64,
    pub conversions_failed: u64,
    pub store_retries: u64,
}

impl MetricsSnapshot {
    pub fn operation(&self, op: Operation) -> OperationSnapshot {
        self.operations[op.index()]
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_classifies_outcomes() {
        let metrics = Metrics::new();

        metrics.observe(Operation::Withdraw, &Ok::<_, BankError>(()));
        metrics.observe::<()>(
            Operation::Withdraw,
            &Err(BankError::InsufficientBalance {
                required: "60.00".into(),
                available: "40.00".into(),
            }),
        );
        metrics.observe::<()>(
            Operation::Transfer,
            &Err(BankError::ConversionUnavailable("down".into())),
        );

        let snapshot = metrics.snapshot();
        let withdraw = snapshot.operation(Operation::Withdraw);
        assert_eq!(withdraw.success, 1);
        assert_eq!(withdraw.rejected, 1);
        assert_eq!(snapshot.operation(Operation::Transfer).failed, 1);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = Metrics::new();
        metrics.observe(Operation::Deposit, &Ok::<_, BankError>(()));
        metrics.conversion(true);
        metrics.store_retries(2);

        let output = metrics.to_prometheus(None);
        assert!(output.contains(
            "bankcore_operations_total{operation=\"deposit\",outcome=\"success\"} 1"
        ));
        assert!(output.contains("bankcore_conversions_total 1"));
        assert!(output.contains("bankcore_store_retries_total 2"));
        assert!(!output.contains("bankcore_account_locks"));

        let output = metrics.to_prometheus(Some(LockStats {
            tracked: 4,
            acquired: 9,
            timed_out: 1,
        }));
        assert!(output.contains("bankcore_account_locks_tracked 4"));
        assert!(output.contains("bankcore_account_locks_timed_out_total 1"));
    }
}
