//! bankcore Transaction Engine
//!
//! The sole mutator of account balances. Deposits, withdrawals and
//! transfers are checked by the [`AuthorizationGate`], converted through the
//! currency converter when needed, and applied together with their journal
//! record inside one atomic unit of the ledger store.

pub mod accounts;
pub mod engine;
pub mod gate;
pub mod history;
pub mod metrics;

pub use accounts::AccountService;
pub use engine::TransactionEngine;
pub use gate::AuthorizationGate;
pub use history::{History, HistoryQuery, Page};
pub use metrics::{Metrics, MetricsSnapshot, Operation, OperationSnapshot, SharedMetrics};
