//! bankcore Ledger Store
//!
//! Durable storage for accounts and the append-only transaction journal.
//! Balance changes and their journal records are only ever written together,
//! inside a [`UnitOfWork`] obtained from a [`LedgerStore`].

pub mod account;
pub mod account_number;
pub mod error;
pub mod journal;
pub mod lock_manager;
pub mod memory;
pub mod postgres;
pub mod store;

pub use account::{Account, AccountType};
pub use account_number::{AccountNumberConfig, AccountNumberGenerator};
pub use error::{LedgerError, LedgerResult};
pub use journal::{NewTransaction, TransactionFilter, TransactionRecord, TransactionType};
pub use lock_manager::{AccountLockManager, LockStats};
pub use memory::InMemoryLedgerStore;
pub use postgres::{PgLedgerConfig, PgLedgerStore};
pub use store::{with_atomic_unit, Committed, LedgerStore, RetryPolicy, TransactionStream, UnitOfWork};
