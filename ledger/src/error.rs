//! Ledger store error types.

use bankcore_common::{AccountNumber, BankError};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by ledger stores.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// No account with this number.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountNumber),

    /// A debit would take the balance below zero.
    #[error("Insufficient funds in {}: required {required}, available {available}", .account.masked())]
    InsufficientFunds {
        account: AccountNumber,
        required: Decimal,
        available: Decimal,
    },

    /// A credit would take the balance past what the ledger can hold.
    #[error("Balance of {} would exceed {limit}", .account.masked())]
    BalanceLimit { account: AccountNumber, limit: Decimal },

    /// Transient conflict (lock wait timeout, serialization failure, deadlock).
    #[error("Ledger conflict: {0}")]
    Conflict(String),

    /// Conflicts persisted through every permitted attempt.
    #[error("Ledger conflict persisted after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// No free account number could be found within the configured bounds.
    #[error("Account number space exhausted")]
    AccountNumbersExhausted,

    /// A unit of work tried to commit balance changes without journal
    /// records, or records without balance changes.
    #[error("Unbalanced unit of work: {0}")]
    UnbalancedUnit(String),

    /// Persisted data could not be decoded.
    #[error("Corrupt ledger row: {0}")]
    Corrupt(String),

    /// Store cannot be reached.
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Transient failures that the atomic-unit runner retries.
    pub fn is_conflict(&self) -> bool {
        matches!(self, LedgerError::Conflict(_))
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::BalanceLimit { .. } => "BALANCE_LIMIT",
            LedgerError::Conflict(_) => "CONFLICT",
            LedgerError::RetriesExhausted { .. } => "RETRIES_EXHAUSTED",
            LedgerError::AccountNumbersExhausted => "ACCOUNT_NUMBERS_EXHAUSTED",
            LedgerError::UnbalancedUnit(_) => "UNBALANCED_UNIT",
            LedgerError::Corrupt(_) => "CORRUPT_ROW",
            LedgerError::Unavailable(_) => "UNAVAILABLE",
            LedgerError::Database(_) => "DATABASE_ERROR",
        }
    }
}

impl From<LedgerError> for BankError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::AccountNotFound(number) => BankError::AccountNotFound(number),
            LedgerError::InsufficientFunds {
                required,
                available,
                ..
            } => BankError::InsufficientBalance {
                required: required.to_string(),
                available: available.to_string(),
            },
            LedgerError::BalanceLimit { limit, .. } => BankError::InvalidAmount(format!(
                "Resulting balance may not exceed {}",
                limit
            )),
            LedgerError::RetriesExhausted { attempts } => BankError::StoreConflict { attempts },
            LedgerError::Conflict(_) => BankError::StoreConflict { attempts: 1 },
            other => BankError::Internal(other.to_string()),
        }
    }
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
