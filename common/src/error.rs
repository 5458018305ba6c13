//! Error taxonomy surfaced by bankcore operations.

use crate::AccountNumber;
use thiserror::Error;

/// Main error type for bankcore operations.
#[derive(Error, Debug)]
pub enum BankError {
    /// Non-positive or over-precise amount.
    #[error("{0}")]
    InvalidAmount(String),

    /// Malformed request field.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        message: String,
        field: Option<String>,
    },

    /// Missing or invalid credentials.
    #[error("{0}")]
    Unauthenticated(String),

    /// The acting principal is inactive or frozen.
    #[error("Your account is inactive or frozen.")]
    AccountFrozenOrInactive,

    /// Ownership or permission check failed.
    #[error("{0}")]
    Forbidden(String),

    /// Account does not exist (or is not visible to the caller).
    #[error("Account not found: {0}")]
    AccountNotFound(AccountNumber),

    /// No principal with this username.
    #[error("User not found: {0}")]
    PrincipalNotFound(String),

    /// Source account cannot fund the operation.
    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: String, available: String },

    /// The external rate source failed or timed out.
    #[error("Currency conversion unavailable: {0}")]
    ConversionUnavailable(String),

    /// The store kept conflicting after its bounded retries.
    #[error("Ledger conflict persisted after {attempts} attempts")]
    StoreConflict { attempts: u32 },

    /// Anything unexpected. The message is logged, never returned to callers.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BankError {
    /// Check if a caller may reasonably retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BankError::StoreConflict { .. } | BankError::ConversionUnavailable(_)
        )
    }

    /// HTTP status equivalent.
    pub fn status_code(&self) -> u16 {
        match self {
            BankError::InvalidAmount(_)
            | BankError::InvalidRequest { .. }
            | BankError::InsufficientBalance { .. } => 400,
            BankError::Unauthenticated(_) => 401,
            BankError::AccountFrozenOrInactive | BankError::Forbidden(_) => 403,
            BankError::AccountNotFound(_) | BankError::PrincipalNotFound(_) => 404,
            BankError::ConversionUnavailable(_) => 502,
            BankError::StoreConflict { .. } | BankError::Internal(_) => 500,
        }
    }

    /// Stable error code for response payloads.
    pub fn error_code(&self) -> &'static str {
        match self {
            BankError::InvalidAmount(_) => "INVALID_AMOUNT",
            BankError::InvalidRequest { .. } => "INVALID_REQUEST",
            BankError::Unauthenticated(_) => "UNAUTHENTICATED",
            BankError::AccountFrozenOrInactive => "ACCOUNT_FROZEN_OR_INACTIVE",
            BankError::Forbidden(_) => "FORBIDDEN",
            BankError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            BankError::PrincipalNotFound(_) => "USER_NOT_FOUND",
            BankError::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            BankError::ConversionUnavailable(_) => "CONVERSION_UNAVAILABLE",
            BankError::StoreConflict { .. } => "STORE_CONFLICT",
            BankError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to a caller. Internal details stay server-side.
    pub fn public_message(&self) -> String {
        match self {
            BankError::StoreConflict { .. } | BankError::Internal(_) => {
                "Internal server error".to_string()
            }
            BankError::AccountNotFound(_) => "Account not found".to_string(),
            other => other.to_string(),
        }
    }

    /// Field that caused a validation failure, if known.
    pub fn field(&self) -> Option<&str> {
        match self {
            BankError::InvalidRequest { field, .. } => field.as_deref(),
            BankError::InvalidAmount(_) => Some("amount"),
            _ => None,
        }
    }
}

/// Result type alias for bankcore operations.
pub type Result<T> = std::result::Result<T, BankError>;
