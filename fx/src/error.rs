//! FX error types.

use bankcore_common::{BankError, Currency};
use thiserror::Error;

/// Errors that can occur while converting an amount.
#[derive(Debug, Error)]
pub enum FxError {
    /// Rate source could not be reached or answered with a failure status.
    #[error("Rate source unavailable: {0}")]
    Unavailable(String),

    /// Rate source did not answer within the configured bound.
    #[error("Rate source timed out after {0} ms")]
    Timeout(u64),

    /// Rate source answered with something that is not a usable amount.
    #[error("Malformed rate response for {from}->{to}: {reason}")]
    MalformedResponse {
        from: Currency,
        to: Currency,
        reason: String,
    },

    /// Rate source URL could not be used.
    #[error("Invalid rate source configuration: {0}")]
    InvalidConfig(String),
}

impl FxError {
    pub fn error_code(&self) -> &'static str {
        match self {
            FxError::Unavailable(_) => "RATE_SOURCE_UNAVAILABLE",
            FxError::Timeout(_) => "RATE_SOURCE_TIMEOUT",
            FxError::MalformedResponse { .. } => "RATE_SOURCE_MALFORMED",
            FxError::InvalidConfig(_) => "RATE_SOURCE_CONFIG",
        }
    }
}

impl From<FxError> for BankError {
    fn from(err: FxError) -> Self {
        BankError::ConversionUnavailable(err.to_string())
    }
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
