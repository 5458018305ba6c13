//! Identifier types for bankcore entities.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::BankError;

/// Longest account number any store will hand out.
pub const MAX_ACCOUNT_NUMBER_WIDTH: usize = 18;

/// A bank account number: a fixed-width string of ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountNumber(String);

impl AccountNumber {
    /// Parse and validate an account number supplied by a caller.
    pub fn parse(s: &str) -> Result<Self, BankError> {
        let s = s.trim();
        if s.is_empty()
            || s.len() > MAX_ACCOUNT_NUMBER_WIDTH
            || !s.chars().all(|c| c.is_ascii_digit())
        {
            return Err(BankError::InvalidRequest {
                message: "Account number must be a string of digits".to_string(),
                field: Some("account".to_string()),
            });
        }
        Ok(Self(s.to_string()))
    }

    /// Wrap digits produced by a store or generator.
    pub fn from_digits(digits: impl Into<String>) -> Self {
        Self(digits.into())
    }

    /// Get the account number as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the inner string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// Masked form that only reveals the last four digits.
    pub fn masked(&self) -> String {
        mask_account_number(&self.0)
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Mask an account number down to its last four characters.
pub fn mask_account_number(raw: &str) -> String {
    let chars: Vec<char> = raw.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
    format!("XXXXXX{}", tail)
}

/// Unique identifier for a principal (an authenticated user).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrincipalId(Uuid);

impl PrincipalId {
    /// Create a new principal ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse from string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PrincipalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PrincipalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a ledger transaction record. Assigned by the store in
/// strictly increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(i64);

impl TransactionId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
