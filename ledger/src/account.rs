//! Account definitions for the ledger.

use bankcore_common::{AccountNumber, BankError, Currency, PrincipalId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Account product type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountType {
    Savings,
    Current,
}

impl AccountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountType::Savings => "SAVINGS",
            AccountType::Current => "CURRENT",
        }
    }
}

impl Default for AccountType {
    fn default() -> Self {
        AccountType::Savings
    }
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AccountType {
    type Err = BankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAVINGS" => Ok(AccountType::Savings),
            "CURRENT" => Ok(AccountType::Current),
            other => Err(BankError::InvalidRequest {
                message: format!("Unsupported account type: {}", other),
                field: Some("account_type".to_string()),
            }),
        }
    }
}

/// A ledger account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique, never reused account number.
    pub account_number: AccountNumber,
    /// Owning principal. Immutable.
    #[serde(rename = "user")]
    pub owner_id: PrincipalId,
    /// Current balance at money scale. Never negative.
    pub balance: Decimal,
    pub account_type: AccountType,
    /// Account currency. Immutable.
    pub currency: Currency,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Account {
    /// Open a new account with a zero balance.
    pub fn open(
        account_number: AccountNumber,
        owner_id: PrincipalId,
        account_type: AccountType,
        currency: Currency,
    ) -> Self {
        let now = bankcore_common::now();
        let mut balance = Decimal::ZERO;
        balance.rescale(bankcore_common::MONEY_SCALE);

        Self {
            account_number,
            owner_id,
            balance,
            account_type,
            currency,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the principal owns this account.
    pub fn is_owned_by(&self, principal: &PrincipalId) -> bool {
        self.owner_id == *principal
    }

    /// Check if the account can fund a debit of `amount`.
    pub fn has_sufficient_funds(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}
