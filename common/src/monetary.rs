//! Currency and amount rules.
//!
//! Balances and amounts are `rust_decimal::Decimal` at scale 2. Rounding is
//! always half-up (midpoint away from zero).

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::BankError;

/// Decimal places carried by every balance and amount.
pub const MONEY_SCALE: u32 = 2;

/// Largest balance or amount the ledger holds: 999999999999999999.99,
/// the range of a `NUMERIC(20,2)` column.
pub const MAX_MONEY: Decimal = Decimal::from_parts(0x630F_FFFF, 0x6BC7_5E2D, 0x5, false, MONEY_SCALE);

/// Supported account currencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Currency {
    INR,
    USD,
    GBP,
    EUR,
}

impl Currency {
    /// Every supported currency.
    pub const ALL: [Currency; 4] = [Currency::INR, Currency::USD, Currency::GBP, Currency::EUR];

    /// ISO 4217 code.
    pub fn code(&self) -> &'static str {
        match self {
            Currency::INR => "INR",
            Currency::USD => "USD",
            Currency::GBP => "GBP",
            Currency::EUR => "EUR",
        }
    }
}

impl Default for Currency {
    fn default() -> Self {
        Currency::INR
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl FromStr for Currency {
    type Err = BankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::ALL
            .into_iter()
            .find(|c| c.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| BankError::InvalidRequest {
                message: format!("Unsupported currency: {}", s),
                field: Some("currency".to_string()),
            })
    }
}

/// Round a value to money scale using half-up rounding.
pub fn round_money(value: Decimal) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Validate a caller-supplied amount and normalise it to money scale.
///
/// Rejects zero, negative amounts, amounts above [`MAX_MONEY`] and amounts
/// with sub-cent precision.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, BankError> {
    if amount <= Decimal::ZERO {
        return Err(BankError::InvalidAmount(
            "Amount must be positive".to_string(),
        ));
    }
    if amount > MAX_MONEY {
        return Err(BankError::InvalidAmount(format!(
            "Amount may not exceed {}",
            MAX_MONEY
        )));
    }
    if amount.normalize().scale() > MONEY_SCALE {
        return Err(BankError::InvalidAmount(format!(
            "Amount may have at most {} decimal places",
            MONEY_SCALE
        )));
    }
    let mut normalized = amount;
    normalized.rescale(MONEY_SCALE);
    Ok(normalized)
}
