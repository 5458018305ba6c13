//! Spread-and-round currency conversion.

use std::sync::Arc;
use std::time::Duration;

use bankcore_common::{round_money, Currency, MAX_MONEY};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::error::{FxError, FxResult};
use crate::provider::RateSource;

/// Converter configuration.
#[derive(Debug, Clone)]
pub struct ConverterConfig {
    /// Multiplier applied to the mid-market result.
    pub spread: Decimal,
    /// Upper bound on a single rate source call.
    pub timeout: Duration,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            spread: Decimal::new(101, 2),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Converts amounts between account currencies.
pub struct CurrencyConverter {
    source: Arc<dyn RateSource>,
    config: ConverterConfig,
}

impl CurrencyConverter {
    pub fn new(source: Arc<dyn RateSource>, config: ConverterConfig) -> Self {
        Self { source, config }
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Convert `amount` into `to`.
    ///
    /// Same-currency conversions return `amount` untouched without calling
    /// the rate source. Otherwise the mid-market result is multiplied by the
    /// spread and rounded half-up to two decimal places.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn convert(&self, amount: Decimal, from: Currency, to: Currency) -> FxResult<Decimal> {
        if from == to {
            return Ok(amount);
        }

        let mid = tokio::time::timeout(self.config.timeout, self.source.convert(from, to, amount))
            .await
            .map_err(|_| {
                warn!(from = %from, to = %to, "Rate source timed out");
                FxError::Timeout(self.config.timeout.as_millis() as u64)
            })??;

        let converted = mid
            .checked_mul(self.config.spread)
            .map(round_money)
            .filter(|c| *c > Decimal::ZERO && *c <= MAX_MONEY)
            .ok_or_else(|| FxError::MalformedResponse {
                from,
                to,
                reason: format!("{} converts to {} before spread", amount, mid),
            })?;

        info!(from = %from, to = %to, %amount, %converted, "Converted amount");
        Ok(converted)
    }
}
