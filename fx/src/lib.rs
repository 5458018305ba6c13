//! bankcore FX
//!
//! Currency conversion for cross-currency transfers.
//!
//! # Features
//!
//! - Pluggable [`RateSource`] with an HTTP implementation
//! - Fixed spread applied on top of the mid-market result
//! - Round-half-up to money scale
//! - Bounded wait on the rate source
//!
//! # Example
//!
//! ```rust,ignore
//! use bankcore_fx::{CurrencyConverter, ConverterConfig, HttpRateSource};
//! use bankcore_common::Currency;
//!
//! let source = HttpRateSource::new("http://api.exchangerate.host/convert")?;
//! let converter = CurrencyConverter::new(Arc::new(source), ConverterConfig::default());
//!
//! let credited = converter.convert(dec!(400.00), Currency::INR, Currency::USD).await?;
//! ```

pub mod converter;
pub mod error;
pub mod provider;

pub use converter::{ConverterConfig, CurrencyConverter};
pub use error::{FxError, FxResult};
pub use provider::{HttpRateSource, RateSource};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockRateSource;
