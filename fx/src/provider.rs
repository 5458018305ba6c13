//! Rate source trait and implementations.

use std::str::FromStr;
#[cfg(any(test, feature = "test-utils"))]
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
#[cfg(any(test, feature = "test-utils"))]
use std::time::Duration;

use async_trait::async_trait;
use bankcore_common::{Currency, MAX_MONEY};
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::header::ACCEPT;
use hyper::{Request, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{FxError, FxResult};

/// An external source of currency conversions.
///
/// Implementations return the raw mid-market result of converting `amount`,
/// before any spread or rounding. The source is untrusted: callers validate
/// and bound every answer.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Get the source name.
    fn name(&self) -> &str;

    /// Convert `amount` from one currency to another at the mid-market rate.
    async fn convert(&self, from: Currency, to: Currency, amount: Decimal) -> FxResult<Decimal>;
}

/// Rate source speaking the `GET ?from=&to=&amount=` → `{"result": n}` protocol.
pub struct HttpRateSource {
    client: Client<HttpConnector, Empty<Bytes>>,
    base_url: String,
}

impl HttpRateSource {
    /// Create a source for a plain-HTTP endpoint.
    pub fn new(base_url: impl Into<String>) -> FxResult<Self> {
        let base_url = base_url.into();
        let uri: Uri = base_url
            .parse()
            .map_err(|e| FxError::InvalidConfig(format!("{}: {}", base_url, e)))?;
        if uri.scheme_str() != Some("http") {
            return Err(FxError::InvalidConfig(format!(
                "{}: only http:// rate sources are supported",
                base_url
            )));
        }

        let client = Client::builder(TokioExecutor::new()).build_http();
        Ok(Self { client, base_url })
    }

    fn request_uri(&self, from: Currency, to: Currency, amount: Decimal) -> FxResult<Uri> {
        let separator = if self.base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}from={}&to={}&amount={}",
            self.base_url,
            separator,
            from.code(),
            to.code(),
            amount
        )
        .parse()
        .map_err(|e| FxError::InvalidConfig(format!("{}", e)))
    }
}

#[async_trait]
impl RateSource for HttpRateSource {
    fn name(&self) -> &str {
        "HTTP"
    }

    async fn convert(&self, from: Currency, to: Currency, amount: Decimal) -> FxResult<Decimal> {
        let request = Request::get(self.request_uri(from, to, amount)?)
            .header(ACCEPT, "application/json")
            .body(Empty::<Bytes>::new())
            .map_err(|e| FxError::InvalidConfig(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| FxError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, from = %from, to = %to, "Rate source returned failure status");
            return Err(FxError::Unavailable(format!("status {}", status)));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| FxError::Unavailable(e.to_string()))?
            .to_bytes();

        let result = parse_conversion(&body, from, to)?;
        debug!(from = %from, to = %to, %amount, %result, "Rate source answered");
        Ok(result)
    }
}

#[derive(Deserialize)]
struct ConversionResponse {
    #[serde(default)]
    result: Option<serde_json::Number>,
}

/// Extract a positive decimal `result` from a rate source body.
pub(crate) fn parse_conversion(body: &[u8], from: Currency, to: Currency) -> FxResult<Decimal> {
    let malformed = |reason: String| FxError::MalformedResponse { from, to, reason };

    let response: ConversionResponse =
        serde_json::from_slice(body).map_err(|e| malformed(e.to_string()))?;
    let number = response
        .result
        .ok_or_else(|| malformed("missing result".to_string()))?;

    let text = number.to_string();
    let value = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|e| malformed(format!("{}: {}", text, e)))?;

    if value <= Decimal::ZERO {
        return Err(malformed(format!("non-positive result {}", value)));
    }
    if value > MAX_MONEY {
        return Err(malformed(format!("result {} out of range", value)));
    }
    Ok(value)
}

/// Mock rate source for testing.
#[cfg(any(test, feature = "test-utils"))]
pub struct MockRateSource {
    rates: dashmap::DashMap<(Currency, Currency), Decimal>,
    failing: AtomicBool,
    delay: parking_lot::Mutex<Duration>,
    calls: AtomicUsize,
}

#[cfg(any(test, feature = "test-utils"))]
impl MockRateSource {
    pub fn new() -> Self {
        Self {
            rates: dashmap::DashMap::new(),
            failing: AtomicBool::new(false),
            delay: parking_lot::Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        }
    }

    /// Set the mid-market rate for a pair.
    pub fn set_rate(&self, from: Currency, to: Currency, rate: Decimal) {
        self.rates.insert((from, to), rate);
    }

    /// Make every call fail as if the source were unreachable.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every answer.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Number of calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MockRateSource {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RateSource for MockRateSource {
    fn name(&self) -> &str {
        "MOCK"
    }

    async fn convert(&self, from: Currency, to: Currency, amount: Decimal) -> FxResult<Decimal> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(FxError::Unavailable("mock source is down".to_string()));
        }

        self.rates
            .get(&(from, to))
            .ok_or_else(|| FxError::MalformedResponse {
                from,
                to,
                reason: "no rate configured".to_string(),
            })?
            .checked_mul(amount)
            .ok_or_else(|| FxError::MalformedResponse {
                from,
                to,
                reason: "rate overflows".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_conversion() {
        let body = br#"{"success": true, "result": 4.8123}"#;
        assert_eq!(
            parse_conversion(body, Currency::INR, Currency::USD).unwrap(),
            dec!(4.8123)
        );
    }

    #[test]
    fn test_parse_conversion_rejects_bad_results() {
        for body in [
            &br#"{"result": null}"#[..],
            br#"{"success": false}"#,
            br#"{"result": -3.2}"#,
            br#"{"result": 0}"#,
            br#"{"result": "12"}"#,
            br#"{"result": 7.9e28}"#,
            br#"{"result": 1000000000000000000}"#,
            b"<html>rate limited</html>",
        ] {
            assert!(matches!(
                parse_conversion(body, Currency::INR, Currency::USD),
                Err(FxError::MalformedResponse { .. })
            ));
        }
    }

    #[test]
    fn test_parse_conversion_scientific() {
        let body = br#"{"result": 1.5e-5}"#;
        assert_eq!(
            parse_conversion(body, Currency::INR, Currency::GBP).unwrap(),
            dec!(0.000015)
        );
    }

    #[test]
    fn test_http_source_requires_http_scheme() {
        assert!(HttpRateSource::new("ftp://rates.example").is_err());
        assert!(HttpRateSource::new("not a url").is_err());
    }

    #[tokio::test]
    async fn test_http_source_builds_query() {
        let source = HttpRateSource::new("http://rates.example/convert").unwrap();
        let uri = source
            .request_uri(Currency::INR, Currency::EUR, dec!(400.00))
            .unwrap();
        assert_eq!(
            uri.to_string(),
            "http://rates.example/convert?from=INR&to=EUR&amount=400.00"
        );
    }

    #[tokio::test]
    async fn test_mock_source() {
        let source = MockRateSource::new();
        source.set_rate(Currency::USD, Currency::EUR, dec!(0.92));

        let result = source
            .convert(Currency::USD, Currency::EUR, dec!(100))
            .await
            .unwrap();
        assert_eq!(result, dec!(92.00));
        assert_eq!(source.calls(), 1);

        source.set_rate(Currency::USD, Currency::GBP, Decimal::MAX);
        assert!(matches!(
            source.convert(Currency::USD, Currency::GBP, dec!(2)).await,
            Err(FxError::MalformedResponse { .. })
        ));

        source.set_failing(true);
        assert!(source.convert(Currency::USD, Currency::EUR, dec!(1)).await.is_err());
    }
}
