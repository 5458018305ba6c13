//! Request decoding and response encoding helpers.

use std::collections::HashMap;
use std::str::FromStr;

use bankcore_common::BankError;
use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use hyper::{HeaderMap, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::error::Category;
use serde_json::{json, Value};
use tracing::error;

pub type HttpResponse = Response<Full<Bytes>>;

/// A rendered reply, kept as bytes until it is sent so the audit trail can
/// see exactly what the caller received.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub body: Bytes,
}

impl Reply {
    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize>(status: StatusCode, body: &T) -> Self {
        match serde_json::to_vec(body) {
            Ok(bytes) => Self {
                status,
                content_type: "application/json",
                body: Bytes::from(bytes),
            },
            Err(e) => {
                error!(error = %e, "Response serialization failed");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    content_type: "application/json",
                    body: Bytes::from_static(
                        br#"{"error":"Internal server error","code":"INTERNAL_ERROR"}"#,
                    ),
                }
            }
        }
    }

    pub fn text(status: StatusCode, body: String) -> Self {
        Self {
            status,
            content_type: "text/plain; version=0.0.4",
            body: Bytes::from(body),
        }
    }

    /// Structured error payload: `{error, code}` plus the offending field
    /// when one is known.
    pub fn error(err: &BankError) -> Self {
        let status =
            StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(error = %err, code = err.error_code(), "Request failed");
        }

        let mut body = json!({
            "error": err.public_message(),
            "code": err.error_code(),
        });
        if let Some(field) = err.field() {
            body["field"] = Value::from(field);
        }
        Self::json(status, &body)
    }

    /// Error payload for failures outside the business taxonomy.
    pub fn plain_error(status: StatusCode, code: &'static str, message: &str) -> Self {
        Self::json(status, &json!({ "error": message, "code": code }))
    }

    pub fn into_response(self) -> HttpResponse {
        let mut response = Response::new(Full::new(self.body));
        *response.status_mut() = self.status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(self.content_type));
        response
    }
}

/// Decode a JSON request body.
///
/// The decoder's own message quotes offending values, so only the error
/// category and position are reported back.
pub fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, BankError> {
    serde_json::from_slice(body).map_err(|e| {
        let problem = match e.classify() {
            Category::Data => "unexpected field type",
            Category::Syntax => "syntax error",
            Category::Eof => "unexpected end of input",
            Category::Io => "unreadable input",
        };
        BankError::InvalidRequest {
            message: format!(
                "Malformed JSON body: {} at line {} column {}",
                problem,
                e.line(),
                e.column()
            ),
            field: None,
        }
    })
}

/// Read an amount given either as a JSON number or a decimal string.
pub fn parse_amount(value: &Value) -> Result<Decimal, BankError> {
    let raw = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        Value::Null => return Err(BankError::InvalidAmount("Amount is required".to_string())),
        _ => return Err(BankError::InvalidAmount("Amount must be a number".to_string())),
    };
    Decimal::from_str(&raw)
        .or_else(|_| Decimal::from_scientific(&raw))
        .map_err(|_| BankError::InvalidAmount(format!("Invalid amount: {}", raw)))
}

/// The token of an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        Some(token.trim())
    } else {
        None
    }
}

/// Decode an `application/x-www-form-urlencoded` query string. Later
/// duplicates win.
pub fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    form_urlencoded::parse(query.unwrap_or_default().as_bytes())
        .into_owned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankcore_common::AccountNumber;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_amount_accepts_numbers_and_strings() {
        assert_eq!(parse_amount(&json!(200)).unwrap(), dec!(200));
        assert_eq!(parse_amount(&json!(0.1)).unwrap(), dec!(0.1));
        assert_eq!(parse_amount(&json!("12.50")).unwrap(), dec!(12.50));
        assert!(matches!(
            parse_amount(&json!("twelve")),
            Err(BankError::InvalidAmount(_))
        ));
        assert!(parse_amount(&Value::Null).is_err());
        assert!(parse_amount(&json!([1])).is_err());
    }

    #[test]
    fn test_parse_json_does_not_quote_values() {
        #[derive(serde::Deserialize, Debug)]
        struct Body {
            #[allow(dead_code)]
            account: String,
        }

        let err = parse_json::<Body>(br#"{"account": 123456789012}"#).unwrap_err();
        let message = Reply::error(&err);
        let text = String::from_utf8_lossy(&message.body).into_owned();

        assert_eq!(message.status, StatusCode::BAD_REQUEST);
        assert!(!text.contains("123456789012"));
        assert!(text.contains("unexpected field type"));
        assert!(matches!(
            parse_json::<Body>(b"{\"account\": "),
            Err(BankError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers), Some("abc123"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc123"));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn test_parse_query() {
        let query = parse_query(Some("account=100000000001&type=deposit&start_date=2024-03-01T00%3A00%3A00%2B00%3A00&flag"));

        assert_eq!(query["account"], "100000000001");
        assert_eq!(query["type"], "deposit");
        assert_eq!(query["start_date"], "2024-03-01T00:00:00+00:00");
        assert_eq!(query["flag"], "");
        assert!(parse_query(None).is_empty());
    }

    #[test]
    fn test_parse_query_leaves_bad_escapes() {
        let query = parse_query(Some("note=a+b&pct=100%&bad=%zz&account=1&account=2"));

        assert_eq!(query["note"], "a b");
        assert_eq!(query["pct"], "100%");
        assert_eq!(query["bad"], "%zz");
        assert_eq!(query["account"], "2");
    }

    #[test]
    fn test_error_reply_shape() {
        let reply = Reply::error(&BankError::AccountNotFound(AccountNumber::from_digits("123456789012")));
        assert_eq!(reply.status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body, json!({"error": "Account not found", "code": "ACCOUNT_NOT_FOUND"}));

        let reply = Reply::error(&BankError::InvalidAmount("Amount must be positive".into()));
        let response = reply.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    }
}
