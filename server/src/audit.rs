//! Audit trail for mutating requests.
//!
//! Events go to the `audit` tracing target with request and response bodies
//! masked: secrets are replaced outright and account numbers keep only
//! their last four digits.

use bankcore_common::{mask_account_number, PrincipalId};
use serde_json::Value;
use tracing::info;

/// Replacement for credential values.
const SECRET_MASK: &str = "XXXXX";

const SECRET_FIELDS: [&str; 4] = ["password", "otp", "access", "refresh"];

const ACCOUNT_FIELDS: [&str; 5] = [
    "account",
    "account_number",
    "from_account",
    "to_account",
    "reference_account",
];

/// Mask a JSON document in place.
pub fn mask(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, field) in map.iter_mut() {
                if SECRET_FIELDS.contains(&key.as_str()) {
                    *field = Value::from(SECRET_MASK);
                } else if ACCOUNT_FIELDS.contains(&key.as_str()) {
                    mask_account(field);
                } else {
                    mask(field);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(mask),
        _ => {}
    }
}

/// Account fields are masked whatever JSON type the caller sent.
fn mask_account(value: &mut Value) {
    match value {
        Value::Null => {}
        Value::String(raw) => *value = Value::from(mask_account_number(raw)),
        Value::Number(n) => *value = Value::from(mask_account_number(&n.to_string())),
        Value::Bool(_) => *value = Value::from(SECRET_MASK),
        Value::Array(items) => items.iter_mut().for_each(mask_account),
        Value::Object(_) => mask(value),
    }
}

/// Masked rendering of a raw body. Non-JSON bodies are not reproduced.
pub fn masked_body(body: &[u8]) -> String {
    if body.is_empty() {
        return String::new();
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(mut value) => {
            mask(&mut value);
            value.to_string()
        }
        Err(_) => format!("<{} bytes, not JSON>", body.len()),
    }
}

/// A completed mutating request.
pub struct AuditEvent<'a> {
    pub principal: Option<PrincipalId>,
    pub method: &'a str,
    pub path: &'a str,
    pub status: u16,
    pub request: &'a [u8],
    pub response: &'a [u8],
}

impl AuditEvent<'_> {
    pub fn emit(&self) {
        let principal = self
            .principal
            .map_or_else(|| "anonymous".to_string(), |id| id.to_string());
        info!(
            target: "audit",
            principal_id = %principal,
            method = self.method,
            path = self.path,
            status = self.status,
            timestamp = %bankcore_common::now().to_rfc3339(),
            request = %masked_body(self.request),
            response = %masked_body(self.response),
            "Audit"
        );
    }
}
