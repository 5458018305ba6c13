//! One-time passcodes for the second login step.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bankcore_common::{Principal, PrincipalId};
use rand::Rng;
use tracing::{info, warn};

use crate::error::{AuthError, AuthResult};
use crate::hash::{digest_eq, sha256_hex};
use crate::ttl_store::TtlStore;

/// OTP policy.
#[derive(Debug, Clone)]
pub struct OtpConfig {
    pub ttl: Duration,
    pub max_attempts: u32,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_attempts: 5,
        }
    }
}

/// Hands a freshly issued code to the principal out of band.
#[async_trait]
pub trait OtpDelivery: Send + Sync {
    async fn deliver(&self, principal: &Principal, code: &str, valid_for: Duration);
}

/// Delivery sink that only records that a code was issued.
pub struct LogOtpDelivery;

#[async_trait]
impl OtpDelivery for LogOtpDelivery {
    async fn deliver(&self, principal: &Principal, _code: &str, valid_for: Duration) {
        info!(
            principal_id = %principal.id,
            valid_for_secs = valid_for.as_secs(),
            "Login OTP issued"
        );
    }
}

#[derive(Debug, Clone)]
struct PendingOtp {
    digest: String,
    attempts: u32,
}

/// Issues and verifies OTPs. Only SHA-256 digests of codes are kept.
pub struct OtpManager {
    pending: TtlStore<PrincipalId, PendingOtp>,
    config: OtpConfig,
    delivery: Arc<dyn OtpDelivery>,
}

impl OtpManager {
    pub fn new(config: OtpConfig, delivery: Arc<dyn OtpDelivery>) -> Self {
        Self {
            pending: TtlStore::with_ttl(config.ttl),
            config,
            delivery,
        }
    }

    /// Issue a fresh code, replacing any pending one and resetting attempts.
    pub async fn issue(&self, principal: &Principal) {
        let code = rand::thread_rng().gen_range(100_000..=999_999u32).to_string();
        self.pending.insert(
            principal.id,
            PendingOtp {
                digest: sha256_hex(code.as_bytes()),
                attempts: 0,
            },
        );
        self.delivery.deliver(principal, &code, self.config.ttl).await;
    }

    /// Check a submitted code. A match consumes the pending code.
    pub fn verify(&self, principal: &PrincipalId, code: &str) -> AuthResult<()> {
        let submitted = sha256_hex(code.trim().as_bytes());
        let max_attempts = self.config.max_attempts;

        let outcome = self
            .pending
            .update(principal, |pending| {
                if pending.attempts >= max_attempts {
                    return Err(AuthError::TooManyAttempts);
                }
                if digest_eq(&pending.digest, &submitted) {
                    return Ok(());
                }
                pending.attempts += 1;
                Err(AuthError::InvalidOtp {
                    remaining: max_attempts.saturating_sub(pending.attempts),
                })
            })
            .ok_or(AuthError::OtpExpired)?;

        match outcome {
            Ok(()) => {
                self.pending.remove(principal);
                Ok(())
            }
            Err(e) => {
                warn!(principal_id = %principal, error = %e, "OTP verification failed");
                Err(e)
            }
        }
    }

    pub fn evict_expired(&self) -> usize {
        self.pending.evict_expired()
    }
}
