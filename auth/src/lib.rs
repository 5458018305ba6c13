//! bankcore Authentication
//!
//! The authentication collaborator in front of the transaction engine:
//! a principal directory with role-based permissions, two-step login
//! (password, then a one-time passcode) and bearer sessions.

pub mod directory;
pub mod error;
pub mod hash;
pub mod otp;
pub mod session;
pub mod ttl_store;

use std::sync::Arc;
use std::time::Duration;

use bankcore_common::Principal;
use tracing::{info, instrument};

pub use directory::{
    default_roles, NewPrincipal, PrincipalDirectory, PrincipalRecord, PrincipalSummary,
    PrincipalUpdate, RoleRecord,
};
pub use error::{AuthError, AuthResult};
pub use otp::{LogOtpDelivery, OtpConfig, OtpDelivery, OtpManager};
pub use session::{SessionStore, SessionToken};
pub use ttl_store::{TtlStore, TtlStoreConfig};

/// Login flow over the directory, OTP manager and session store.
pub struct AuthService {
    directory: Arc<PrincipalDirectory>,
    otps: OtpManager,
    sessions: SessionStore,
}

impl AuthService {
    pub fn new(
        directory: Arc<PrincipalDirectory>,
        otp_config: OtpConfig,
        delivery: Arc<dyn OtpDelivery>,
        session_ttl: Duration,
    ) -> Self {
        Self {
            directory,
            otps: OtpManager::new(otp_config, delivery),
            sessions: SessionStore::new(session_ttl),
        }
    }

    pub fn directory(&self) -> &Arc<PrincipalDirectory> {
        &self.directory
    }

    /// First step: check the password and send an OTP.
    #[instrument(skip(self, password))]
    pub async fn login(&self, username: &str, password: &str) -> AuthResult<()> {
        let principal = self.directory.authenticate(username, password)?;
        self.otps.issue(&principal).await;
        Ok(())
    }

    /// Second step: exchange a valid OTP for a bearer token.
    #[instrument(skip(self, otp))]
    pub fn verify_otp(&self, username: &str, otp: &str) -> AuthResult<SessionToken> {
        let principal = self
            .directory
            .principal_by_username(username)
            .ok_or(AuthError::OtpExpired)?;
        self.otps.verify(&principal.id, otp)?;

        let token = self.sessions.issue(principal.id);
        info!(principal_id = %principal.id, "Session opened");
        Ok(token)
    }

    /// Resolve a bearer token to the principal's current directory entry.
    pub fn authenticate_bearer(&self, token: &str) -> AuthResult<Principal> {
        let id = self
            .sessions
            .resolve(token)
            .ok_or(AuthError::InvalidToken)?;
        self.directory.principal(&id).ok_or(AuthError::InvalidToken)
    }

    /// Revoke a bearer token. Returns false if it was unknown or expired.
    pub fn logout(&self, token: &str) -> bool {
        let revoked = self.sessions.revoke(token);
        if revoked {
            info!("Session closed");
        }
        revoked
    }

    /// Drop expired OTPs and sessions. Returns how many went.
    pub fn evict_expired(&self) -> usize {
        self.otps.evict_expired() + self.sessions.evict_expired()
    }
}
