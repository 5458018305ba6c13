//! Bearer session tokens.

use std::fmt;
use std::time::Duration;

use bankcore_common::PrincipalId;
use rand::RngCore;
use serde::Serialize;

use crate::hash::sha256_hex;
use crate::ttl_store::TtlStore;

/// An opaque bearer token handed to a client after login.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes.iter().map(|b| format!("{:02x}", b)).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(XXXXX)")
    }
}

/// Live sessions, keyed by the digest of their token.
pub struct SessionStore {
    sessions: TtlStore<String, PrincipalId>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: TtlStore::with_ttl(ttl),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Open a session for a principal.
    pub fn issue(&self, principal: PrincipalId) -> SessionToken {
        let token = SessionToken::generate();
        self.sessions
            .insert(sha256_hex(token.as_str().as_bytes()), principal);
        token
    }

    /// Resolve a presented token to its principal.
    pub fn resolve(&self, token: &str) -> Option<PrincipalId> {
        self.sessions.get(&sha256_hex(token.as_bytes()))
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.remove(&sha256_hex(token.as_bytes())).is_some()
    }

    pub fn evict_expired(&self) -> usize {
        self.sessions.evict_expired()
    }
}
