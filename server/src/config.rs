//! Server configuration.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

/// Ledger store configuration.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// PostgreSQL URL. `None` keeps the ledger in memory.
    pub database_url: Option<String>,
    /// Pool size for the PostgreSQL store.
    pub max_connections: u32,
    /// Attempts per unit of work before a conflict is surfaced.
    pub max_retries: u32,
    /// Backoff between conflicting attempts, multiplied by the attempt number.
    pub retry_backoff: Duration,
    /// Bound on waiting for account locks.
    pub lock_timeout: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 10,
            max_retries: 5,
            retry_backoff: Duration::from_millis(10),
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Currency conversion configuration.
#[derive(Debug, Clone)]
pub struct FxSettings {
    /// Base URL of the rate source.
    pub rate_url: String,
    pub timeout: Duration,
    /// Multiplier applied to the mid-market result.
    pub spread: Decimal,
}

impl Default for FxSettings {
    fn default() -> Self {
        Self {
            rate_url: "http://api.exchangerate.host/convert".to_string(),
            timeout: Duration::from_secs(3),
            spread: Decimal::new(101, 2),
        }
    }
}

/// Login and session configuration.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub otp_ttl: Duration,
    pub otp_max_attempts: u32,
    pub session_ttl: Duration,
    /// JSON principal directory. `None` starts with nobody able to log in.
    pub directory_path: Option<String>,
    /// How often expired OTPs and sessions are swept and idle account
    /// locks pruned.
    pub cleanup_interval: Duration,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            otp_ttl: Duration::from_secs(300),
            otp_max_attempts: 5,
            session_ttl: Duration::from_secs(3600),
            directory_path: None,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Main server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub listen_port: u16,
    pub ledger: LedgerSettings,
    pub fx: FxSettings,
    pub auth: AuthSettings,
    /// Largest request body accepted, in bytes.
    pub max_body_bytes: usize,
    /// How long shutdown waits for open connections.
    pub shutdown_grace: Duration,
    /// Default filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_string(),
            listen_port: 8000,
            ledger: LedgerSettings::default(),
            fx: FxSettings::default(),
            auth: AuthSettings::default(),
            max_body_bytes: 64 * 1024,
            shutdown_grace: Duration::from_secs(10),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup` onto the defaults. Unparseable values
    /// are ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("BANKCORE_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Some(port) = parsed(&lookup, "BANKCORE_LISTEN_PORT") {
            config.listen_port = port;
        }

        if let Some(url) = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty()) {
            config.ledger.database_url = Some(url);
        }
        if let Some(retries) = parsed(&lookup, "LEDGER_MAX_RETRIES") {
            config.ledger.max_retries = retries;
        }
        if let Some(ms) = parsed(&lookup, "LEDGER_LOCK_TIMEOUT_MS") {
            config.ledger.lock_timeout = Duration::from_millis(ms);
        }

        if let Some(url) = lookup("FX_RATE_URL") {
            config.fx.rate_url = url;
        }
        if let Some(ms) = parsed(&lookup, "FX_TIMEOUT_MS") {
            config.fx.timeout = Duration::from_millis(ms);
        }
        if let Some(spread) = parsed(&lookup, "FX_SPREAD") {
            config.fx.spread = spread;
        }

        if let Some(secs) = parsed(&lookup, "OTP_TTL_SECS") {
            config.auth.otp_ttl = Duration::from_secs(secs);
        }
        if let Some(attempts) = parsed(&lookup, "OTP_MAX_ATTEMPTS") {
            config.auth.otp_max_attempts = attempts;
        }
        if let Some(secs) = parsed(&lookup, "SESSION_TTL_SECS") {
            config.auth.session_ttl = Duration::from_secs(secs);
        }
        if let Some(path) = lookup("DIRECTORY_PATH") {
            config.auth.directory_path = Some(path);
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.listen_port == 0 {
            return Err("Listen port cannot be 0".to_string());
        }
        if self.ledger.max_retries == 0 {
            return Err("LEDGER_MAX_RETRIES must be at least 1".to_string());
        }
        if self.ledger.lock_timeout.is_zero() {
            return Err("LEDGER_LOCK_TIMEOUT_MS cannot be 0".to_string());
        }
        if !self.fx.rate_url.starts_with("http://") {
            return Err("FX_RATE_URL must be an http:// URL".to_string());
        }
        if self.fx.timeout.is_zero() {
            return Err("FX_TIMEOUT_MS cannot be 0".to_string());
        }
        if self.fx.spread < Decimal::ONE {
            return Err("FX_SPREAD cannot be below 1".to_string());
        }
        if self.auth.otp_max_attempts == 0 {
            return Err("OTP_MAX_ATTEMPTS must be at least 1".to_string());
        }
        if self.auth.otp_ttl.is_zero() || self.auth.session_ttl.is_zero() {
            return Err("OTP and session TTLs cannot be 0".to_string());
        }
        Ok(())
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|raw| raw.trim().parse().ok())
}
