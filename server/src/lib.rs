//! bankcore Server
//!
//! HTTP surface over the transaction engine: login, account management,
//! money movement, history, user administration, metrics and health.

pub mod admin;
pub mod app;
pub mod audit;
pub mod config;
pub mod http;
pub mod state;

pub use app::App;
pub use config::ServerConfig;
pub use state::ServerState;
