//! bankcore Common Types
//!
//! Shared types used across the bankcore workspace: identifiers, the
//! currency and amount rules, the acting principal and the error taxonomy
//! surfaced to callers.

pub mod identifiers;
pub mod monetary;
pub mod principal;
pub mod error;
pub mod time;

pub use identifiers::*;
pub use monetary::*;
pub use principal::*;
pub use error::*;
pub use time::*;
