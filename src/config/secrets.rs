//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for credentials so callers need not
//! depend on secrecy directly.

pub use secrecy::{ExposeSecret, SecretString};
