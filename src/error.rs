//! Error types for mtls-client-auth
//!
//! Authentication outcomes have their own error type,
//! [`crate::client_auth::AuthenticationError`]. This one covers setup:
//! configuration, PEM material, and I/O.

use std::io;

use thiserror::Error;

/// Result type alias for mtls-client-auth
pub type Result<T> = std::result::Result<T, Error>;

/// Setup and tooling errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
