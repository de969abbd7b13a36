//! Error types for Entangle

use crate::protocol::Rejection;
use thiserror::Error;

/// Main error type for Entangle operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to resolve identity {identity}: {reason}")]
    Resolution { identity: String, reason: String },

    #[error("QR rendering failed: {0}")]
    Render(String),

    #[error("Pairing rejected: {0}")]
    Rejected(Rejection),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid passcode encoding: {0}")]
    Encoding(String),

    #[error("Token generation failed: {0}")]
    Token(String),

    #[error("Operation not available to the {0} role")]
    WrongRole(&'static str),

    #[error("Session closed")]
    SessionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using Entangle's Error
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an identity resolution error
    pub fn resolution(identity: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Resolution {
            identity: identity.into(),
            reason: reason.into(),
        }
    }
}
