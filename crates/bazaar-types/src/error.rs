//! Shared error types for the Bazaar system.

use thiserror::Error;

/// Top-level error type for the Bazaar core.
#[derive(Error, Debug)]
pub enum BazaarError {
    /// A message failed semantic validation.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Signing or signature verification failed.
    #[error("Signature error: {0}")]
    Signature(String),

    /// A configuration value was missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Alias for Result with BazaarError.
pub type BazaarResult<T> = Result<T, BazaarError>;
