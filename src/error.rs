//! Error types for the Gatekeeper service.

use thiserror::Error;

/// Main error type for Gatekeeper operations.
#[derive(Error, Debug)]
pub enum GatekeeperError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Attempt store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// No limiter is registered under the requested name
    #[error("Unknown limiter: {0}")]
    UnknownLimiter(String),

    /// Administrative operations were requested but not enabled
    #[error("Administrative operations are disabled")]
    AdminDisabled,

    /// gRPC server errors
    #[error("gRPC error: {0}")]
    Grpc(#[from] tonic::transport::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by attempt store backends.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backing file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The persisted document is not valid
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend refused the operation
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for Gatekeeper operations.
pub type Result<T> = std::result::Result<T, GatekeeperError>;
