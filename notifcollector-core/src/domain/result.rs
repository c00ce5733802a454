//! Result and error types for the core library

use thiserror::Error;

/// Core library error type
///
/// Parsing failures (`MalformedNumber`, `UnrecognizedFormat`) are terminal for a
/// single notification. Delivery failures (`NoAssignment`, `Transport`) leave
/// the event pending. `Unauthenticated` aborts a whole delivery pass.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed number: {0}")]
    MalformedNumber(String),

    #[error("Unrecognized notification format: {0}")]
    UnrecognizedFormat(String),

    #[error("No assignment for provider {provider} on device {device_id}")]
    NoAssignment { provider: String, device_id: String },

    #[error("Not authenticated: {0}")]
    Unauthenticated(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether this failure should stop a delivery pass instead of moving on
    /// to the next pending record.
    pub fn is_systemic(&self) -> bool {
        matches!(self, Self::Unauthenticated(_))
    }

    /// Whether this failure came out of the parsing stage
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Self::MalformedNumber(_) | Self::UnrecognizedFormat(_))
    }
}

/// Core library result type
pub type Result<T> = std::result::Result<T, Error>;
