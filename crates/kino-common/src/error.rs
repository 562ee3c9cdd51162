//! Common error types used throughout kino.
//!
//! Covers the failure cases shared by every crate: missing files, paths that
//! escape the media root, bad client input, and I/O failures.

/// Common error type for kino.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested file or resource was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The path resolves outside the configured media root.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// An I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid input was provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new Forbidden error.
    pub fn forbidden<S: Into<String>>(msg: S) -> Self {
        Self::Forbidden(msg.into())
    }

    /// Create a new InvalidInput error.
    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Result type alias using the common Error type.
pub type Result<T> = std::result::Result<T, Error>;
