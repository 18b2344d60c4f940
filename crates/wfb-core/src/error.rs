//! Error types for the waveform event browser.

use thiserror::Error;

/// Result type alias using the browser's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for event, series and waveform operations.
///
/// The variants fall into the classes a caller needs to tell apart when
/// mapping failures onto a response: bad input ([`Error::InvalidInput`],
/// [`Error::NotFound`], [`Error::EventNotFound`]) versus storage or data
/// corruption ([`Error::Database`], [`Error::DataIntegrity`],
/// [`Error::Referential`]).
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Event not found
    #[error("Event not found: {0}")]
    EventNotFound(i64),

    /// Malformed input rejected at construction time
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A NOT NULL column arrived null, or a stored value could not be interpreted
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// Lookup by name failed or matched more rows than allowed
    #[error("Referential error: {0}")]
    Referential(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure was caused by the caller's request rather than by
    /// storage or server state.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::EventNotFound(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
