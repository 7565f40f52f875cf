//! Error types for the core library.

use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Search or fetch failed because of the network or the server's answer.
    #[error("Network error: {0}")]
    Network(mailslice_imap::Error),

    /// The server sent data that could not be interpreted.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The persistent store rejected a read or write.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A logic defect: a broken invariant or a result delivered twice.
    #[error("Programming fault: {0}")]
    Fault(String),
}

impl From<mailslice_imap::Error> for Error {
    fn from(err: mailslice_imap::Error) -> Self {
        match err {
            mailslice_imap::Error::Protocol(msg) => Self::Protocol(msg),
            other => Self::Network(other),
        }
    }
}

impl Error {
    /// Returns true for failures that came from talking to the server.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Returns true for failures that only abort the current sync pipeline.
    ///
    /// Storage failures and faults are never recoverable at this layer.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Protocol(_))
    }

    /// Returns true if this error signals a logic defect.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(self, Self::Fault(_))
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
