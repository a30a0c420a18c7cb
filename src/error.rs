//! Centralized error types for mailbackup.

use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the mailbackup library.
///
/// Only [`BackupError::Config`] is fatal to the process. Connection and
/// authentication failures end a single account session; everything else is
/// logged and skipped at message or attachment granularity.
#[derive(Error, Debug)]
pub enum BackupError {
    /// The configuration is missing, unreadable or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The mail server could not be reached or the TLS handshake failed.
    #[error("Connection to {host}:{port} failed: {reason}")]
    Connection {
        host: String,
        port: u16,
        reason: String,
    },

    /// The server rejected the credentials.
    #[error("Authentication failed for '{user}': {reason}")]
    Authentication { user: String, reason: String },

    /// A protocol command failed after the session was established.
    #[error("{command} failed: {reason}")]
    Protocol { command: String, reason: String },

    /// A message could not be parsed structurally.
    #[error("Message decoding failed: {0}")]
    Decode(String),

    /// A single attachment could not be stored.
    #[error("Attachment '{filename}' not stored: {reason}")]
    Attachment { filename: String, reason: String },

    /// An export writer failed.
    #[error("Export error: {0}")]
    Export(String),

    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The operation was interrupted by a shutdown request.
    #[error("Operation cancelled by shutdown request")]
    Cancelled,
}

/// Convenience alias for `Result<T, BackupError>`.
pub type Result<T> = std::result::Result<T, BackupError>;

impl BackupError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a `Protocol` variant for a failed command.
    pub fn protocol(command: impl Into<String>, reason: impl ToString) -> Self {
        Self::Protocol {
            command: command.into(),
            reason: reason.to_string(),
        }
    }

    /// `true` for errors that end a whole account session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Authentication { .. } | Self::Config(_)
        )
    }
}
