//! Error types for the sync engine.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Invalid configuration, detected before scheduling starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem error on a known path.
    #[error("io error on {}: {source}", path.display())]
    Fs {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Error while walking a directory tree.
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Building the local archive failed, usually because files changed mid-read.
    #[error("archive build failed: {0}")]
    Archive(String),

    /// Extracting an archive failed.
    #[error("extraction of {archive} failed (exit {exit_code}): {stderr}")]
    Extract {
        /// Archive being extracted.
        archive: String,
        /// Exit status reported by the extractor.
        exit_code: i32,
        /// Diagnostic output.
        stderr: String,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The project rejected or failed a remote call.
    #[error("remote call {function} failed: {message}")]
    Remote {
        /// Remote function name.
        function: String,
        /// Error message from the project side.
        message: String,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(#[from] unionsync_protocol::ProtocolError),

    /// A retried operation kept failing.
    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Operation name.
        operation: &'static str,
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        last: Box<SyncError>,
    },

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Timeout.
    #[error("operation timed out")]
    Timeout,

    /// Not connected.
    #[error("not connected to project")]
    NotConnected,
}

impl SyncError {
    /// Wraps an I/O error with the path it concerns.
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Fs {
            path: path.into(),
            source,
        }
    }

    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Archive(_) | SyncError::Extract { .. } => true,
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            _ => false,
        }
    }
}

/// Extension for attaching a path to `std::io::Result`.
pub(crate) trait IoResultExt<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> SyncResult<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> SyncResult<T> {
        self.map_err(|source| SyncError::fs(path, source))
    }
}
