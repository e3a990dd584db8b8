//! Error types for the project side.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for project operations.
pub type ProjectResult<T> = Result<T, ProjectError>;

/// Errors that can occur while handling a call.
#[derive(Error, Debug)]
pub enum ProjectError {
    /// Invalid request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A request path resolves outside the project root.
    #[error("path escapes the project root: {0}")]
    PathEscape(String),

    /// A command exited with a non-zero status.
    #[error("command `{command}` exited with {exit_code}: {stderr}")]
    Exec {
        /// Command line.
        command: String,
        /// Exit status.
        exit_code: i32,
        /// Captured standard error.
        stderr: String,
    },

    /// A command ran past its timeout and was killed.
    #[error("command `{command}` timed out after {secs}s")]
    ExecTimeout {
        /// Command line.
        command: String,
        /// Applied timeout.
        secs: u64,
    },

    /// I/O error on a known path.
    #[error("io error on {}: {source}", path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed payload.
    #[error("protocol error: {0}")]
    Protocol(#[from] unionsync_protocol::ProtocolError),
}

impl ProjectError {
    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Returns true if the caller sent something unacceptable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ProjectError::InvalidRequest(_) | ProjectError::PathEscape(_) | ProjectError::Protocol(_)
        )
    }
}
