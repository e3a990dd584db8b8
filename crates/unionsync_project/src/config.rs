//! Project configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Upper bound for any single `exec` call.
pub const DEFAULT_MAX_EXEC_TIMEOUT: Duration = Duration::from_secs(3600);

/// Configuration for the project side.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// Project root; every request path is relative to it.
    pub root: PathBuf,
    /// Cap applied to requested exec timeouts.
    pub max_exec_timeout: Duration,
}

impl ProjectConfig {
    /// Creates a new project configuration.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_exec_timeout: DEFAULT_MAX_EXEC_TIMEOUT,
        }
    }

    /// Sets the exec timeout cap.
    pub fn with_max_exec_timeout(mut self, timeout: Duration) -> Self {
        self.max_exec_timeout = timeout;
        self
    }

    /// Effective timeout for a request asking for `requested_secs` (0 = the cap).
    pub fn exec_timeout(&self, requested_secs: u64) -> Duration {
        if requested_secs == 0 {
            self.max_exec_timeout
        } else {
            Duration::from_secs(requested_secs).min(self.max_exec_timeout)
        }
    }
}
