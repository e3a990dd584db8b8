//! Configuration for the sync engine.

use crate::error::{SyncError, SyncResult};
use std::path::PathBuf;
use std::time::Duration;

/// Default seconds between sync cycles.
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(20);

/// Default limit for commands run in the project (large trees over a slow mount).
pub const DEFAULT_EXEC_TIMEOUT: Duration = Duration::from_secs(1800);

/// Characters GNU tar reads as wildcards in an `--exclude` pattern.
const WILDCARD_CHARS: [char; 4] = ['*', '?', '[', '\\'];

/// Configuration for a compute server's overlay cache.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Lower layer: the project home directory as mounted on the compute server.
    pub lower: PathBuf,
    /// Upper layer: fast local storage receiving all writes.
    pub upper: PathBuf,
    /// Mount point of the union filesystem.
    pub mount: PathBuf,
    /// Compute server id, namespaces the project-side working directory.
    pub compute_server_id: u32,
    /// Time between sync cycles.
    pub sync_interval: Duration,
    /// Relative paths excluded from sync in both directions.
    pub exclude: Vec<String>,
    /// Retry policy for building the local archive.
    pub archive_retry: RetryConfig,
    /// Retry policy for extracting the archive in the project.
    pub extract_retry: RetryConfig,
    /// Timeout for each command run in the project.
    pub exec_timeout: Duration,
}

impl EngineConfig {
    /// Creates a new engine configuration.
    pub fn new(
        lower: impl Into<PathBuf>,
        upper: impl Into<PathBuf>,
        mount: impl Into<PathBuf>,
        compute_server_id: u32,
    ) -> Self {
        Self {
            lower: lower.into(),
            upper: upper.into(),
            mount: mount.into(),
            compute_server_id,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            exclude: Vec::new(),
            archive_retry: RetryConfig::archive_default(),
            extract_retry: RetryConfig::extract_default(),
            exec_timeout: DEFAULT_EXEC_TIMEOUT,
        }
    }

    /// Sets the interval between sync cycles.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the excluded relative paths.
    pub fn with_exclude<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the archive build retry policy.
    pub fn with_archive_retry(mut self, retry: RetryConfig) -> Self {
        self.archive_retry = retry;
        self
    }

    /// Sets the remote extraction retry policy.
    pub fn with_extract_retry(mut self, retry: RetryConfig) -> Self {
        self.extract_retry = retry;
        self
    }

    /// Sets the timeout for commands run in the project.
    pub fn with_exec_timeout(mut self, timeout: Duration) -> Self {
        self.exec_timeout = timeout;
        self
    }

    /// Checks the settings that paths alone do not cover.
    ///
    /// Exclusions are literal path prefixes locally but patterns for the
    /// project's archiver, so wildcard characters are refused to keep both
    /// directions excluding the same paths.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync_interval.is_zero() {
            return Err(SyncError::Config("sync interval must be positive".into()));
        }
        if let Some(path) = self.exclude.iter().find(|p| p.contains(WILDCARD_CHARS)) {
            return Err(SyncError::Config(format!(
                "exclusion {path:?} contains a wildcard character"
            )));
        }
        self.archive_retry.validate("archive retry")?;
        self.extract_retry.validate("extract retry")
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with a constant delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            backoff_multiplier: 1.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self::fixed(1, Duration::ZERO)
    }

    /// Archive builds race with file activity: 20 attempts, 500ms growing by 1.3x up to 7.5s.
    pub fn archive_default() -> Self {
        Self::new(20)
            .with_initial_delay(Duration::from_millis(500))
            .with_backoff_multiplier(1.3)
            .with_max_delay(Duration::from_millis(7500))
    }

    /// Remote extraction: 5 attempts, 250ms apart.
    pub fn extract_default() -> Self {
        Self::fixed(5, Duration::from_millis(250))
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Rejects policies that cannot produce a delay schedule.
    pub fn validate(&self, name: &str) -> SyncResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(SyncError::Config(format!(
                "{name}: backoff multiplier must be a finite number >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }

    /// Calculates the delay before a given attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}
