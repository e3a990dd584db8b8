//! Watermark persisted as the mtime of a sentinel file.

use crate::error::{IoResultExt, SyncResult};
use filetime::FileTime;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Everything modified before this instant has been reconciled.
#[derive(Debug, Clone)]
pub struct Watermark {
    sentinel: PathBuf,
}

impl Watermark {
    /// Creates a watermark backed by `sentinel`.
    pub fn new(sentinel: impl Into<PathBuf>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    /// Path of the sentinel file.
    pub fn path(&self) -> &Path {
        &self.sentinel
    }

    /// Reads the watermark; `None` before the first successful cycle.
    pub fn read(&self) -> SyncResult<Option<SystemTime>> {
        match fs::metadata(&self.sentinel) {
            Ok(meta) => Ok(Some(meta.modified().at_path(&self.sentinel)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(crate::error::SyncError::fs(&self.sentinel, err)),
        }
    }

    /// Moves the watermark to `time`, creating the sentinel if needed.
    pub fn advance(&self, time: SystemTime) -> SyncResult<()> {
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.sentinel)
            .at_path(&self.sentinel)?;
        filetime::set_file_mtime(&self.sentinel, FileTime::from_system_time(time))
            .at_path(&self.sentinel)
    }
}
