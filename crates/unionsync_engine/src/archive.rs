//! Compressed archive of edited files, built locally then copied to the project.
//!
//! The archive is always created on the upper layer's fast storage first.
//! Writing it directly to the mount would take long enough for concurrent
//! file activity to break it, and every byte written there is metered.

use crate::config::RetryConfig;
use crate::enumerate::{enumerate, Exclusions, FileList, ListKind};
use crate::error::{IoResultExt, SyncError, SyncResult};
use crate::layout::Layout;
use crate::retry::retry_with_backoff;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info};

/// An archive that reached the project working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHandle {
    /// Location through the mount.
    pub path: PathBuf,
    /// Location relative to the project root.
    pub project_path: String,
    /// Number of archived entries.
    pub entries: usize,
}

/// Removes the wrapped file when dropped.
struct Staged(PathBuf);

impl Drop for Staged {
    fn drop(&mut self) {
        match fs::remove_file(&self.0) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => debug!(path = %self.0.display(), error = %err, "failed to remove staged archive"),
        }
    }
}

/// Archives exactly the paths in `edited`, then copies the result to the project.
///
/// A failed build is retried per `retry`; before each retry the edited list is
/// re-enumerated from the same `watermark`, since the failure usually means a
/// listed file was renamed or removed. The local staging file is removed in
/// every case.
pub fn build(
    layout: &Layout,
    exclusions: &Exclusions,
    retry: &RetryConfig,
    edited: FileList,
    watermark: Option<SystemTime>,
) -> SyncResult<ArchiveHandle> {
    let staged = Staged(layout.staged_archive());
    let mut list = edited;

    let entries = retry_with_backoff(retry, "archive build", |attempt| {
        if attempt > 0 {
            list = enumerate(layout, exclusions, ListKind::Edited, watermark)?;
        }
        write_archive(layout.upper(), list.entries(), &staged.0)?;
        Ok(list.len())
    })?;

    let target = layout.compute_archive();
    info!(entries, target = %target.display(), "copying edited files to project");
    fs::copy(&staged.0, &target).at_path(&target)?;
    File::open(&target)
        .and_then(|f| f.sync_all())
        .at_path(&target)?;

    Ok(ArchiveHandle {
        path: target,
        project_path: layout.compute_archive_rel(),
        entries,
    })
}

/// Writes a gzip-compressed tar of `entries` (relative to `root`) to `dest`.
///
/// Symlinks are stored as links and a directory as its own header, never its
/// contents. Any failure, including a listed file that no
/// longer exists, is reported as a retryable [`SyncError::Archive`].
pub fn write_archive(root: &Path, entries: &[String], dest: &Path) -> SyncResult<()> {
    let archive_err = |what: &str, err: std::io::Error| SyncError::Archive(format!("{what}: {err}"));

    let file = File::create(dest).map_err(|e| archive_err(&dest.display().to_string(), e))?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    for entry in entries {
        builder
            .append_path_with_name(root.join(entry), entry)
            .map_err(|e| archive_err(entry, e))?;
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| archive_err("finishing tar stream", e))?;
    let mut out = encoder
        .finish()
        .map_err(|e| archive_err("finishing gzip stream", e))?;
    out.flush().map_err(|e| archive_err("flushing archive", e))?;
    Ok(())
}
