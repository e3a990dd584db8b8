//! Compute → project deletes, tracked through overlay whiteout markers.
//!
//! The union filesystem records a delete in the upper layer by creating
//! `<marker dir>/<path>_HIDDEN~`. Markers are reported to the project with
//! their mtime as the deletion time; the project decides whether to delete
//! (it keeps files edited after that time). Markers are cache state and are
//! removed once the project acknowledged them.

use crate::cleanup::remove_recursive;
use crate::error::{IoResultExt, SyncResult};
use crate::layout::{Layout, WHITEOUT_SUFFIX};
use crate::transport::ProjectTransport;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};
use unionsync_protocol::{DeleteWhiteoutsRequest, WhiteoutMap};
use walkdir::WalkDir;

/// One deletion recorded by the union filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhiteoutRecord {
    /// Deleted path, relative to the upper root.
    pub path: String,
    /// Marker mtime in milliseconds since the epoch.
    pub deleted_at_ms: u64,
    /// Marker location.
    pub marker: PathBuf,
}

/// Lists every marker under `dir`; a missing directory yields nothing.
pub fn scan(dir: &Path) -> SyncResult<Vec<WhiteoutRecord>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if err.io_error().is_some_and(|e| e.kind() == ErrorKind::NotFound) => {
                continue
            }
            Err(err) => return Err(err.into()),
        };

        let Some(rel) = entry.path().strip_prefix(dir).ok().and_then(Path::to_str) else {
            warn!(marker = %entry.path().display(), "skipping unreadable whiteout name");
            continue;
        };
        let Some(path) = rel.strip_suffix(WHITEOUT_SUFFIX) else {
            continue;
        };

        let modified = match entry.metadata() {
            Ok(meta) => meta.modified().at_path(entry.path())?,
            Err(err) if err.io_error().is_some_and(|e| e.kind() == ErrorKind::NotFound) => {
                continue
            }
            Err(err) => return Err(err.into()),
        };
        let deleted_at_ms = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);

        records.push(WhiteoutRecord {
            path: path.to_string(),
            deleted_at_ms,
            marker: entry.path().to_path_buf(),
        });
    }
    Ok(records)
}

/// Reports whiteouts to the project, then removes the markers.
///
/// Markers are only removed after the project acknowledged the report, so a
/// failed call leaves them for the next cycle. Returns the number reported.
pub fn sync_deletes_to_project<T: ProjectTransport + ?Sized>(
    layout: &Layout,
    transport: &T,
) -> SyncResult<usize> {
    let records = scan(&layout.whiteout_dir())?;
    if records.is_empty() {
        debug!("no whiteouts to report");
        return Ok(0);
    }

    let whiteouts: WhiteoutMap = records
        .iter()
        .map(|r| (r.path.clone(), r.deleted_at_ms))
        .collect();
    let ack = transport.delete_whiteouts(&DeleteWhiteoutsRequest::new(whiteouts))?;
    info!(
        reported = records.len(),
        deleted = ack.deleted,
        kept = ack.kept,
        "project applied compute deletes"
    );

    for record in &records {
        let _ = remove_recursive(&record.marker).tolerate(&record.marker);
    }
    Ok(records.len())
}
