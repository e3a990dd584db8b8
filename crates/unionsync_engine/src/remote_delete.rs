//! Project → compute deletes.
//!
//! The project compares the compute "all files" list against its own tree and
//! answers with the paths that no longer exist there. Those paths are removed
//! from the upper layer so the mount stops showing them, unless the cached
//! file or link changed after the watermark: such an entry has not been
//! reconciled with the project yet, so its absence there is not a delete.

use crate::cleanup::remove_recursive;
use crate::error::SyncResult;
use crate::layout::Layout;
use crate::transport::ProjectTransport;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use unionsync_protocol::FilesToDeleteRequest;

/// Counts from one delete pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteDeleteSummary {
    /// Paths removed (or already absent).
    pub removed: usize,
    /// Paths refused because they point outside the cached tree.
    pub rejected: usize,
    /// Paths left alone because they changed after the watermark.
    pub deferred: usize,
    /// Paths whose removal failed.
    pub failed: usize,
}

/// Resolves a project-supplied path under `upper`.
///
/// Rejects absolute paths, parent components, and anything under a hidden
/// top-level directory (the overlay's own bookkeeping lives there).
pub fn resolve_in_upper(upper: &Path, rel: &str) -> Option<PathBuf> {
    let rel = rel.trim_start_matches("./");
    let mut out = upper.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => {
                if depth == 0 && part.to_str().map_or(true, |s| s.starts_with('.')) {
                    return None;
                }
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (depth > 0).then_some(out)
}

/// Asks the project for deleted paths and removes them from the upper layer.
///
/// A failed call removes nothing. Individual removals are best effort.
/// Files and links modified after `watermark` are kept; with no watermark
/// nothing has been reconciled yet and every one is kept. Directories are not
/// checked, their mtime moves whenever a child is replaced.
pub fn apply_project_deletes<T: ProjectTransport + ?Sized>(
    layout: &Layout,
    transport: &T,
    watermark: Option<SystemTime>,
) -> SyncResult<RemoteDeleteSummary> {
    let response = transport.files_to_delete(&FilesToDeleteRequest::new(layout.all_list_rel()))?;

    let mut summary = RemoteDeleteSummary::default();
    for rel in &response.paths {
        let Some(path) = resolve_in_upper(layout.upper(), rel) else {
            warn!(path = %rel, "refusing to delete path outside the cache");
            summary.rejected += 1;
            continue;
        };
        if changed_since(&path, watermark) {
            debug!(path = %path.display(), "keeping entry newer than the watermark");
            summary.deferred += 1;
            continue;
        }
        debug!(path = %path.display(), "removing file deleted in project");
        if remove_recursive(&path).tolerate(&path) {
            summary.removed += 1;
        } else {
            summary.failed += 1;
        }
    }

    if !response.paths.is_empty() {
        info!(
            removed = summary.removed,
            rejected = summary.rejected,
            deferred = summary.deferred,
            failed = summary.failed,
            "applied project deletes"
        );
    }
    Ok(summary)
}

/// True if the non-directory at `path` (not followed) changed after `watermark`.
fn changed_since(path: &Path, watermark: Option<SystemTime>) -> bool {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return false;
    };
    if meta.is_dir() {
        return false;
    }
    match meta.modified() {
        Ok(modified) => watermark.map_or(true, |w| modified > w),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use filetime::FileTime;
    use std::time::Duration;
    use tempfile::TempDir;
    use unionsync_protocol::RemoteFunction;

    fn setup() -> (TempDir, Layout) {
        let dir = TempDir::new().unwrap();
        let layout = Layout::new(
            dir.path().join("lower"),
            dir.path().join("upper"),
            dir.path().join("home"),
            3,
        )
        .unwrap();
        fs::create_dir_all(layout.upper()).unwrap();
        (dir, layout)
    }

    fn old_entry(path: &Path) {
        filetime::set_symlink_file_times(
            path,
            FileTime::from_unix_time(1_000, 0),
            FileTime::from_unix_time(1_000, 0),
        )
        .unwrap();
    }

    fn watermark() -> Option<SystemTime> {
        Some(SystemTime::UNIX_EPOCH + Duration::from_secs(2_000))
    }

    #[test]
    fn resolve_rejects_escapes_and_bookkeeping() {
        let upper = Path::new("/cache/upper");
        assert_eq!(
            resolve_in_upper(upper, "./src/a.rs"),
            Some(upper.join("src/a.rs"))
        );
        assert_eq!(resolve_in_upper(upper, "b.txt"), Some(upper.join("b.txt")));
        assert_eq!(
            resolve_in_upper(upper, "src/.hidden"),
            Some(upper.join("src/.hidden"))
        );
        assert_eq!(resolve_in_upper(upper, "/etc/passwd"), None);
        assert_eq!(resolve_in_upper(upper, "../outside"), None);
        assert_eq!(resolve_in_upper(upper, "src/../../outside"), None);
        assert_eq!(resolve_in_upper(upper, ".unionfs-fuse/x_HIDDEN~"), None);
        assert_eq!(resolve_in_upper(upper, ".compute-server/last"), None);
        assert_eq!(resolve_in_upper(upper, "./"), None);
        assert_eq!(resolve_in_upper(upper, ""), None);
    }

    #[test]
    fn removes_reported_paths() {
        let (_dir, layout) = setup();
        let upper = layout.upper();
        fs::write(upper.join("gone.txt"), "x").unwrap();
        fs::create_dir_all(upper.join("olddir/sub")).unwrap();
        fs::write(upper.join("olddir/sub/f"), "y").unwrap();
        fs::write(upper.join("kept.txt"), "z").unwrap();
        for entry in ["gone.txt", "olddir", "kept.txt"] {
            old_entry(&upper.join(entry));
        }

        let transport = MockTransport::new();
        transport.set_files_to_delete(vec![
            "gone.txt".into(),
            "olddir".into(),
            "never-existed".into(),
            "../escape".into(),
        ]);

        let summary = apply_project_deletes(&layout, &transport, watermark()).unwrap();
        assert_eq!(
            summary,
            RemoteDeleteSummary {
                removed: 3,
                rejected: 1,
                deferred: 0,
                failed: 0
            }
        );
        assert!(!upper.join("gone.txt").exists());
        assert!(!upper.join("olddir").exists());
        assert!(upper.join("kept.txt").exists());

        let requests = transport.files_to_delete_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].all_compute_files,
            ".compute-servers/3/compute-all-files-list"
        );
    }

    #[test]
    fn failed_call_deletes_nothing() {
        let (_dir, layout) = setup();
        fs::write(layout.upper().join("gone.txt"), "x").unwrap();
        let transport = MockTransport::new();
        transport.set_files_to_delete(vec!["gone.txt".into()]);
        transport.fail(RemoteFunction::FilesToDelete, "connection reset");

        assert!(apply_project_deletes(&layout, &transport, watermark()).is_err());
        assert!(layout.upper().join("gone.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn entries_changed_after_the_watermark_are_kept() {
        let (_dir, layout) = setup();
        let upper = layout.upper();
        fs::write(upper.join("fresh.txt"), "f").unwrap();
        std::os::unix::fs::symlink("target.txt", upper.join("link")).unwrap();
        fs::write(upper.join("stale.txt"), "s").unwrap();
        old_entry(&upper.join("stale.txt"));
        // a recently touched directory is still removed
        fs::create_dir_all(upper.join("dir")).unwrap();

        let transport = MockTransport::new();
        transport.set_files_to_delete(vec![
            "fresh.txt".into(),
            "link".into(),
            "stale.txt".into(),
            "dir".into(),
        ]);

        let summary = apply_project_deletes(&layout, &transport, watermark()).unwrap();
        assert_eq!(summary.deferred, 2);
        assert_eq!(summary.removed, 2);
        assert!(upper.join("fresh.txt").exists());
        // the dangling link itself is kept
        assert!(fs::symlink_metadata(upper.join("link")).is_ok());
        assert!(!upper.join("stale.txt").exists());
        assert!(!upper.join("dir").exists());
    }

    #[test]
    fn nothing_is_deleted_before_the_first_watermark() {
        let (_dir, layout) = setup();
        fs::write(layout.upper().join("a.txt"), "a").unwrap();
        old_entry(&layout.upper().join("a.txt"));
        let transport = MockTransport::new();
        transport.set_files_to_delete(vec!["a.txt".into()]);

        let summary = apply_project_deletes(&layout, &transport, None).unwrap();
        assert_eq!(summary.deferred, 1);
        assert!(layout.upper().join("a.txt").exists());
    }
}
