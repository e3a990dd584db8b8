//! Project → compute writes.
//!
//! The project archives every cached file it changed since the watermark; the
//! engine unpacks that archive into the upper layer with the keep-newer rule.

use crate::cleanup::remove_recursive;
use crate::enumerate::Exclusions;
use crate::error::SyncResult;
use crate::extract::{extract_keep_newer, ExtractSummary};
use crate::layout::Layout;
use crate::transport::ProjectTransport;
use chrono::{DateTime, SecondsFormat, Utc};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use unionsync_protocol::ExecRequest;

/// Formats the watermark the way `tar --newer` expects (epoch when unset).
pub fn newer_than_arg(watermark: Option<SystemTime>) -> String {
    let time: DateTime<Utc> = watermark.unwrap_or(UNIX_EPOCH).into();
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds the command that archives project files newer than `watermark`.
///
/// Only paths in the compute "all files" list are considered, so the project
/// never pushes files the cache does not hold. The POSIX format carries
/// sub-second mtimes for the keep-newer comparison.
pub fn project_archive_command(
    layout: &Layout,
    exclusions: &Exclusions,
    watermark: Option<SystemTime>,
    timeout: Duration,
) -> ExecRequest {
    let mut args = vec![
        "-zcf".to_string(),
        layout.project_archive_rel(),
        "--format=posix".to_string(),
    ];
    args.extend(exclusions.tar_args());
    args.extend([
        "--newer".to_string(),
        newer_than_arg(watermark),
        "--verbatim-files-from".to_string(),
        "--files-from".to_string(),
        layout.all_list_rel(),
    ]);
    ExecRequest::new("tar", args, timeout.as_secs()).allow_nonzero_exit()
}

/// Pulls project changes into the upper layer.
///
/// A non-zero archiver exit is only a warning: files changing while being read
/// still leave a usable archive. A successful archiver that left no archive
/// means nothing changed. The transient archive is removed afterwards.
pub fn pull_project_changes<T: ProjectTransport + ?Sized>(
    layout: &Layout,
    exclusions: &Exclusions,
    transport: &T,
    watermark: Option<SystemTime>,
    timeout: Duration,
) -> SyncResult<ExtractSummary> {
    let request = project_archive_command(layout, exclusions, watermark, timeout);
    debug!(command = %request.display(), "archiving project changes");
    let output = transport.exec(&request)?;
    if !output.is_success() {
        warn!(
            exit_code = output.exit_code,
            stderr = %output.stderr.trim(),
            "project archiver reported errors"
        );
    }

    let archive = layout.project_archive();
    if output.is_success() && !archive.exists() {
        debug!("project produced no archive");
        return Ok(ExtractSummary::empty());
    }
    let summary = extract_keep_newer(&archive, layout.upper());
    let _ = remove_recursive(&archive).tolerate(&archive);
    let summary = summary?;

    if summary.unpacked > 0 || summary.conflicts > 0 {
        info!(
            unpacked = summary.unpacked,
            kept_newer = summary.kept_newer,
            conflicts = summary.conflicts,
            "pulled project changes"
        );
    }
    Ok(summary)
}
