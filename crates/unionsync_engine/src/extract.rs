//! Native extraction with the keep-newer conflict rule.

use crate::error::{IoResultExt, SyncError, SyncResult};
use filetime::FileTime;
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// How an extraction ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Every entry was applied or deliberately kept.
    Success,
    /// Some entries collided (e.g. a file where a directory exists); the rest
    /// were applied. Collisions are left for the next edit to resolve.
    ConflictsOnly,
    /// The extraction did not complete.
    Fatal,
}

impl ExtractOutcome {
    /// True for outcomes the cycle accepts.
    pub fn is_acceptable(&self) -> bool {
        !matches!(self, ExtractOutcome::Fatal)
    }
}

/// Counts from a local extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractSummary {
    /// Overall outcome.
    pub outcome: ExtractOutcome,
    /// Entries written.
    pub unpacked: u64,
    /// Entries skipped because the existing copy was strictly newer.
    pub kept_newer: u64,
    /// Entries that could not be applied.
    pub conflicts: u64,
}

impl ExtractSummary {
    /// Summary of an extraction with nothing to apply.
    pub fn empty() -> Self {
        Self {
            outcome: ExtractOutcome::Success,
            unpacked: 0,
            kept_newer: 0,
            conflicts: 0,
        }
    }
}

/// Extracts a gzip-compressed tar into `dest`.
///
/// An existing non-directory whose mtime is strictly newer than the incoming
/// entry is kept. Entries that escape `dest` or collide with an incompatible
/// existing entry are skipped and counted. A missing or corrupt archive fails.
///
/// When the entry carries a PAX `mtime` record the comparison uses its full
/// precision and the written entry gets that exact mtime. Otherwise only
/// whole seconds are compared, so a local copy less than a second newer than
/// the incoming entry is replaced.
pub fn extract_keep_newer(archive: &Path, dest: &Path) -> SyncResult<ExtractSummary> {
    let file = File::open(archive).at_path(archive)?;
    let mut tar = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    tar.set_preserve_mtime(true);
    tar.set_overwrite(true);

    let corrupt = |err: std::io::Error| SyncError::Extract {
        archive: archive.display().to_string(),
        exit_code: 2,
        stderr: err.to_string(),
    };

    let mut summary = ExtractSummary::empty();

    for entry in tar.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let name = entry.path().map_err(corrupt)?.into_owned();

        let Some(rel) = contained(&name) else {
            warn!(entry = %name.display(), "refusing entry outside destination");
            summary.conflicts += 1;
            continue;
        };

        let is_dir = entry.header().entry_type().is_dir();
        let incoming = incoming_mtime(&mut entry).map_err(corrupt)?;
        if !is_dir {
            if let Ok(existing) = fs::symlink_metadata(dest.join(&rel)) {
                let local = FileTime::from_last_modification_time(&existing);
                if incoming.is_older_than(local) {
                    debug!(entry = %rel.display(), "keeping newer local copy");
                    summary.kept_newer += 1;
                    continue;
                }
            }
        }

        match entry.unpack_in(dest) {
            Ok(true) => {
                summary.unpacked += 1;
                if let (false, IncomingMtime::Precise(mtime)) = (is_dir, incoming) {
                    let target = dest.join(&rel);
                    if let Err(err) = filetime::set_symlink_file_times(&target, mtime, mtime) {
                        debug!(entry = %rel.display(), error = %err, "failed to set precise mtime");
                    }
                }
            }
            Ok(false) => {
                warn!(entry = %rel.display(), "entry skipped by extractor");
                summary.conflicts += 1;
            }
            Err(err) => {
                warn!(entry = %rel.display(), error = %err, "entry collides with existing path");
                summary.conflicts += 1;
            }
        }
    }

    if summary.conflicts > 0 {
        summary.outcome = ExtractOutcome::ConflictsOnly;
    }
    Ok(summary)
}

/// Modification time of an archive entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IncomingMtime {
    /// From a PAX `mtime` record, with sub-second precision.
    Precise(FileTime),
    /// From the ustar header, whole seconds only.
    Seconds(i64),
}

impl IncomingMtime {
    /// True if `local` is strictly newer at the precision available.
    fn is_older_than(self, local: FileTime) -> bool {
        match self {
            IncomingMtime::Precise(incoming) => local > incoming,
            IncomingMtime::Seconds(incoming) => local.unix_seconds() > incoming,
        }
    }
}

fn incoming_mtime<R: Read>(entry: &mut tar::Entry<'_, R>) -> io::Result<IncomingMtime> {
    if let Some(extensions) = entry.pax_extensions()? {
        for extension in extensions {
            let extension = extension?;
            if extension.key() == Ok("mtime") {
                if let Some(mtime) = extension.value().ok().and_then(parse_pax_time) {
                    return Ok(IncomingMtime::Precise(mtime));
                }
            }
        }
    }
    let secs = entry.header().mtime()?;
    Ok(IncomingMtime::Seconds(i64::try_from(secs).unwrap_or(i64::MAX)))
}

/// Parses a PAX time value such as `1700000000.123456789`.
fn parse_pax_time(value: &str) -> Option<FileTime> {
    let (secs, fraction) = value.split_once('.').unwrap_or((value, ""));
    let secs: i64 = secs.parse().ok()?;
    if secs < 0 || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let digits: String = fraction.chars().take(9).collect();
    let nanos = if digits.is_empty() {
        0
    } else {
        digits.parse::<u32>().ok()? * 10u32.pow(9 - digits.len() as u32)
    };
    Some(FileTime::from_unix_time(secs, nanos))
}

/// Normalizes an archive member name, rejecting anything that leaves the root.
fn contained(name: &Path) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    (!rel.as_os_str().is_empty()).then_some(rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::write_archive;
    use tempfile::TempDir;

    fn write_at(path: &Path, content: &str, secs: i64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
    }

    /// Archives one file whose header holds `secs` and, optionally, a PAX mtime.
    fn pack_with_pax(out: &Path, name: &str, content: &str, secs: u64, pax: Option<&str>) {
        let file = File::create(out).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        if let Some(pax) = pax {
            builder
                .append_pax_extensions([("mtime", pax.as_bytes())])
                .unwrap();
        }
        let mut header = tar::Header::new_ustar();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(secs);
        header.set_cksum();
        builder
            .append_data(&mut header, name, content.as_bytes())
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    fn set_mtime(path: &Path, secs: i64, nanos: u32) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, nanos)).unwrap();
    }

    fn pack(src: &Path, entries: &[&str], out: &Path) {
        let entries: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        write_archive(src, &entries, out).unwrap();
    }

    #[test]
    fn newer_destination_copy_wins() {
        let dir = TempDir::new().unwrap();
        let compute = dir.path().join("compute");
        let project = dir.path().join("project");
        let archive = dir.path().join("edited.tar.gz");

        write_at(&compute.join("x.txt"), "compute edit", 1_000);
        write_at(&project.join("x.txt"), "project edit", 2_000);
        pack(&compute, &["x.txt"], &archive);

        let summary = extract_keep_newer(&archive, &project).unwrap();
        assert_eq!(summary.kept_newer, 1);
        assert_eq!(summary.unpacked, 0);
        assert_eq!(summary.outcome, ExtractOutcome::Success);
        assert_eq!(fs::read_to_string(project.join("x.txt")).unwrap(), "project edit");
    }

    #[test]
    fn older_destination_copy_is_replaced_with_source_mtime() {
        let dir = TempDir::new().unwrap();
        let compute = dir.path().join("compute");
        let project = dir.path().join("project");
        let archive = dir.path().join("edited.tar.gz");

        write_at(&compute.join("d/y.txt"), "new", 3_000);
        write_at(&project.join("d/y.txt"), "old", 1_000);
        pack(&compute, &["d/y.txt"], &archive);

        let summary = extract_keep_newer(&archive, &project).unwrap();
        assert_eq!(summary.unpacked, 1);
        assert_eq!(fs::read_to_string(project.join("d/y.txt")).unwrap(), "new");
        let meta = fs::metadata(project.join("d/y.txt")).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta).unix_seconds(), 3_000);
    }

    #[test]
    fn equal_mtime_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        let archive = dir.path().join("a.tar.gz");

        write_at(&src.join("f"), "incoming", 500);
        write_at(&dst.join("f"), "existing", 500);
        pack(&src, &["f"], &archive);

        extract_keep_newer(&archive, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("f")).unwrap(), "incoming");
    }

    #[test]
    fn pax_mtime_breaks_sub_second_ties() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("dst");
        let archive = dir.path().join("a.tar.gz");
        fs::create_dir_all(&dst).unwrap();

        // local copy is 0.5s newer than the incoming entry
        fs::write(dst.join("f"), "local").unwrap();
        set_mtime(&dst.join("f"), 1_000, 900_000_000);
        pack_with_pax(&archive, "f", "incoming", 1_000, Some("1000.4"));
        let summary = extract_keep_newer(&archive, &dst).unwrap();
        assert_eq!(summary.kept_newer, 1);
        assert_eq!(fs::read_to_string(dst.join("f")).unwrap(), "local");

        // incoming entry is 0.5s newer and keeps its exact mtime
        pack_with_pax(&archive, "f", "incoming", 1_000, Some("1000.95"));
        let summary = extract_keep_newer(&archive, &dst).unwrap();
        assert_eq!(summary.unpacked, 1);
        assert_eq!(fs::read_to_string(dst.join("f")).unwrap(), "incoming");
        let mtime = FileTime::from_last_modification_time(&fs::metadata(dst.join("f")).unwrap());
        assert_eq!(mtime, FileTime::from_unix_time(1_000, 950_000_000));
    }

    #[test]
    fn without_pax_mtime_only_whole_seconds_count() {
        let dir = TempDir::new().unwrap();
        let dst = dir.path().join("dst");
        let archive = dir.path().join("a.tar.gz");
        fs::create_dir_all(&dst).unwrap();

        fs::write(dst.join("f"), "local").unwrap();
        set_mtime(&dst.join("f"), 1_000, 900_000_000);
        pack_with_pax(&archive, "f", "incoming", 1_000, None);

        extract_keep_newer(&archive, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("f")).unwrap(), "incoming");
    }

    #[test]
    fn pax_time_parsing() {
        assert_eq!(parse_pax_time("1000"), Some(FileTime::from_unix_time(1_000, 0)));
        assert_eq!(
            parse_pax_time("1000.5"),
            Some(FileTime::from_unix_time(1_000, 500_000_000))
        );
        assert_eq!(
            parse_pax_time("1700000000.1234567891"),
            Some(FileTime::from_unix_time(1_700_000_000, 123_456_789))
        );
        assert_eq!(parse_pax_time("-5.2"), None);
        assert_eq!(parse_pax_time("12.x"), None);
        assert_eq!(parse_pax_time(""), None);
    }

    #[test]
    fn file_over_directory_is_a_conflict_not_a_failure() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src");
        let dst = dir.path().join("dst");
        let archive = dir.path().join("a.tar.gz");

        write_at(&src.join("clash"), "file", 100);
        write_at(&src.join("fine.txt"), "ok", 100);
        fs::create_dir_all(dst.join("clash/inner")).unwrap();
        filetime::set_file_mtime(dst.join("clash"), FileTime::from_unix_time(50, 0)).unwrap();
        pack(&src, &["clash", "fine.txt"], &archive);

        let summary = extract_keep_newer(&archive, &dst).unwrap();
        assert_eq!(summary.outcome, ExtractOutcome::ConflictsOnly);
        assert_eq!(summary.conflicts, 1);
        assert!(dst.join("clash").is_dir());
        assert_eq!(fs::read_to_string(dst.join("fine.txt")).unwrap(), "ok");
    }

    #[test]
    fn missing_archive_fails() {
        let dir = TempDir::new().unwrap();
        let err = extract_keep_newer(&dir.path().join("nope.tar.gz"), dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::Fs { .. }));
    }

    #[test]
    fn member_names_are_contained() {
        assert_eq!(contained(Path::new("./a/b")), Some(PathBuf::from("a/b")));
        assert_eq!(contained(Path::new("a/../../etc")), None);
        assert_eq!(contained(Path::new("/etc/passwd")), None);
        assert_eq!(contained(Path::new("./")), None);
        assert!(ExtractOutcome::ConflictsOnly.is_acceptable());
        assert!(!ExtractOutcome::Fatal.is_acceptable());
    }
}
