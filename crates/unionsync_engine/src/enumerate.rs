//! Change enumeration over the upper layer.

use crate::error::{IoResultExt, SyncError, SyncResult};
use crate::layout::Layout;
use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Which enumeration to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    /// Every cached entry (files, directories, links).
    All,
    /// Files, symlinks and empty directories modified after the watermark.
    Edited,
}

/// Paths excluded from sync in both directions.
///
/// Hidden top-level entries are always excluded; they hold the engine's own
/// working directories and the whiteout markers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Exclusions {
    paths: Vec<PathBuf>,
}

impl Exclusions {
    /// Normalizes configured paths (`./a/b/` becomes `a/b`).
    pub fn new<S: AsRef<str>>(paths: &[S]) -> Self {
        let paths = paths
            .iter()
            .map(|p| p.as_ref().trim_start_matches("./").trim_end_matches('/'))
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .collect();
        Self { paths }
    }

    /// Returns true if `rel` (relative to the upper root) must not be synced.
    pub fn is_excluded(&self, rel: &Path) -> bool {
        let hidden = rel
            .components()
            .find(|c| !matches!(c, Component::CurDir))
            .is_some_and(|c| c.as_os_str().to_string_lossy().starts_with('.'));
        hidden || self.paths.iter().any(|p| rel.starts_with(p))
    }

    /// `--exclude` arguments for an archiver run from the project root.
    pub fn tar_args(&self) -> Vec<String> {
        let mut args = vec!["--exclude".to_string(), "./.*".to_string()];
        for path in &self.paths {
            args.push("--exclude".to_string());
            args.push(format!("./{}", path.display()));
        }
        args
    }
}

/// A newline-delimited list of relative paths written for one cycle phase.
#[derive(Debug, Clone)]
pub struct FileList {
    kind: ListKind,
    path: PathBuf,
    entries: Vec<String>,
}

impl FileList {
    /// Which enumeration this is.
    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Where the list is written (absent when empty).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Relative paths, without the `./` prefix used on disk.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing matched.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Walks the upper layer and writes the requested list.
///
/// `Edited` keeps entries strictly newer than `watermark` (all of them when
/// there is none): files and symlinks, plus directories with nothing in
/// them. A directory with children is left out since its files recreate it in
/// the project, and extracting a directory entry over an existing populated
/// one is a conflict. With zero matches no list is written and a stale one
/// is removed.
pub fn enumerate(
    layout: &Layout,
    exclusions: &Exclusions,
    kind: ListKind,
    watermark: Option<SystemTime>,
) -> SyncResult<FileList> {
    let root = layout.upper();
    let path = match kind {
        ListKind::All => layout.all_list(),
        ListKind::Edited => layout.edited_list(),
    };

    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.path()
                .strip_prefix(root)
                .map(|rel| !exclusions.is_excluded(rel))
                .unwrap_or(false)
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) if is_vanished(&err) => {
                debug!(error = %err, "entry vanished during walk");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        if kind == ListKind::Edited {
            let file_type = entry.file_type();
            if file_type.is_dir() {
                match is_empty_dir(entry.path()) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(SyncError::fs(entry.path(), err)),
                }
            } else if !file_type.is_file() && !file_type.is_symlink() {
                continue;
            }
            let modified = match entry.metadata() {
                Ok(meta) => meta.modified().at_path(entry.path())?,
                Err(err) if is_vanished(&err) => continue,
                Err(err) => return Err(err.into()),
            };
            if watermark.is_some_and(|w| modified <= w) {
                continue;
            }
        }

        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        match rel.to_str() {
            Some(rel) if !rel.contains('\n') => entries.push(rel.to_string()),
            _ => warn!(path = %entry.path().display(), "skipping unlistable file name"),
        }
    }

    debug!(?kind, count = entries.len(), list = %path.display(), "enumerated upper layer");
    if entries.is_empty() {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(SyncError::fs(&path, err)),
        }
    } else {
        write_list(&path, &entries)?;
    }

    Ok(FileList {
        kind,
        path,
        entries,
    })
}

fn write_list(path: &Path, entries: &[String]) -> SyncResult<()> {
    let file = File::create(path).at_path(path)?;
    let mut out = BufWriter::new(file);
    for entry in entries {
        writeln!(out, "./{entry}").at_path(path)?;
    }
    out.flush().at_path(path)
}

fn is_empty_dir(path: &Path) -> std::io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}

fn is_vanished(err: &walkdir::Error) -> bool {
    err.io_error()
        .is_some_and(|e| e.kind() == ErrorKind::NotFound)
}
