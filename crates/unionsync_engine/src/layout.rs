//! Working paths on both sides of the cache.
//!
//! ```text
//! <upper>/
//! ├─ .unionfs-fuse/                     # whiteout markers (<path>_HIDDEN~)
//! └─ .compute-server/
//!    ├─ last                            # watermark sentinel (mtime)
//!    ├─ compute-edited-files-list
//!    └─ compute-edited-files.tar.gz     # local staging, transient
//!
//! <lower>/.compute-servers/<id>/        # project root relative: .compute-servers/<id>
//! ├─ compute-all-files-list
//! ├─ compute-edited-files.tar.gz        # transient, compute -> project
//! └─ project-edited-files.tar.gz        # transient, project -> compute
//! ```

use crate::error::{SyncError, SyncResult};
use std::path::{Path, PathBuf};

/// Directory in the upper layer holding whiteout markers.
pub const WHITEOUT_DIR: &str = ".unionfs-fuse";
/// Suffix the union filesystem appends to whiteout markers.
pub const WHITEOUT_SUFFIX: &str = "_HIDDEN~";

const COMPUTE_WORKDIR: &str = ".compute-server";
const PROJECT_WORKDIRS: &str = ".compute-servers";
const WATERMARK_FILE: &str = "last";
const EDITED_LIST_FILE: &str = "compute-edited-files-list";
const ALL_LIST_FILE: &str = "compute-all-files-list";
const COMPUTE_ARCHIVE_FILE: &str = "compute-edited-files.tar.gz";
const PROJECT_ARCHIVE_FILE: &str = "project-edited-files.tar.gz";

/// Every path the engine reads or writes, derived from the overlay roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    lower: PathBuf,
    upper: PathBuf,
    mount: PathBuf,
    compute_server_id: u32,
    project_workdir_rel: String,
}

impl Layout {
    /// Derives the layout.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if any root contains whitespace; the
    /// archivers consuming the file lists are whitespace sensitive.
    pub fn new(
        lower: impl Into<PathBuf>,
        upper: impl Into<PathBuf>,
        mount: impl Into<PathBuf>,
        compute_server_id: u32,
    ) -> SyncResult<Self> {
        let lower = lower.into();
        let upper = upper.into();
        let mount = mount.into();
        for (name, path) in [("lower", &lower), ("upper", &upper), ("mount", &mount)] {
            if path.to_string_lossy().chars().any(char::is_whitespace) {
                return Err(SyncError::Config(format!(
                    "{name} path {} contains whitespace",
                    path.display()
                )));
            }
        }

        Ok(Self {
            lower,
            upper,
            mount,
            compute_server_id,
            project_workdir_rel: format!("{PROJECT_WORKDIRS}/{compute_server_id}"),
        })
    }

    /// Lower layer root (project as seen from the compute server).
    pub fn lower(&self) -> &Path {
        &self.lower
    }

    /// Upper layer root.
    pub fn upper(&self) -> &Path {
        &self.upper
    }

    /// Union filesystem mount point.
    pub fn mount(&self) -> &Path {
        &self.mount
    }

    /// Compute server id.
    pub fn compute_server_id(&self) -> u32 {
        self.compute_server_id
    }

    /// Whiteout marker directory.
    pub fn whiteout_dir(&self) -> PathBuf {
        self.upper.join(WHITEOUT_DIR)
    }

    /// Local working directory.
    pub fn compute_workdir(&self) -> PathBuf {
        self.upper.join(COMPUTE_WORKDIR)
    }

    /// Project working directory, relative to the project root.
    pub fn project_workdir_rel(&self) -> &str {
        &self.project_workdir_rel
    }

    /// Project working directory as seen through the mount.
    pub fn project_workdir(&self) -> PathBuf {
        self.lower.join(&self.project_workdir_rel)
    }

    /// Watermark sentinel file.
    pub fn watermark(&self) -> PathBuf {
        self.compute_workdir().join(WATERMARK_FILE)
    }

    /// List of files edited since the watermark (local).
    pub fn edited_list(&self) -> PathBuf {
        self.compute_workdir().join(EDITED_LIST_FILE)
    }

    /// List of every cached file, written where the project can read it.
    pub fn all_list(&self) -> PathBuf {
        self.project_workdir().join(ALL_LIST_FILE)
    }

    /// [`Layout::all_list`] relative to the project root.
    pub fn all_list_rel(&self) -> String {
        format!("{}/{ALL_LIST_FILE}", self.project_workdir_rel)
    }

    /// Compute archive while it is being built on local storage.
    pub fn staged_archive(&self) -> PathBuf {
        self.compute_workdir().join(COMPUTE_ARCHIVE_FILE)
    }

    /// Compute archive after it was copied to the project.
    pub fn compute_archive(&self) -> PathBuf {
        self.project_workdir().join(COMPUTE_ARCHIVE_FILE)
    }

    /// [`Layout::compute_archive`] relative to the project root.
    pub fn compute_archive_rel(&self) -> String {
        format!("{}/{COMPUTE_ARCHIVE_FILE}", self.project_workdir_rel)
    }

    /// Project archive, relative to the project root.
    pub fn project_archive_rel(&self) -> String {
        format!("{}/{PROJECT_ARCHIVE_FILE}", self.project_workdir_rel)
    }

    /// Project archive as seen through the mount.
    pub fn project_archive(&self) -> PathBuf {
        self.lower.join(self.project_archive_rel())
    }

    /// Every derived path with a short label, in a stable order.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        let show = |p: PathBuf| p.display().to_string();
        vec![
            ("lower", self.lower.display().to_string()),
            ("upper", self.upper.display().to_string()),
            ("mount", self.mount.display().to_string()),
            ("whiteouts", show(self.whiteout_dir())),
            ("compute_workdir", show(self.compute_workdir())),
            ("project_workdir", show(self.project_workdir())),
            ("watermark", show(self.watermark())),
            ("edited_list", show(self.edited_list())),
            ("all_list", show(self.all_list())),
            ("staged_archive", show(self.staged_archive())),
            ("compute_archive", show(self.compute_archive())),
            ("project_archive", show(self.project_archive())),
        ]
    }
}
