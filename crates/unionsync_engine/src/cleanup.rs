//! Best-effort removal used by delete propagation.

use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Result of a removal the caller is allowed to ignore.
///
/// Delete propagation tolerates individual failures: a path that survives is
/// either re-reported next cycle or already gone on the authoritative side.
#[must_use]
#[derive(Debug)]
pub struct Removal(io::Result<()>);

impl Removal {
    /// True if the path is gone (including "was already gone").
    pub fn is_removed(&self) -> bool {
        match &self.0 {
            Ok(()) => true,
            Err(err) => err.kind() == io::ErrorKind::NotFound,
        }
    }

    /// Logs a failure at debug level and returns whether the path is gone.
    pub fn tolerate(self, path: &Path) -> bool {
        let removed = self.is_removed();
        if let Err(err) = &self.0 {
            if !removed {
                debug!(path = %path.display(), error = %err, "ignoring failed removal");
            }
        }
        removed
    }
}

/// Removes a file, link or directory tree without following links.
pub fn remove_recursive(path: &Path) -> Removal {
    let result = fs::symlink_metadata(path).and_then(|meta| {
        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
    });
    Removal(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn removes_files_and_trees() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        let tree = dir.path().join("t/a/b");
        fs::write(&file, "x").unwrap();
        fs::create_dir_all(&tree).unwrap();
        fs::write(tree.join("c"), "y").unwrap();

        assert!(remove_recursive(&file).tolerate(&file));
        assert!(remove_recursive(&dir.path().join("t")).is_removed());
        assert!(!file.exists());
        assert!(!dir.path().join("t").exists());
    }

    #[test]
    fn missing_path_counts_as_removed() {
        let dir = tempdir().unwrap();
        assert!(remove_recursive(&dir.path().join("nothing")).is_removed());
    }
}
