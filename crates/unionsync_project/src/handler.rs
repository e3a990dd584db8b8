//! Request handlers for the project functions.

use crate::config::ProjectConfig;
use crate::error::{ProjectError, ProjectResult};
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, UNIX_EPOCH};
use tracing::{debug, info, warn};
use unionsync_protocol::{
    DeleteWhiteoutsRequest, DeleteWhiteoutsResponse, ExecOutput, ExecRequest,
    FilesToDeleteRequest, FilesToDeleteResponse,
};

const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Resolves a request path inside `root`, rejecting absolute and `..` paths.
pub fn resolve_in_root(root: &Path, rel: &str) -> ProjectResult<PathBuf> {
    let mut out = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => {
                out.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ProjectError::PathEscape(rel.to_string()))
            }
        }
    }
    if depth == 0 {
        return Err(ProjectError::InvalidRequest(format!("empty path {rel:?}")));
    }
    Ok(out)
}

/// Handler for project requests.
pub struct RequestHandler {
    config: ProjectConfig,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(config: ProjectConfig) -> Self {
        Self { config }
    }

    /// Project root.
    pub fn root(&self) -> &Path {
        &self.config.root
    }

    /// Handles a `filesToDelete` request.
    ///
    /// Returns every path in the compute list that no longer exists in the
    /// project. A missing list means the compute cache is empty.
    pub fn handle_files_to_delete(
        &self,
        request: &FilesToDeleteRequest,
    ) -> ProjectResult<FilesToDeleteResponse> {
        let list = resolve_in_root(self.root(), &request.all_compute_files)?;
        let contents = match fs::read_to_string(&list) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(list = %list.display(), "no compute file list");
                return Ok(FilesToDeleteResponse::default());
            }
            Err(err) => return Err(ProjectError::io(&list, err)),
        };

        let mut paths = Vec::new();
        for line in contents.lines() {
            let rel = line.trim_end_matches('\r').trim_start_matches("./");
            if rel.is_empty() {
                continue;
            }
            let path = match resolve_in_root(self.root(), rel) {
                Ok(path) => path,
                Err(err) => {
                    warn!(path = rel, error = %err, "ignoring listed path");
                    continue;
                }
            };
            match fs::symlink_metadata(&path) {
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => paths.push(rel.to_string()),
                Err(err) => return Err(ProjectError::io(&path, err)),
            }
        }

        debug!(count = paths.len(), "compute files deleted in project");
        Ok(FilesToDeleteResponse::new(paths))
    }

    /// Handles a `deleteWhiteouts` request.
    ///
    /// Deletes each path unless the project copy was modified after the
    /// reported deletion time. Absent and refused paths count as kept.
    pub fn handle_delete_whiteouts(
        &self,
        request: &DeleteWhiteoutsRequest,
    ) -> ProjectResult<DeleteWhiteoutsResponse> {
        let mut response = DeleteWhiteoutsResponse::default();
        for (rel, &deleted_at_ms) in &request.whiteouts {
            let path = match resolve_in_root(self.root(), rel) {
                Ok(path) => path,
                Err(err) => {
                    warn!(path = %rel, error = %err, "refusing whiteout");
                    response.kept += 1;
                    continue;
                }
            };
            let meta = match fs::symlink_metadata(&path) {
                Ok(meta) => meta,
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    response.kept += 1;
                    continue;
                }
                Err(err) => return Err(ProjectError::io(&path, err)),
            };
            let modified_ms = meta
                .modified()
                .map_err(|e| ProjectError::io(&path, e))?
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or(0);

            if modified_ms > deleted_at_ms {
                debug!(path = %rel, modified_ms, deleted_at_ms, "keeping newer project file");
                response.kept += 1;
                continue;
            }
            let removed = if meta.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => response.deleted += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => response.kept += 1,
                Err(err) => return Err(ProjectError::io(&path, err)),
            }
        }

        info!(
            deleted = response.deleted,
            kept = response.kept,
            "applied compute deletes"
        );
        Ok(response)
    }

    /// Handles an `exec` request.
    ///
    /// The process runs in the project root with stdin closed. It is killed
    /// once the (capped) timeout expires.
    pub fn handle_exec(&self, request: &ExecRequest) -> ProjectResult<ExecOutput> {
        let timeout = self.config.exec_timeout(request.timeout_secs);
        let command = request.display();
        debug!(command = %command, timeout_secs = timeout.as_secs(), "exec");

        let mut child = Command::new(&request.command)
            .args(&request.args)
            .current_dir(self.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProjectError::io(&request.command, e))?;
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(command = %command, "exec timed out");
                    return Err(ProjectError::ExecTimeout {
                        command,
                        secs: timeout.as_secs(),
                    });
                }
                Ok(None) => thread::sleep(EXEC_POLL_INTERVAL),
                Err(err) => return Err(ProjectError::io(&request.command, err)),
            }
        };

        let output = ExecOutput {
            exit_code: status.code().unwrap_or(-1),
            stdout: collect(stdout),
            stderr: collect(stderr),
        };
        if request.error_on_nonzero_exit && !output.is_success() {
            return Err(ProjectError::Exec {
                command,
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}
