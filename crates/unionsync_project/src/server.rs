//! Project server: dispatch of named calls.

use crate::config::ProjectConfig;
use crate::error::{ProjectError, ProjectResult};
use crate::handler::RequestHandler;
use parking_lot::Mutex;
use std::path::Path;
use tracing::warn;
use unionsync_protocol::{
    DeleteWhiteoutsRequest, DeleteWhiteoutsResponse, ExecOutput, ExecRequest,
    FilesToDeleteRequest, FilesToDeleteResponse, RemoteFunction,
};

/// Counters for handled calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectStats {
    /// `exec` calls handled.
    pub exec_calls: u64,
    /// `filesToDelete` calls handled.
    pub files_to_delete_calls: u64,
    /// `deleteWhiteouts` calls handled.
    pub delete_whiteouts_calls: u64,
    /// Calls that returned an error.
    pub errors: u64,
}

/// The project side of a compute server link.
///
/// Answers the calls a compute server makes against one project root.
///
/// # Example
///
/// ```
/// use unionsync_project::{ProjectConfig, ProjectServer};
///
/// let server = ProjectServer::new(ProjectConfig::new("/srv/project"));
///
/// // A transport hands each incoming call to server.handle_call(function, body)
/// # let _ = server;
/// ```
pub struct ProjectServer {
    handler: RequestHandler,
    stats: Mutex<ProjectStats>,
}

impl ProjectServer {
    /// Creates a new project server.
    pub fn new(config: ProjectConfig) -> Self {
        Self {
            handler: RequestHandler::new(config),
            stats: Mutex::new(ProjectStats::default()),
        }
    }

    /// Project root.
    pub fn root(&self) -> &Path {
        self.handler.root()
    }

    /// Counters for handled calls.
    pub fn stats(&self) -> ProjectStats {
        self.stats.lock().clone()
    }

    /// Handles an `exec` request.
    pub fn handle_exec(&self, request: &ExecRequest) -> Result<ExecOutput, String> {
        self.stats.lock().exec_calls += 1;
        self.finish(self.handler.handle_exec(request))
    }

    /// Handles a `filesToDelete` request.
    pub fn handle_files_to_delete(
        &self,
        request: &FilesToDeleteRequest,
    ) -> Result<FilesToDeleteResponse, String> {
        self.stats.lock().files_to_delete_calls += 1;
        self.finish(self.handler.handle_files_to_delete(request))
    }

    /// Handles a `deleteWhiteouts` request.
    pub fn handle_delete_whiteouts(
        &self,
        request: &DeleteWhiteoutsRequest,
    ) -> Result<DeleteWhiteoutsResponse, String> {
        self.stats.lock().delete_whiteouts_calls += 1;
        self.finish(self.handler.handle_delete_whiteouts(request))
    }

    /// Handles a named call with a CBOR body and returns the CBOR response.
    pub fn handle_call(&self, function: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let function: RemoteFunction = function.parse().map_err(|e: unionsync_protocol::ProtocolError| {
            self.stats.lock().errors += 1;
            e.to_string()
        })?;
        let encoded = match function {
            RemoteFunction::Exec => {
                let request = self.decode(ExecRequest::decode(body))?;
                self.handle_exec(&request)?.encode()
            }
            RemoteFunction::FilesToDelete => {
                let request = self.decode(FilesToDeleteRequest::decode(body))?;
                self.handle_files_to_delete(&request)?.encode()
            }
            RemoteFunction::DeleteWhiteouts => {
                let request = self.decode(DeleteWhiteoutsRequest::decode(body))?;
                self.handle_delete_whiteouts(&request)?.encode()
            }
        };
        encoded.map_err(|e| e.to_string())
    }

    fn decode<T>(&self, decoded: unionsync_protocol::ProtocolResult<T>) -> Result<T, String> {
        self.finish(decoded.map_err(ProjectError::from))
    }

    fn finish<T>(&self, result: ProjectResult<T>) -> Result<T, String> {
        result.map_err(|err| {
            self.stats.lock().errors += 1;
            if !err.is_client_error() {
                warn!(error = %err, "project call failed");
            }
            err.to_string()
        })
    }
}
