//! Transport layer abstraction for the project channel.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use unionsync_protocol::{
    DeleteWhiteoutsRequest, DeleteWhiteoutsResponse, ExecOutput, ExecRequest,
    FilesToDeleteRequest, FilesToDeleteResponse, RemoteFunction,
};

/// A project transport carries the engine's calls to the project side.
///
/// This trait abstracts the channel, allowing for different implementations
/// (an RPC client, an in-process project for local mounts, a mock for tests).
pub trait ProjectTransport: Send + Sync {
    /// Runs a command in the project root.
    fn exec(&self, request: &ExecRequest) -> SyncResult<ExecOutput>;

    /// Asks which cached compute files were deleted in the project.
    fn files_to_delete(&self, request: &FilesToDeleteRequest) -> SyncResult<FilesToDeleteResponse>;

    /// Reports compute-side deletions; the project decides what to remove.
    fn delete_whiteouts(
        &self,
        request: &DeleteWhiteoutsRequest,
    ) -> SyncResult<DeleteWhiteoutsResponse>;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> SyncResult<()>;
}

/// A mock transport for testing.
///
/// Exec calls return queued outputs (success once the queue is empty). Every
/// request is recorded.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    exec_outputs: Mutex<VecDeque<ExecOutput>>,
    files_to_delete: Mutex<Vec<String>>,
    failures: Mutex<Vec<(RemoteFunction, String)>>,
    exec_requests: Mutex<Vec<ExecRequest>>,
    files_to_delete_requests: Mutex<Vec<FilesToDeleteRequest>>,
    delete_whiteouts_requests: Mutex<Vec<DeleteWhiteoutsRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            exec_outputs: Mutex::new(VecDeque::new()),
            files_to_delete: Mutex::new(Vec::new()),
            failures: Mutex::new(Vec::new()),
            exec_requests: Mutex::new(Vec::new()),
            files_to_delete_requests: Mutex::new(Vec::new()),
            delete_whiteouts_requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues the output of the next exec call.
    pub fn push_exec_output(&self, output: ExecOutput) {
        self.exec_outputs.lock().push_back(output);
    }

    /// Sets the paths returned by `filesToDelete`.
    pub fn set_files_to_delete(&self, paths: Vec<String>) {
        *self.files_to_delete.lock() = paths;
    }

    /// Makes every call to `function` fail with `message`.
    pub fn fail(&self, function: RemoteFunction, message: impl Into<String>) {
        self.failures.lock().push((function, message.into()));
    }

    /// Clears injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Exec requests received so far.
    pub fn exec_requests(&self) -> Vec<ExecRequest> {
        self.exec_requests.lock().clone()
    }

    /// `filesToDelete` requests received so far.
    pub fn files_to_delete_requests(&self) -> Vec<FilesToDeleteRequest> {
        self.files_to_delete_requests.lock().clone()
    }

    /// `deleteWhiteouts` requests received so far.
    pub fn delete_whiteouts_requests(&self) -> Vec<DeleteWhiteoutsRequest> {
        self.delete_whiteouts_requests.lock().clone()
    }

    fn check(&self, function: RemoteFunction) -> SyncResult<()> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        match self.failures.lock().iter().find(|(f, _)| *f == function) {
            Some((_, message)) => Err(SyncError::Remote {
                function: function.to_string(),
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectTransport for MockTransport {
    fn exec(&self, request: &ExecRequest) -> SyncResult<ExecOutput> {
        self.exec_requests.lock().push(request.clone());
        self.check(RemoteFunction::Exec)?;
        Ok(self
            .exec_outputs
            .lock()
            .pop_front()
            .unwrap_or_else(ExecOutput::success))
    }

    fn files_to_delete(&self, request: &FilesToDeleteRequest) -> SyncResult<FilesToDeleteResponse> {
        self.files_to_delete_requests.lock().push(request.clone());
        self.check(RemoteFunction::FilesToDelete)?;
        Ok(FilesToDeleteResponse::new(self.files_to_delete.lock().clone()))
    }

    fn delete_whiteouts(
        &self,
        request: &DeleteWhiteoutsRequest,
    ) -> SyncResult<DeleteWhiteoutsResponse> {
        self.delete_whiteouts_requests.lock().push(request.clone());
        self.check(RemoteFunction::DeleteWhiteouts)?;
        Ok(DeleteWhiteoutsResponse {
            deleted: request.whiteouts.len() as u64,
            kept: 0,
        })
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.set_connected(false);
        assert!(!transport.is_connected());

        transport.close().unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let result = transport.files_to_delete(&FilesToDeleteRequest::new("list"));
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[test]
    fn mock_transport_queued_exec_outputs() {
        let transport = MockTransport::new();
        transport.push_exec_output(ExecOutput::failure(2, "boom"));

        let request = ExecRequest::new("tar", vec![], 10);
        assert_eq!(transport.exec(&request).unwrap().exit_code, 2);
        assert!(transport.exec(&request).unwrap().is_success());
        assert_eq!(transport.exec_requests().len(), 2);
    }

    #[test]
    fn mock_transport_injected_failure() {
        let transport = MockTransport::new();
        transport.fail(RemoteFunction::DeleteWhiteouts, "project offline");

        let result = transport.delete_whiteouts(&DeleteWhiteoutsRequest::default());
        assert!(matches!(result, Err(SyncError::Remote { .. })));
        assert_eq!(transport.delete_whiteouts_requests().len(), 1);

        transport.clear_failures();
        assert!(transport
            .delete_whiteouts(&DeleteWhiteoutsRequest::default())
            .is_ok());
    }
}
