//! RPC-backed transport.
//!
//! This module provides a transport that sends every call as a named remote
//! function with a CBOR payload. The actual client is abstracted via a trait
//! so any request/response channel (HTTP, websocket, in-process) can carry it.

use crate::error::{SyncError, SyncResult};
use crate::transport::ProjectTransport;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;
use unionsync_protocol::{
    DeleteWhiteoutsRequest, DeleteWhiteoutsResponse, ExecOutput, ExecRequest,
    FilesToDeleteRequest, FilesToDeleteResponse, ProtocolResult, RemoteFunction,
};

/// RPC client abstraction.
///
/// Implement this trait to provide the actual channel to the project.
pub trait ApiClient: Send + Sync {
    /// Calls a named remote function and returns the response body.
    fn call(&self, function: &str, payload: Vec<u8>) -> Result<Vec<u8>, String>;

    /// Checks if the client is connected/healthy.
    fn is_healthy(&self) -> bool;
}

/// A request with a known remote function and response type.
pub trait RemoteRequest {
    /// Function that handles the request.
    const FUNCTION: RemoteFunction;
    /// Response message.
    type Response;

    /// Encodes the request payload.
    fn encode_request(&self) -> ProtocolResult<Vec<u8>>;

    /// Decodes the response payload.
    fn decode_response(bytes: &[u8]) -> ProtocolResult<Self::Response>;
}

impl RemoteRequest for ExecRequest {
    const FUNCTION: RemoteFunction = RemoteFunction::Exec;
    type Response = ExecOutput;

    fn encode_request(&self) -> ProtocolResult<Vec<u8>> {
        self.encode()
    }

    fn decode_response(bytes: &[u8]) -> ProtocolResult<ExecOutput> {
        ExecOutput::decode(bytes)
    }
}

impl RemoteRequest for FilesToDeleteRequest {
    const FUNCTION: RemoteFunction = RemoteFunction::FilesToDelete;
    type Response = FilesToDeleteResponse;

    fn encode_request(&self) -> ProtocolResult<Vec<u8>> {
        self.encode()
    }

    fn decode_response(bytes: &[u8]) -> ProtocolResult<FilesToDeleteResponse> {
        FilesToDeleteResponse::decode(bytes)
    }
}

impl RemoteRequest for DeleteWhiteoutsRequest {
    const FUNCTION: RemoteFunction = RemoteFunction::DeleteWhiteouts;
    type Response = DeleteWhiteoutsResponse;

    fn encode_request(&self) -> ProtocolResult<Vec<u8>> {
        self.encode()
    }

    fn decode_response(bytes: &[u8]) -> ProtocolResult<DeleteWhiteoutsResponse> {
        DeleteWhiteoutsResponse::decode(bytes)
    }
}

/// RPC-based project transport.
pub struct RpcTransport<C: ApiClient> {
    /// RPC client implementation.
    client: C,
    /// Connection state.
    connected: AtomicBool,
    /// Last error message.
    last_error: RwLock<Option<String>>,
}

impl<C: ApiClient> RpcTransport<C> {
    /// Creates a new RPC transport.
    pub fn new(client: C) -> Self {
        Self {
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn call<R: RemoteRequest>(&self, request: &R) -> SyncResult<R::Response> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = request.encode_request()?;
        debug!(function = %R::FUNCTION, bytes = body.len(), "remote call");
        let response = self.client.call(R::FUNCTION.as_str(), body).map_err(|message| {
            *self.last_error.write() = Some(message.clone());
            SyncError::Remote {
                function: R::FUNCTION.to_string(),
                message,
            }
        })?;
        *self.last_error.write() = None;

        Ok(R::decode_response(&response)?)
    }
}

impl<C: ApiClient> ProjectTransport for RpcTransport<C> {
    fn exec(&self, request: &ExecRequest) -> SyncResult<ExecOutput> {
        self.call(request)
    }

    fn files_to_delete(&self, request: &FilesToDeleteRequest) -> SyncResult<FilesToDeleteResponse> {
        self.call(request)
    }

    fn delete_whiteouts(
        &self,
        request: &DeleteWhiteoutsRequest,
    ) -> SyncResult<DeleteWhiteoutsResponse> {
        self.call(request)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Trait for servers that can answer calls in-process.
pub trait LoopbackServer {
    /// Handles a call and returns the encoded response.
    fn handle_call(&self, function: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

/// A client that routes calls directly to a project in the same process.
///
/// Useful when the project root is reachable on the local filesystem, and
/// for testing without network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a new loopback client connected to the given server.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> ApiClient for LoopbackClient<S> {
    fn call(&self, function: &str, payload: Vec<u8>) -> Result<Vec<u8>, String> {
        self.server.handle_call(function, &payload)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
