//! Project transport for a project root reachable on the local filesystem.

use std::path::Path;
use std::time::Duration;
use unionsync_engine::{LoopbackClient, LoopbackServer, RpcTransport};
use unionsync_project::{ProjectConfig, ProjectServer};

/// A project served in-process.
pub struct LocalProject(ProjectServer);

impl LoopbackServer for LocalProject {
    fn handle_call(&self, function: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_call(function, body)
    }
}

/// Transport used by the CLI.
pub type LocalTransport = RpcTransport<LoopbackClient<LocalProject>>;

/// Serves the project rooted at `root` (the lower layer) through the RPC path.
pub fn transport(root: &Path, exec_timeout: Duration) -> LocalTransport {
    let config = ProjectConfig::new(root).with_max_exec_timeout(exec_timeout);
    RpcTransport::new(LoopbackClient::new(LocalProject(ProjectServer::new(config))))
}
