//! Command implementations.

pub mod layout;
pub mod once;
pub mod run;

use crate::local::{self, LocalTransport};
use crate::SyncArgs;
use unionsync_engine::{SyncEngine, SyncResult};

/// Builds an engine over the local project transport.
fn engine(args: &SyncArgs) -> SyncResult<SyncEngine<LocalTransport>> {
    let config = args.engine_config();
    let transport = local::transport(&config.lower, config.exec_timeout);
    SyncEngine::new(config, transport)
}
