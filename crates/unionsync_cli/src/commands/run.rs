//! Run command implementation.

use crate::SyncArgs;
use std::sync::Arc;
use tracing::info;
use unionsync_engine::SyncScheduler;

/// Runs the run command: sync every interval until Ctrl-C.
pub fn run(args: &SyncArgs) -> Result<(), Box<dyn std::error::Error>> {
    let engine = Arc::new(super::engine(args)?);
    let interval = engine.config().sync_interval;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let handle = SyncScheduler::start(Arc::clone(&engine), interval);
        info!(
            interval_secs = interval.as_secs(),
            upper = %engine.layout().upper().display(),
            "syncing; press Ctrl-C to stop"
        );

        let signal = tokio::signal::ctrl_c().await;
        handle.shutdown().await;
        signal
    })?;

    let stats = engine.stats();
    info!(
        completed = stats.cycles_completed,
        failed = stats.cycles_failed,
        "stopped"
    );
    Ok(())
}
