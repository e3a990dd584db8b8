//! Periodic driver for [`SyncEngine`] cycles.

use crate::state::SyncEngine;
use crate::transport::ProjectTransport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Starts periodic sync cycles on the current tokio runtime.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawns the timer task; the first cycle runs one `interval` from now.
    ///
    /// Cycles run on the blocking pool. A tick that fires while a cycle is
    /// still running is dropped by the engine's state check, never queued.
    pub fn start<T>(engine: Arc<SyncEngine<T>>, interval: Duration) -> SchedulerHandle<T>
    where
        T: ProjectTransport + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let timer_engine = Arc::clone(&engine);

        let task = tokio::spawn(async move {
            let mut timer = interval_at(Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let engine = Arc::clone(&timer_engine);
                        // outcome is logged and recorded in the engine stats
                        tokio::task::spawn_blocking(move || {
                            let _ = engine.tick();
                        });
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("sync timer stopped");
        });

        SchedulerHandle {
            engine,
            stop_tx,
            task,
        }
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle<T: ProjectTransport> {
    engine: Arc<SyncEngine<T>>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl<T: ProjectTransport> SchedulerHandle<T> {
    /// The scheduled engine.
    pub fn engine(&self) -> &Arc<SyncEngine<T>> {
        &self.engine
    }

    /// Closes the engine and stops the timer.
    ///
    /// A cycle already running finishes on its own and leaves the engine closed.
    pub async fn shutdown(self) {
        if let Err(err) = self.engine.close() {
            warn!(error = %err, "failed to close project transport");
        }
        let _ = self.stop_tx.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "sync timer task failed");
        }
    }
}
