//! Sync engine state machine.

use crate::archive;
use crate::cleanup::remove_recursive;
use crate::config::EngineConfig;
use crate::enumerate::{enumerate, Exclusions, ListKind};
use crate::error::{IoResultExt, SyncError, SyncResult};
use crate::extract::ExtractOutcome;
use crate::layout::Layout;
use crate::pull::pull_project_changes;
use crate::remote_delete::apply_project_deletes;
use crate::transport::ProjectTransport;
use crate::unpack::extract_in_project;
use crate::watermark::Watermark;
use crate::whiteout::sync_deletes_to_project;
use parking_lot::RwLock;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Constructed, not yet validated.
    Init,
    /// Idle, the next tick may start a cycle.
    Ready,
    /// A cycle is running.
    Syncing,
    /// Shut down; terminal.
    Closed,
}

impl SyncState {
    /// Returns true if a new cycle may start.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Ready)
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Init => "init",
            SyncState::Ready => "ready",
            SyncState::Syncing => "syncing",
            SyncState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Statistics about sync cycles.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Cycles that ran to completion.
    pub cycles_completed: u64,
    /// Cycles aborted by an error.
    pub cycles_failed: u64,
    /// Files sent to the project.
    pub files_pushed: u64,
    /// Files unpacked from the project.
    pub files_pulled: u64,
    /// Whiteouts reported to the project.
    pub whiteouts_reported: u64,
    /// Local paths removed because the project deleted them.
    pub local_deletes: u64,
    /// Duration of the last cycle, successful or not.
    pub last_duration: Option<Duration>,
    /// Watermark set by the last successful cycle.
    pub last_watermark: Option<SystemTime>,
    /// Error of the last cycle; cleared by a successful one.
    pub last_error: Option<String>,
}

/// Result of one successful sync cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCycleResult {
    /// Whiteouts reported to the project.
    pub whiteouts_reported: usize,
    /// Files sent to the project.
    pub pushed: usize,
    /// Outcome of the remote extraction, if anything was pushed.
    pub push_outcome: Option<ExtractOutcome>,
    /// Files unpacked from the project.
    pub pulled: u64,
    /// Project files skipped because the cached copy was newer.
    pub kept_newer: u64,
    /// Local paths removed because the project deleted them.
    pub local_deletes: usize,
    /// New watermark (the cycle start time).
    pub watermark: SystemTime,
    /// Wall-clock duration of the cycle.
    pub duration: Duration,
}

/// Keeps an overlay upper layer and the project it caches in sync.
pub struct SyncEngine<T: ProjectTransport> {
    config: EngineConfig,
    layout: Layout,
    exclusions: Exclusions,
    watermark: Watermark,
    transport: Arc<T>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<T: ProjectTransport> SyncEngine<T> {
    /// Creates a ready engine, validating the configuration.
    pub fn new(config: EngineConfig, transport: T) -> SyncResult<Self> {
        let layout = Layout::new(
            &config.lower,
            &config.upper,
            &config.mount,
            config.compute_server_id,
        )?;
        config.validate()?;
        let exclusions = Exclusions::new(config.exclude.as_slice());
        let watermark = Watermark::new(layout.watermark());

        let engine = Self {
            config,
            layout,
            exclusions,
            watermark,
            transport: Arc::new(transport),
            state: RwLock::new(SyncState::Init),
            stats: RwLock::new(SyncStats::default()),
        };
        engine.transition(SyncState::Init, SyncState::Ready)?;
        debug!(id = engine.layout.compute_server_id(), "sync engine ready");
        Ok(engine)
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Gets the derived paths.
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Gets the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Runs one cycle if the engine is idle; a tick while busy or closed is dropped.
    pub fn tick(&self) -> Option<SyncResult<SyncCycleResult>> {
        match self.transition(SyncState::Ready, SyncState::Syncing) {
            Ok(()) => Some(self.run_cycle()),
            Err(_) => {
                debug!(state = %self.state(), "skipping tick");
                None
            }
        }
    }

    /// Runs one cycle, failing if the engine is not idle.
    pub fn sync(&self) -> SyncResult<SyncCycleResult> {
        self.transition(SyncState::Ready, SyncState::Syncing)?;
        self.run_cycle()
    }

    /// Closes the engine. Idempotent.
    ///
    /// An in-flight cycle is not interrupted: it keeps the transport and
    /// closes it when it ends.
    pub fn close(&self) -> SyncResult<()> {
        let previous = {
            let mut state = self.state.write();
            if *state == SyncState::Closed {
                return Ok(());
            }
            std::mem::replace(&mut *state, SyncState::Closed)
        };
        info!(id = self.layout.compute_server_id(), "sync engine closed");
        if previous == SyncState::Syncing {
            debug!("transport stays open until the running cycle ends");
            return Ok(());
        }
        self.transport.close()
    }

    /// Atomically moves `from → to`.
    fn transition(&self, from: SyncState, to: SyncState) -> SyncResult<()> {
        let mut state = self.state.write();
        if *state != from {
            return Err(SyncError::InvalidStateTransition {
                from: state.to_string(),
                to: to.to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    fn run_cycle(&self) -> SyncResult<SyncCycleResult> {
        let start = Instant::now();
        let result = self.cycle(start);
        let elapsed = start.elapsed();

        let closed_while_running = {
            let mut state = self.state.write();
            match *state {
                SyncState::Syncing => {
                    *state = SyncState::Ready;
                    false
                }
                SyncState::Closed => true,
                _ => false,
            }
        };
        if closed_while_running {
            if let Err(err) = self.transport.close() {
                warn!(error = %err, "failed to close transport after the last cycle");
            }
        }

        let mut stats = self.stats.write();
        stats.last_duration = Some(elapsed);
        match &result {
            Ok(cycle) => {
                stats.cycles_completed += 1;
                stats.files_pushed += cycle.pushed as u64;
                stats.files_pulled += cycle.pulled;
                stats.whiteouts_reported += cycle.whiteouts_reported as u64;
                stats.local_deletes += cycle.local_deletes as u64;
                stats.last_watermark = Some(cycle.watermark);
                stats.last_error = None;
                info!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    pushed = cycle.pushed,
                    pulled = cycle.pulled,
                    "sync cycle complete"
                );
            }
            Err(err) => {
                stats.cycles_failed += 1;
                stats.last_error = Some(err.to_string());
                warn!(
                    elapsed_secs = elapsed.as_secs_f64(),
                    error = %err,
                    "sync cycle failed"
                );
            }
        }
        result
    }

    fn cycle(&self, start: Instant) -> SyncResult<SyncCycleResult> {
        if !self.transport.is_connected() {
            return Err(SyncError::NotConnected);
        }

        self.ensure_workdirs()?;
        let cycle_start = SystemTime::now();
        let watermark = self.watermark.read()?;
        debug!(?watermark, "starting sync cycle");

        let whiteouts_reported = sync_deletes_to_project(&self.layout, self.transport.as_ref())?;

        let all = enumerate(&self.layout, &self.exclusions, ListKind::All, watermark)?;

        let (pushed, push_outcome) = self.push(watermark)?;

        let (pulled, kept_newer, local_deletes) = if all.is_empty() {
            debug!("upper layer is empty, nothing to refresh from the project");
            (0, 0, 0)
        } else {
            let pull = pull_project_changes(
                &self.layout,
                &self.exclusions,
                self.transport.as_ref(),
                watermark,
                self.config.exec_timeout,
            )?;
            let deletes =
                apply_project_deletes(&self.layout, self.transport.as_ref(), watermark)?;
            (pull.unpacked, pull.kept_newer, deletes.removed)
        };

        self.watermark.advance(cycle_start)?;

        Ok(SyncCycleResult {
            whiteouts_reported,
            pushed,
            push_outcome,
            pulled,
            kept_newer,
            local_deletes,
            watermark: cycle_start,
            duration: start.elapsed(),
        })
    }

    /// Sends files edited since `watermark` to the project.
    fn push(&self, watermark: Option<SystemTime>) -> SyncResult<(usize, Option<ExtractOutcome>)> {
        let edited = enumerate(&self.layout, &self.exclusions, ListKind::Edited, watermark)?;
        if edited.is_empty() {
            debug!("no edited files to push");
            return Ok((0, None));
        }

        let handle = archive::build(
            &self.layout,
            &self.exclusions,
            &self.config.archive_retry,
            edited,
            watermark,
        )?;
        let outcome = extract_in_project(
            self.transport.as_ref(),
            &handle.project_path,
            &self.config.extract_retry,
            self.config.exec_timeout,
        );
        let _ = remove_recursive(&handle.path).tolerate(&handle.path);
        let outcome = outcome?;

        info!(files = handle.entries, ?outcome, "pushed edited files to project");
        Ok((handle.entries, Some(outcome)))
    }

    fn ensure_workdirs(&self) -> SyncResult<()> {
        let local = self.layout.compute_workdir();
        let remote = self.layout.project_workdir();
        let create = |dir: &Path| fs::create_dir_all(dir).at_path(dir);
        std::thread::scope(|s| {
            let remote_job = s.spawn(|| create(&remote));
            let local_result = create(&local);
            let remote_result = remote_job
                .join()
                .unwrap_or_else(|_| {
                    Err(SyncError::fs(
                        &remote,
                        io::Error::new(io::ErrorKind::Other, "workdir creation panicked"),
                    ))
                });
            local_result.and(remote_result)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::layout::{WHITEOUT_DIR, WHITEOUT_SUFFIX};
    use crate::transport::MockTransport;
    use filetime::FileTime;
    use parking_lot::Mutex;
    use std::sync::mpsc::{self, Receiver, Sender};
    use tempfile::TempDir;
    use unionsync_protocol::{
        DeleteWhiteoutsRequest, DeleteWhiteoutsResponse, ExecOutput, ExecRequest,
        FilesToDeleteRequest, FilesToDeleteResponse, RemoteFunction,
    };

    fn config(dir: &TempDir) -> EngineConfig {
        let config = EngineConfig::new(
            dir.path().join("lower"),
            dir.path().join("upper"),
            dir.path().join("home"),
            1,
        )
        .with_extract_retry(RetryConfig::no_retry());
        fs::create_dir_all(&config.lower).unwrap();
        fs::create_dir_all(&config.upper).unwrap();
        config
    }

    fn engine(dir: &TempDir) -> SyncEngine<MockTransport> {
        SyncEngine::new(config(dir), MockTransport::new()).unwrap()
    }

    /// Blocks `deleteWhiteouts` until released, then behaves like the mock.
    struct GatedTransport {
        inner: MockTransport,
        entered: Mutex<Sender<()>>,
        release: Mutex<Receiver<()>>,
    }

    impl ProjectTransport for GatedTransport {
        fn exec(&self, request: &ExecRequest) -> SyncResult<ExecOutput> {
            self.inner.exec(request)
        }

        fn files_to_delete(
            &self,
            request: &FilesToDeleteRequest,
        ) -> SyncResult<FilesToDeleteResponse> {
            self.inner.files_to_delete(request)
        }

        fn delete_whiteouts(
            &self,
            request: &DeleteWhiteoutsRequest,
        ) -> SyncResult<DeleteWhiteoutsResponse> {
            self.entered.lock().send(()).unwrap();
            self.release.lock().recv().unwrap();
            self.inner.delete_whiteouts(request)
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        fn close(&self) -> SyncResult<()> {
            self.inner.close()
        }
    }

    #[test]
    fn construction_moves_to_ready() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        assert_eq!(engine.state(), SyncState::Ready);
    }

    #[test]
    fn rejects_whitespace_paths() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::new(
            dir.path().join("lower dir"),
            dir.path().join("upper"),
            dir.path().join("home"),
            1,
        );
        assert!(matches!(
            SyncEngine::new(config, MockTransport::new()),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn empty_cycle_advances_watermark() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);

        let result = engine.sync().unwrap();
        assert_eq!(result.pushed, 0);
        assert_eq!(result.push_outcome, None);
        assert_eq!(engine.state(), SyncState::Ready);
        assert!(engine.layout().watermark().exists());
        assert!(engine.layout().project_workdir().is_dir());
        // nothing cached, so the project is never asked for changes
        assert!(engine.transport().exec_requests().is_empty());
        assert!(engine.transport().files_to_delete_requests().is_empty());
        assert_eq!(engine.stats().cycles_completed, 1);
    }

    #[test]
    fn pushes_edited_files() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        fs::write(engine.layout().upper().join("a.txt"), "edit").unwrap();

        let result = engine.sync().unwrap();
        assert_eq!(result.pushed, 1);
        assert_eq!(result.push_outcome, Some(ExtractOutcome::Success));

        let execs = engine.transport().exec_requests();
        assert_eq!(execs[0].args[0], "--keep-newer-files");
        assert_eq!(execs[1].args[0], "-zcf");
        assert!(!engine.layout().compute_archive().exists());
        assert!(!engine.layout().staged_archive().exists());
    }

    #[test]
    fn failed_cycle_keeps_watermark_and_returns_to_ready() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        fs::write(engine.layout().upper().join("a.txt"), "edit").unwrap();
        engine.sync().unwrap();
        let before = engine.watermark.read().unwrap();

        let edited = engine.layout().upper().join("a.txt");
        fs::write(&edited, "again").unwrap();
        filetime::set_file_mtime(&edited, FileTime::now()).unwrap();
        engine
            .transport()
            .push_exec_output(ExecOutput::failure(2, "tar: Cannot open: No such file"));

        assert!(matches!(
            engine.sync(),
            Err(SyncError::RetriesExhausted { .. })
        ));
        assert_eq!(engine.state(), SyncState::Ready);
        assert_eq!(engine.watermark.read().unwrap(), before);

        let stats = engine.stats();
        assert_eq!(stats.cycles_failed, 1);
        assert!(stats.last_error.is_some());
    }

    #[test]
    fn remote_delete_failure_aborts_before_watermark() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        fs::write(engine.layout().upper().join("a.txt"), "x").unwrap();
        engine
            .transport()
            .fail(RemoteFunction::FilesToDelete, "rpc down");

        assert!(engine.sync().is_err());
        assert!(!engine.layout().watermark().exists());
        assert!(engine.layout().upper().join("a.txt").exists());
    }

    #[test]
    fn tick_is_dropped_unless_ready() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        *engine.state.write() = SyncState::Syncing;
        assert!(engine.tick().is_none());
        assert!(matches!(
            engine.sync(),
            Err(SyncError::InvalidStateTransition { .. })
        ));

        *engine.state.write() = SyncState::Ready;
        assert!(engine.tick().is_some());
    }

    #[test]
    fn close_is_terminal_and_idempotent() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.close().unwrap();
        engine.close().unwrap();
        assert_eq!(engine.state(), SyncState::Closed);
        assert!(!engine.transport().is_connected());
        assert!(engine.tick().is_none());
    }

    #[test]
    fn close_lets_the_running_cycle_finish() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let marker = config
            .upper
            .join(WHITEOUT_DIR)
            .join(format!("gone.txt{WHITEOUT_SUFFIX}"));
        fs::create_dir_all(marker.parent().unwrap()).unwrap();
        fs::write(&marker, "").unwrap();
        fs::write(config.upper.join("a.txt"), "edit").unwrap();

        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let transport = GatedTransport {
            inner: MockTransport::new(),
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        let engine = Arc::new(SyncEngine::new(config, transport).unwrap());

        let running = {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || engine.sync())
        };
        entered_rx.recv().unwrap();

        engine.close().unwrap();
        assert_eq!(engine.state(), SyncState::Closed);
        assert!(engine.transport().is_connected());

        release_tx.send(()).unwrap();
        let result = running.join().unwrap().unwrap();
        assert_eq!(result.whiteouts_reported, 1);
        assert_eq!(result.pushed, 1);
        assert!(!marker.exists());

        // the transport is released once the cycle is over
        assert_eq!(engine.state(), SyncState::Closed);
        assert!(!engine.transport().is_connected());
        assert!(engine.tick().is_none());
    }

    #[test]
    fn invalid_retry_policy_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir)
            .with_archive_retry(RetryConfig::new(3).with_backoff_multiplier(f64::NAN));
        assert!(matches!(
            SyncEngine::new(config, MockTransport::new()),
            Err(SyncError::Config(_))
        ));
    }

    #[test]
    fn disconnected_transport_fails_the_cycle() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir);
        engine.transport().set_connected(false);
        assert!(matches!(engine.sync(), Err(SyncError::NotConnected)));
        assert_eq!(engine.state(), SyncState::Ready);
    }
}
