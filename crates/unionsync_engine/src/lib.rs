//! # unionsync engine
//!
//! Keeps the writable upper layer of a union-filesystem cache in sync with
//! the project it caches.
//!
//! This crate provides:
//! - Sync state machine (init → ready ⇄ syncing → closed)
//! - Watermark persisted as a sentinel file mtime
//! - Enumeration of the upper layer into file lists
//! - Local archive build with retry and exponential backoff
//! - Native extraction with the keep-newer conflict rule
//! - Delete propagation in both directions
//! - Project transport abstraction (RPC, loopback and mock)
//! - Tokio scheduler driving periodic cycles
//!
//! ## Cycle
//!
//! Each cycle runs a fixed sequence:
//! 1. Report compute deletes (whiteouts) to the project
//! 2. List every cached file
//! 3. Push files edited since the watermark
//! 4. Pull project changes newer than the watermark
//! 5. Remove cached files deleted in the project
//! 6. Advance the watermark to the cycle start
//!
//! ## Key Invariants
//!
//! - The watermark only moves after a fully successful cycle
//! - A failed cycle is retried from scratch on the next tick
//! - At most one cycle runs at a time; ticks are dropped, never queued
//! - An existing file strictly newer than an incoming copy is kept

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod archive;
mod cleanup;
mod config;
mod enumerate;
mod error;
mod extract;
mod layout;
mod pull;
mod remote_delete;
mod retry;
mod rpc;
mod scheduler;
mod state;
mod transport;
mod unpack;
mod watermark;
mod whiteout;

pub use archive::{build as build_archive, write_archive, ArchiveHandle};
pub use cleanup::{remove_recursive, Removal};
pub use config::{EngineConfig, RetryConfig, DEFAULT_EXEC_TIMEOUT, DEFAULT_SYNC_INTERVAL};
pub use enumerate::{enumerate, Exclusions, FileList, ListKind};
pub use error::{SyncError, SyncResult};
pub use extract::{extract_keep_newer, ExtractOutcome, ExtractSummary};
pub use layout::{Layout, WHITEOUT_DIR, WHITEOUT_SUFFIX};
pub use pull::{newer_than_arg, project_archive_command, pull_project_changes};
pub use remote_delete::{apply_project_deletes, resolve_in_upper, RemoteDeleteSummary};
pub use retry::retry_with_backoff;
pub use rpc::{ApiClient, LoopbackClient, LoopbackServer, RemoteRequest, RpcTransport};
pub use scheduler::{SchedulerHandle, SyncScheduler};
pub use state::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use transport::{MockTransport, ProjectTransport};
pub use unpack::{
    classify_remote_extract, extract_command, extract_in_project, CONFLICT_CASCADE_DIAGNOSTIC,
};
pub use watermark::Watermark;
pub use whiteout::{scan as scan_whiteouts, sync_deletes_to_project, WhiteoutRecord};
