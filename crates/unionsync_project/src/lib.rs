//! # unionsync project
//!
//! Reference implementation of the project side of unionsync.
//!
//! This crate provides:
//! - `exec`: run a command in the project root with a timeout
//! - `filesToDelete`: which cached compute files no longer exist here
//! - `deleteWhiteouts`: apply compute deletes unless the project copy is newer
//! - Dispatch of named calls with CBOR payloads
//!
//! # Conflict rule
//!
//! A compute delete removes a project path only if the path was not modified
//! after the delete happened. Every request path is resolved inside the
//! project root; paths that escape it are refused.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod handler;
mod server;

pub use config::{ProjectConfig, DEFAULT_MAX_EXEC_TIMEOUT};
pub use error::{ProjectError, ProjectResult};
pub use handler::{resolve_in_root, RequestHandler};
pub use server::{ProjectServer, ProjectStats};
