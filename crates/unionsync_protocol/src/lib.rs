//! # unionsync protocol
//!
//! Wire types exchanged between a compute server and the project it caches.
//!
//! This crate provides:
//! - The remote function names (`exec`, `filesToDelete`, `deleteWhiteouts`)
//! - Request and response messages for each function
//! - CBOR encoding/decoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod function;
mod messages;

pub use error::{ProtocolError, ProtocolResult};
pub use function::RemoteFunction;
pub use messages::{
    DeleteWhiteoutsRequest, DeleteWhiteoutsResponse, ExecOutput, ExecRequest,
    FilesToDeleteRequest, FilesToDeleteResponse, WhiteoutMap,
};
