//! Protocol messages for the project channel.

use crate::error::{ProtocolError, ProtocolResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Deleted paths mapped to their deletion time in milliseconds since the epoch.
pub type WhiteoutMap = BTreeMap<String, u64>;

fn encode_cbor<T: Serialize>(message: &'static str, value: &T) -> ProtocolResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| ProtocolError::Encode {
        message,
        reason: e.to_string(),
    })?;
    Ok(out)
}

fn decode_cbor<T: DeserializeOwned>(message: &'static str, bytes: &[u8]) -> ProtocolResult<T> {
    ciborium::from_reader(bytes).map_err(|e| ProtocolError::Decode {
        message,
        reason: e.to_string(),
    })
}

macro_rules! cbor_message {
    ($ty:ident) => {
        impl $ty {
            /// Encodes to CBOR.
            pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
                encode_cbor(stringify!($ty), self)
            }

            /// Decodes from CBOR.
            pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
                decode_cbor(stringify!($ty), bytes)
            }
        }
    };
}

/// Runs a command in the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    /// Program to run.
    pub command: String,
    /// Program arguments.
    pub args: Vec<String>,
    /// Wall-clock limit in seconds.
    pub timeout_secs: u64,
    /// Whether a non-zero exit status should be reported as an error.
    pub error_on_nonzero_exit: bool,
}

impl ExecRequest {
    /// Creates a request that reports non-zero exits as errors.
    pub fn new(command: impl Into<String>, args: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            command: command.into(),
            args,
            timeout_secs,
            error_on_nonzero_exit: true,
        }
    }

    /// Returns the request with non-zero exits reported in the output instead.
    pub fn allow_nonzero_exit(mut self) -> Self {
        self.error_on_nonzero_exit = false;
        self
    }

    /// Renders the command line for logs.
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.command.clone()
        } else {
            format!("{} {}", self.command, self.args.join(" "))
        }
    }
}

cbor_message!(ExecRequest);

/// Captured result of an [`ExecRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Process exit status (`-1` when killed by a signal).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ExecOutput {
    /// Creates a successful output with empty streams.
    pub fn success() -> Self {
        Self::default()
    }

    /// Creates a failed output with the given stderr.
    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the process exited with status zero.
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

cbor_message!(ExecOutput);

/// Asks the project which cached compute files no longer exist there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesToDeleteRequest {
    /// Path of the compute "all files" list, relative to the project root.
    pub all_compute_files: String,
}

impl FilesToDeleteRequest {
    /// Creates a new request.
    pub fn new(all_compute_files: impl Into<String>) -> Self {
        Self {
            all_compute_files: all_compute_files.into(),
        }
    }
}

cbor_message!(FilesToDeleteRequest);

/// Paths the compute server should delete from its upper layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesToDeleteResponse {
    /// Relative paths.
    pub paths: Vec<String>,
}

impl FilesToDeleteResponse {
    /// Creates a new response.
    pub fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }
}

cbor_message!(FilesToDeleteResponse);

/// Reports deletions made on the compute server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteWhiteoutsRequest {
    /// Deleted relative path to deletion time (ms since epoch).
    pub whiteouts: WhiteoutMap,
}

impl DeleteWhiteoutsRequest {
    /// Creates a new request.
    pub fn new(whiteouts: WhiteoutMap) -> Self {
        Self { whiteouts }
    }
}

cbor_message!(DeleteWhiteoutsRequest);

/// Acknowledgement of a [`DeleteWhiteoutsRequest`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteWhiteoutsResponse {
    /// Paths removed from the project.
    pub deleted: u64,
    /// Paths kept because the project copy was newer or absent.
    pub kept: u64,
}

cbor_message!(DeleteWhiteoutsResponse);
