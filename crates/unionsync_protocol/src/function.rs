//! Remote function names.

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// A function the project side exposes to compute servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteFunction {
    /// Run a command in the project root.
    Exec,
    /// Compute which cached compute files were deleted in the project.
    FilesToDelete,
    /// Apply deletions recorded by overlay whiteouts.
    DeleteWhiteouts,
}

impl RemoteFunction {
    /// Returns the name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteFunction::Exec => "exec",
            RemoteFunction::FilesToDelete => "filesToDelete",
            RemoteFunction::DeleteWhiteouts => "deleteWhiteouts",
        }
    }
}

impl fmt::Display for RemoteFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RemoteFunction {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exec" => Ok(RemoteFunction::Exec),
            "filesToDelete" => Ok(RemoteFunction::FilesToDelete),
            "deleteWhiteouts" => Ok(RemoteFunction::DeleteWhiteouts),
            other => Err(ProtocolError::UnknownFunction(other.to_string())),
        }
    }
}
