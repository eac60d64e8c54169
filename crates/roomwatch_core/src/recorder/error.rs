//! Error types for recorder process management.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::installer::InstallError;

/// Failure to start or stop a recorder process.
#[derive(Error, Debug)]
pub enum RecorderError {
    /// The recorder tool could not be made ready, or no tool records the
    /// room's platform.
    #[error("Recorder unavailable for {room}: {message}")]
    ToolUnavailable {
        room: String,
        message: String,
        #[source]
        source: Option<InstallError>,
    },

    /// The per-room working configuration could not be written.
    #[error("Failed to prepare work directory {path}: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The OS refused to create the process.
    #[error("Failed to spawn recorder for {room}: {source}")]
    SpawnFailed {
        room: String,
        #[source]
        source: io::Error,
    },

    /// The process survived both the graceful stop and the forced kill.
    /// An orphaned recorder may still be writing output.
    #[error("Recorder for {room} (pid {pid:?}) could not be confirmed dead after kill")]
    StopTimeout { room: String, pid: Option<u32> },

    /// Delivering a signal to the process failed.
    #[error("Failed to signal recorder for {room}: {message}")]
    Signal { room: String, message: String },
}

impl RecorderError {
    pub fn no_tool(room: impl Into<String>, platform: &str) -> Self {
        Self::ToolUnavailable {
            room: room.into(),
            message: format!("no recorder tool supports platform '{}'", platform),
            source: None,
        }
    }

    pub fn install_failed(room: impl Into<String>, source: InstallError) -> Self {
        Self::ToolUnavailable {
            room: room.into(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn work_dir(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::WorkDir {
            path: path.into(),
            source,
        }
    }

    pub fn signal(room: impl Into<String>, message: impl ToString) -> Self {
        Self::Signal {
            room: room.into(),
            message: message.to_string(),
        }
    }
}
