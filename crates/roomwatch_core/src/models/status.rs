//! Reporting types for recordings and tool installations.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Recording state of one room as seen by the process registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingStatus {
    pub is_recording: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Human-readable reason ("recording", "not recording", "starting",
    /// "stopping", "stopped: exit code N").
    pub status: String,
}

impl RecordingStatus {
    /// No process tracked for the room.
    pub fn idle() -> Self {
        Self {
            is_recording: false,
            pid: None,
            start_time: None,
            duration_seconds: None,
            exit_code: None,
            status: "not recording".to_string(),
        }
    }

    /// A tracked process that is still alive.
    pub fn recording(pid: Option<u32>, start_time: DateTime<Utc>) -> Self {
        let duration = (Utc::now() - start_time).num_milliseconds().max(0) as f64 / 1000.0;
        Self {
            is_recording: true,
            pid,
            start_time: Some(start_time),
            duration_seconds: Some(duration),
            exit_code: None,
            status: "recording".to_string(),
        }
    }

    /// A start is in progress; the tool may still be installing.
    pub fn starting() -> Self {
        Self {
            status: "starting".to_string(),
            ..Self::idle()
        }
    }

    /// A stop is in progress; the process is still alive.
    pub fn stopping(pid: Option<u32>, start_time: DateTime<Utc>) -> Self {
        Self {
            status: "stopping".to_string(),
            ..Self::recording(pid, start_time)
        }
    }

    /// A tracked process that exited on its own since the last check.
    pub fn exited(exit_code: Option<i32>) -> Self {
        let status = match exit_code {
            Some(code) => format!("stopped: exit code {}", code),
            None => "stopped: terminated by signal".to_string(),
        };
        Self {
            is_recording: false,
            pid: None,
            start_time: None,
            duration_seconds: None,
            exit_code,
            status,
        }
    }
}

/// An installed external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInstallation {
    pub tool_name: String,
    pub executable_path: PathBuf,
    /// Release tag, when known (read from the version marker).
    pub installed_version: Option<String>,
    /// Last time the upstream release index was consulted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked: Option<DateTime<Utc>>,
}
