//! Static description of an installable external tool.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Name of the built-in recorder tool entry.
pub const BILILIVE_RECORDER: &str = "bililive_recorder";

/// When the installer re-checks upstream for an already installed tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Run the full install pipeline on every `ensure_ready`.
    Always,
    /// Check the release index at most once per check interval.
    #[default]
    Interval,
    /// Trust whatever executable is on disk.
    Never,
}

/// Where a tool comes from, how it is laid out, and how it is launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Name used in logs.
    pub display_name: String,

    /// GitHub "owner/repo" publishing the releases.
    pub github_repo: String,

    /// Release asset to download (`.zip`, `.tar.gz` or `.tgz`).
    pub asset_name: String,

    /// Executable file name searched for inside the archive.
    pub executable: String,

    /// Install directory. Defaults to `<tools_root>/<tool name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_dir: Option<PathBuf>,

    /// Platforms this tool records.
    #[serde(default)]
    pub platforms: Vec<String>,

    /// Room URL written into the per-room config. `{room_id}` is substituted.
    pub room_url_template: String,

    /// Launch arguments. `{work_dir}` and `{config_path}` are substituted.
    #[serde(default = "default_run_args")]
    pub run_args: Vec<String>,
}

fn default_run_args() -> Vec<String> {
    vec!["run".to_string(), "{work_dir}".to_string()]
}

impl ToolSpec {
    /// The BililiveRecorder CLI, published as a linux-x64 zip.
    pub fn bililive_recorder() -> Self {
        Self {
            display_name: "BililiveRecorder".to_string(),
            github_repo: "BililiveRecorder/BililiveRecorder".to_string(),
            asset_name: "BililiveRecorder-CLI-linux-x64.zip".to_string(),
            executable: "BililiveRecorder.Cli".to_string(),
            install_dir: None,
            platforms: vec!["bilibili".to_string()],
            room_url_template: "https://live.bilibili.com/{room_id}".to_string(),
            run_args: default_run_args(),
        }
    }

    /// Whether this tool records rooms of the given platform.
    pub fn supports(&self, platform: &str) -> bool {
        self.platforms.iter().any(|p| p == platform)
    }

    /// Room URL for a room id.
    pub fn room_url(&self, room_id: &str) -> String {
        self.room_url_template.replace("{room_id}", room_id)
    }
}
