//! Settings struct with TOML-based sections.
//!
//! Settings are organized into logical sections that map to TOML tables.
//! Rooms and tools are arrays/tables of their own at the top level.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::logging::LogLevel;
use crate::models::{RoomSpec, ToolSpec, UpdatePolicy, BILILIVE_RECORDER};

/// Root settings structure containing all configuration sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub monitor: MonitorSettings,

    #[serde(default)]
    pub recorder: RecorderSettings,

    #[serde(default)]
    pub installer: InstallerSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    #[serde(default)]
    pub web: WebSettings,

    #[serde(default)]
    pub postprocess: PostProcessSettings,

    /// Installable tools keyed by name.
    #[serde(default = "default_tools")]
    pub tools: BTreeMap<String, ToolSpec>,

    /// Monitored rooms, in configuration order.
    #[serde(default)]
    pub rooms: Vec<RoomSpec>,
}

fn default_tools() -> BTreeMap<String, ToolSpec> {
    let mut tools = BTreeMap::new();
    tools.insert(BILILIVE_RECORDER.to_string(), ToolSpec::bililive_recorder());
    tools
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            paths: PathSettings::default(),
            monitor: MonitorSettings::default(),
            recorder: RecorderSettings::default(),
            installer: InstallerSettings::default(),
            logging: LoggingSettings::default(),
            web: WebSettings::default(),
            postprocess: PostProcessSettings::default(),
            tools: default_tools(),
            rooms: Vec::new(),
        }
    }
}

impl Settings {
    /// Look up a room by id, on any platform.
    pub fn room(&self, room_id: &str) -> Option<&RoomSpec> {
        self.rooms.iter().find(|r| r.room_id == room_id)
    }

    /// Look up a room by platform and id.
    pub fn room_on(&self, platform: &str, room_id: &str) -> Option<&RoomSpec> {
        self.rooms
            .iter()
            .find(|r| r.platform == platform && r.room_id == room_id)
    }
}

/// Directories for recordings, installed tools and logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathSettings {
    /// Root for per-room output directories.
    #[serde(default = "default_recordings_root")]
    pub recordings_root: PathBuf,

    /// Root for installed tools (one subdirectory per tool).
    #[serde(default = "default_tools_root")]
    pub tools_root: PathBuf,

    /// Folder for log files.
    #[serde(default = "default_logs_folder")]
    pub logs_folder: PathBuf,
}

fn default_recordings_root() -> PathBuf {
    data_dir().join("recordings")
}

fn default_tools_root() -> PathBuf {
    data_dir().join("recorders")
}

fn default_logs_folder() -> PathBuf {
    data_dir().join("logs")
}

/// Per-user data directory, or `./data` when none can be determined.
fn data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "roomwatch")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("data"))
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            recordings_root: default_recordings_root(),
            tools_root: default_tools_root(),
            logs_folder: default_logs_folder(),
        }
    }
}

/// Polling and shutdown timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Seconds between two status polls of the same room.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Timeout of one status request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Delay between the first polls of consecutive rooms.
    #[serde(default = "default_stagger_delay_ms")]
    pub stagger_delay_ms: u64,

    /// Bounded wait when joining a watcher on shutdown.
    #[serde(default = "default_join_timeout_secs")]
    pub join_timeout_secs: u64,

    /// Total budget for stopping recordings on shutdown.
    #[serde(default = "default_shutdown_budget_secs")]
    pub shutdown_budget_secs: u64,
}

fn default_interval_secs() -> u64 {
    300
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_stagger_delay_ms() -> u64 {
    1000
}

fn default_join_timeout_secs() -> u64 {
    5
}

fn default_shutdown_budget_secs() -> u64 {
    30
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            stagger_delay_ms: default_stagger_delay_ms(),
            join_timeout_secs: default_join_timeout_secs(),
            shutdown_budget_secs: default_shutdown_budget_secs(),
        }
    }
}

impl MonitorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stagger_delay(&self) -> Duration {
        Duration::from_millis(self.stagger_delay_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn shutdown_budget(&self) -> Duration {
        Duration::from_secs(self.shutdown_budget_secs)
    }
}

/// Recorder process supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderSettings {
    /// Wait after SIGTERM before escalating to SIGKILL.
    #[serde(default = "default_stop_grace_secs")]
    pub stop_grace_secs: u64,

    /// Wait after SIGKILL before reporting the process as unkillable.
    #[serde(default = "default_kill_grace_secs")]
    pub kill_grace_secs: u64,

    /// Lines of recorder stdout/stderr kept for diagnostics.
    #[serde(default = "default_output_tail_lines")]
    pub output_tail_lines: usize,
}

fn default_stop_grace_secs() -> u64 {
    10
}

fn default_kill_grace_secs() -> u64 {
    5
}

fn default_output_tail_lines() -> usize {
    50
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            stop_grace_secs: default_stop_grace_secs(),
            kill_grace_secs: default_kill_grace_secs(),
            output_tail_lines: default_output_tail_lines(),
        }
    }
}

/// Tool installation and update behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallerSettings {
    #[serde(default)]
    pub update_policy: UpdatePolicy,

    /// Minimum time between two upstream checks under the `interval` policy.
    #[serde(default = "default_update_check_interval_secs")]
    pub update_check_interval_secs: u64,

    /// Transport timeout for release lookups and downloads.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_update_check_interval_secs() -> u64 {
    6 * 60 * 60
}

fn default_download_timeout_secs() -> u64 {
    60
}

impl Default for InstallerSettings {
    fn default() -> Self {
        Self {
            update_policy: UpdatePolicy::default(),
            update_check_interval_secs: default_update_check_interval_secs(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default level when RUST_LOG is not set.
    #[serde(default)]
    pub level: LogLevel,

    /// Also write a daily log file into the logs folder.
    #[serde(default = "default_true")]
    pub file: bool,
}

fn default_true() -> bool {
    true
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            file: true,
        }
    }
}

/// Administrative HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSettings {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Post-processing of finished recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostProcessSettings {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Remux the room's `.flv` files to mp4 after a recording stops.
    #[serde(default)]
    pub remux_on_stop: bool,

    /// Delete the source file after a successful remux/watermark.
    #[serde(default)]
    pub delete_original: bool,

    #[serde(default)]
    pub watermark: WatermarkSettings,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for PostProcessSettings {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            remux_on_stop: false,
            delete_original: false,
            watermark: WatermarkSettings::default(),
        }
    }
}

/// Text overlay burned into remuxed recordings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatermarkSettings {
    /// Burn the overlay after remuxing.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_watermark_text")]
    pub text: String,

    #[serde(default = "default_font")]
    pub font: String,

    #[serde(default = "default_font_size")]
    pub font_size: u32,

    #[serde(default = "default_font_color")]
    pub font_color: String,

    /// top-left, top-right, bottom-left, bottom-right or center.
    #[serde(default = "default_position")]
    pub position: String,

    #[serde(default = "default_margin")]
    pub margin: u32,

    #[serde(default = "default_opacity")]
    pub opacity: f64,

    #[serde(default = "default_true")]
    pub box_enabled: bool,

    #[serde(default = "default_box_color")]
    pub box_color: String,

    #[serde(default = "default_box_opacity")]
    pub box_opacity: f64,
}

fn default_watermark_text() -> String {
    "recorded by roomwatch".to_string()
}

fn default_font() -> String {
    "wqy-microhei".to_string()
}

fn default_font_size() -> u32 {
    24
}

fn default_font_color() -> String {
    "white".to_string()
}

fn default_position() -> String {
    "bottom-right".to_string()
}

fn default_margin() -> u32 {
    10
}

fn default_opacity() -> f64 {
    0.8
}

fn default_box_color() -> String {
    "black".to_string()
}

fn default_box_opacity() -> f64 {
    0.5
}

impl Default for WatermarkSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            text: default_watermark_text(),
            font: default_font(),
            font_size: default_font_size(),
            font_color: default_font_color(),
            position: default_position(),
            margin: default_margin(),
            opacity: default_opacity(),
            box_enabled: true,
            box_color: default_box_color(),
            box_opacity: default_box_opacity(),
        }
    }
}
