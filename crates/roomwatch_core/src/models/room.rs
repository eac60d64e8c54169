//! Room identity and per-poll observations.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Platform used when a room entry does not name one.
pub const DEFAULT_PLATFORM: &str = "bilibili";

/// Immutable identity of one monitored room.
///
/// Supplied by configuration and never mutated by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSpec {
    /// Streaming platform name (e.g. "bilibili").
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Platform-specific room id.
    pub room_id: String,

    /// Human-readable name for logs and the admin API.
    #[serde(default, rename = "name")]
    pub display_name: String,

    /// Where recorded artifacts go. Derived from the recordings root when unset.
    #[serde(default, rename = "output_dir", skip_serializing_if = "Option::is_none")]
    pub output_directory: Option<PathBuf>,
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

impl RoomSpec {
    /// Create a room on the given platform.
    pub fn new(platform: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            room_id: room_id.into(),
            display_name: String::new(),
            output_directory: None,
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Set an explicit output directory.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_directory = Some(dir.into());
        self
    }

    /// The map key for this room.
    pub fn key(&self) -> RoomKey {
        RoomKey::new(&self.platform, &self.room_id)
    }

    /// Display name, falling back to "room <id>".
    pub fn label(&self) -> String {
        if self.display_name.is_empty() {
            format!("room {}", self.room_id)
        } else {
            self.display_name.clone()
        }
    }

    /// Resolve the output directory against the recordings root.
    pub fn resolve_output_dir(&self, recordings_root: &Path) -> PathBuf {
        match &self.output_directory {
            Some(dir) => dir.clone(),
            None => recordings_root.join(&self.platform).join(&self.room_id),
        }
    }
}

/// Unique identifier of a physical room: platform + room id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomKey {
    platform: String,
    room_id: String,
}

impl RoomKey {
    pub fn new(platform: impl Into<String>, room_id: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            room_id: room_id.into(),
        }
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.platform, self.room_id)
    }
}

/// One poll result. Produced fresh on every poll, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveObservation {
    pub is_live: bool,
    pub title: String,
    pub anchor_name: String,
}

impl LiveObservation {
    pub fn live(title: impl Into<String>, anchor_name: impl Into<String>) -> Self {
        Self {
            is_live: true,
            title: title.into(),
            anchor_name: anchor_name.into(),
        }
    }

    pub fn offline() -> Self {
        Self::default()
    }
}
