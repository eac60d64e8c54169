//! Configuration management for roomwatch.
//!
//! This module provides:
//! - TOML-based configuration with logical sections
//! - Atomic file writes (write to temp, then rename)
//! - Validation of rooms and tools on load
//!
//! # Example
//!
//! ```no_run
//! use roomwatch_core::config::ConfigManager;
//!
//! let mut config = ConfigManager::new(".config/roomwatch.toml");
//! config.load_or_create().unwrap();
//! config.validate().unwrap();
//!
//! for room in &config.settings().rooms {
//!     println!("{} -> {}", room.key(), room.label());
//! }
//! ```

mod manager;
mod settings;

pub use manager::{ConfigError, ConfigManager, ConfigResult};
pub use settings::{
    InstallerSettings, LoggingSettings, MonitorSettings, PathSettings, PostProcessSettings,
    RecorderSettings, Settings, WatermarkSettings, WebSettings,
};
