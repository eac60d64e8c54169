//! Config manager for loading, validating and saving settings.
//!
//! Key features:
//! - Atomic writes (write to temp file, then rename)
//! - Missing file is created with defaults
//! - Missing keys are filled in with toml_edit, keeping comments and layout
//! - Validation of rooms and tools after load

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use toml_edit::{DocumentMut, Item, Table};

use super::settings::Settings;

/// Errors that can occur during config operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Failed to parse config for editing: {0}")]
    EditParseError(#[from] toml_edit::TomlError),

    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for config operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Manages application configuration.
pub struct ConfigManager {
    /// Path to the config file.
    config_path: PathBuf,
    /// Current settings loaded in memory.
    settings: Settings,
}

impl ConfigManager {
    /// Create a new config manager with the given config file path.
    ///
    /// Does not load the config - call `load()` or `load_or_create()` after.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            settings: Settings::default(),
        }
    }

    /// Get the config file path.
    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get a reference to the current settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Consume the manager, keeping only the settings.
    pub fn into_settings(self) -> Settings {
        self.settings
    }

    /// Load config from file.
    ///
    /// Returns error if file doesn't exist.
    pub fn load(&mut self) -> ConfigResult<()> {
        if !self.config_path.exists() {
            return Err(ConfigError::NotFound(self.config_path.clone()));
        }

        let content = fs::read_to_string(&self.config_path)?;
        self.settings = toml::from_str(&content)?;
        Ok(())
    }

    /// Load config from file, creating with defaults if it doesn't exist.
    ///
    /// A file that was missing defaulted keys gets only those keys added;
    /// existing values, comments and ordering are kept.
    pub fn load_or_create(&mut self) -> ConfigResult<()> {
        if self.config_path.exists() {
            let content = fs::read_to_string(&self.config_path)?;
            let (settings, filled) = self.parse_and_fill_defaults(&content)?;
            self.settings = settings;

            if let Some(filled) = filled {
                tracing::debug!("Filling in defaults in {}", self.config_path.display());
                self.atomic_write(&filled)?;
            }
        } else {
            tracing::info!(
                "Config file not found at {}, creating default config",
                self.config_path.display()
            );
            self.settings = Settings::default();
            self.save()?;
        }
        Ok(())
    }

    /// Parse settings and add any defaulted key the document lacks.
    ///
    /// Returns the updated document text only when something was added.
    fn parse_and_fill_defaults(&self, content: &str) -> ConfigResult<(Settings, Option<String>)> {
        let mut doc: DocumentMut = content.parse()?;
        // Missing fields take their defaults here
        let settings: Settings = toml::from_str(content)?;

        let complete: DocumentMut = toml::to_string_pretty(&settings)?.parse()?;
        let filled = insert_missing(doc.as_table_mut(), complete.as_table());

        Ok((settings, filled.then(|| doc.to_string())))
    }

    /// Check rooms and tools for values the core cannot work with.
    pub fn validate(&self) -> ConfigResult<()> {
        let settings = &self.settings;

        if settings.monitor.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "monitor.interval_secs must be greater than 0".to_string(),
            ));
        }

        for (name, tool) in &settings.tools {
            if tool.github_repo.is_empty() || tool.asset_name.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tool '{}' needs github_repo and asset_name",
                    name
                )));
            }
            if tool.executable.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "tool '{}' needs an executable name",
                    name
                )));
            }
        }

        let mut seen = HashSet::new();
        for room in &settings.rooms {
            if room.room_id.is_empty() {
                return Err(ConfigError::Invalid("room_id cannot be empty".to_string()));
            }
            if !seen.insert(room.key()) {
                return Err(ConfigError::Invalid(format!(
                    "room {} is configured more than once",
                    room.key()
                )));
            }
        }

        Ok(())
    }

    /// Ensure all configured directories exist.
    ///
    /// Should be called after `load_or_create()`.
    pub fn ensure_dirs_exist(&self) -> ConfigResult<()> {
        let paths = &self.settings.paths;
        for dir in [&paths.recordings_root, &paths.tools_root, &paths.logs_folder] {
            if !dir.exists() {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// Save the entire config atomically.
    pub fn save(&self) -> ConfigResult<()> {
        let mut content = String::from("# roomwatch configuration\n\n");
        content.push_str(&toml::to_string_pretty(&self.settings)?);
        self.atomic_write(&content)?;
        Ok(())
    }

    /// Write content to config file atomically.
    ///
    /// Writes to a temp file first, then renames.
    fn atomic_write(&self, content: &str) -> io::Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.config_path.with_extension("toml.tmp");

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.config_path)?;

        Ok(())
    }
}

/// Insert entries of `defaults` that `target` lacks, descending into tables
/// present in both. Arrays such as `[[rooms]]` are left as written.
fn insert_missing(target: &mut Table, defaults: &Table) -> bool {
    let mut inserted = false;
    for (key, default) in defaults.iter() {
        if !target.contains_key(key) {
            target.insert(key, detached(default));
            inserted = true;
            continue;
        }
        if let (Some(existing), Some(default)) = (
            target.get_mut(key).and_then(Item::as_table_mut),
            default.as_table(),
        ) {
            inserted |= insert_missing(existing, default);
        }
    }
    inserted
}

/// Copy of `item` whose tables carry no position from their source
/// document, so they are written after the existing content.
fn detached(item: &Item) -> Item {
    match item.as_table() {
        Some(table) => {
            let mut copy = Table::new();
            copy.set_implicit(table.is_implicit());
            for (key, child) in table.iter() {
                copy.insert(key, detached(child));
            }
            Item::Table(copy)
        }
        None => item.clone(),
    }
}
