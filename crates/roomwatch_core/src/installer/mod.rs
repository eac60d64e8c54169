//! Installation and updating of external tools.
//!
//! The pipeline for one tool is:
//! 1. Resolve the target version (latest release when not given)
//! 2. Download the release asset into a scratch directory
//! 3. Extract it and locate the executable
//! 4. Swap the executable into place and write the version marker
//!
//! The scratch directory lives inside the install directory and is removed
//! on drop, so every exit path cleans up after itself. Installs of the same
//! tool are serialized on a per-tool async mutex; different tools install
//! concurrently.

mod archive;
mod error;
mod release;

pub use archive::{extract_archive, find_executable};
pub use error::InstallError;
pub use release::{GitHubReleases, ReleaseSource};

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::config::{InstallerSettings, Settings};
use crate::models::{ToolInstallation, ToolSpec, UpdatePolicy};

/// Gives the recorder side access to tools without knowing how they are
/// installed.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// The tool that records rooms of `platform`, with its name.
    fn tool_for_platform(&self, platform: &str) -> Option<(String, ToolSpec)>;

    /// Make the tool ready to run and return its executable path.
    async fn ensure_ready(&self, tool_name: &str) -> Result<PathBuf, InstallError>;
}

type ToolSlot = Arc<tokio::sync::Mutex<Option<ToolInstallation>>>;

/// Installs and updates the configured tools.
pub struct Installer {
    tools: BTreeMap<String, ToolSpec>,
    tools_root: PathBuf,
    policy: UpdatePolicy,
    check_interval: Duration,
    source: Arc<dyn ReleaseSource>,
    /// Per-tool install locks. The outer lock is only held to fetch a slot.
    slots: parking_lot::Mutex<HashMap<String, ToolSlot>>,
    /// Last known installation per tool, readable while an install runs.
    snapshots: parking_lot::Mutex<HashMap<String, ToolInstallation>>,
}

impl Installer {
    pub fn new(
        tools: BTreeMap<String, ToolSpec>,
        tools_root: impl Into<PathBuf>,
        settings: &InstallerSettings,
        source: Arc<dyn ReleaseSource>,
    ) -> Self {
        Self {
            tools,
            tools_root: tools_root.into(),
            policy: settings.update_policy,
            check_interval: Duration::from_secs(settings.update_check_interval_secs),
            source,
            slots: parking_lot::Mutex::new(HashMap::new()),
            snapshots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Installer for the configured tools, backed by GitHub releases.
    pub fn from_settings(settings: &Settings) -> Result<Self, InstallError> {
        let source = GitHubReleases::new(Duration::from_secs(
            settings.installer.download_timeout_secs,
        ))?;
        Ok(Self::new(
            settings.tools.clone(),
            &settings.paths.tools_root,
            &settings.installer,
            Arc::new(source),
        ))
    }

    pub fn spec(&self, tool_name: &str) -> Option<&ToolSpec> {
        self.tools.get(tool_name)
    }

    /// Install directory of a tool.
    pub fn install_dir(&self, tool_name: &str, spec: &ToolSpec) -> PathBuf {
        spec.install_dir
            .clone()
            .unwrap_or_else(|| self.tools_root.join(tool_name))
    }

    /// Expected path of a tool's executable.
    pub fn executable_path(&self, tool_name: &str, spec: &ToolSpec) -> PathBuf {
        self.install_dir(tool_name, spec).join(&spec.executable)
    }

    /// Last known installation of a tool, if any.
    pub fn installation(&self, tool_name: &str) -> Option<ToolInstallation> {
        if let Some(snapshot) = self.snapshots.lock().get(tool_name) {
            return Some(snapshot.clone());
        }
        let spec = self.tools.get(tool_name)?;
        self.read_existing(tool_name, spec)
    }

    /// Installations of every configured tool that is present on disk.
    pub fn installations(&self) -> Vec<ToolInstallation> {
        self.tools
            .keys()
            .filter_map(|name| self.installation(name))
            .collect()
    }

    /// Make sure the tool's executable is present, updating it according to
    /// the update policy.
    ///
    /// If the executable already exists, failed lookups or updates are
    /// logged and the existing executable is used.
    pub async fn ensure_ready(&self, tool_name: &str) -> Result<PathBuf, InstallError> {
        let spec = self.require_spec(tool_name)?;
        let executable = self.executable_path(tool_name, spec);

        let slot = self.slot(tool_name);
        let mut guard = slot.lock().await;
        let state = &mut *guard;

        if state.is_none() {
            *state = self.read_existing(tool_name, spec);
        }

        if !executable.exists() {
            tracing::info!("{} is not installed, installing", spec.display_name);
            let installation = self.install_locked(tool_name, spec, state, None).await?;
            return Ok(installation.executable_path);
        }

        match self.policy {
            UpdatePolicy::Never => {}
            UpdatePolicy::Always => {
                if let Err(e) = self.install_locked(tool_name, spec, state, None).await {
                    tracing::warn!(
                        "Update of {} failed, keeping installed copy: {}",
                        spec.display_name,
                        e
                    );
                }
            }
            UpdatePolicy::Interval => {
                if self.check_due(state.as_ref()) {
                    self.check_for_update(tool_name, spec, state).await;
                }
            }
        }

        Ok(executable)
    }

    /// Install `version` (latest release when `None`) of a tool.
    ///
    /// Installing the version that is already present is a no-op.
    pub async fn install(
        &self,
        tool_name: &str,
        version: Option<&str>,
    ) -> Result<ToolInstallation, InstallError> {
        let spec = self.require_spec(tool_name)?;

        let slot = self.slot(tool_name);
        let mut guard = slot.lock().await;
        let state = &mut *guard;

        if state.is_none() {
            *state = self.read_existing(tool_name, spec);
        }

        self.install_locked(tool_name, spec, state, version).await
    }

    fn require_spec(&self, tool_name: &str) -> Result<&ToolSpec, InstallError> {
        self.tools
            .get(tool_name)
            .ok_or_else(|| InstallError::UnknownTool(tool_name.to_string()))
    }

    fn slot(&self, tool_name: &str) -> ToolSlot {
        self.slots
            .lock()
            .entry(tool_name.to_string())
            .or_default()
            .clone()
    }

    fn check_due(&self, state: Option<&ToolInstallation>) -> bool {
        let Some(last_checked) = state.and_then(|s| s.last_checked) else {
            return true;
        };
        let elapsed = (Utc::now() - last_checked).to_std().unwrap_or_default();
        elapsed >= self.check_interval
    }

    async fn check_for_update(
        &self,
        tool_name: &str,
        spec: &ToolSpec,
        state: &mut Option<ToolInstallation>,
    ) {
        let latest = match self.source.latest_version(&spec.github_repo).await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!("Update check for {} failed: {}", spec.display_name, e);
                self.mark_checked(tool_name, state);
                return;
            }
        };

        let installed = state.as_ref().and_then(|s| s.installed_version.clone());
        if installed.as_deref() == Some(latest.as_str()) {
            tracing::debug!("{} is up to date ({})", spec.display_name, latest);
            self.mark_checked(tool_name, state);
            return;
        }

        tracing::info!(
            "Updating {} from {} to {}",
            spec.display_name,
            installed.as_deref().unwrap_or("unknown version"),
            latest
        );
        if let Err(e) = self
            .install_locked(tool_name, spec, state, Some(&latest))
            .await
        {
            tracing::warn!(
                "Update of {} failed, keeping installed copy: {}",
                spec.display_name,
                e
            );
            self.mark_checked(tool_name, state);
        }
    }

    fn mark_checked(&self, tool_name: &str, state: &mut Option<ToolInstallation>) {
        if let Some(installation) = state.as_mut() {
            installation.last_checked = Some(Utc::now());
            self.snapshots
                .lock()
                .insert(tool_name.to_string(), installation.clone());
        }
    }

    /// Run the pipeline. The caller holds the tool's slot lock.
    async fn install_locked(
        &self,
        tool_name: &str,
        spec: &ToolSpec,
        state: &mut Option<ToolInstallation>,
        version: Option<&str>,
    ) -> Result<ToolInstallation, InstallError> {
        let version = match version {
            Some(v) => v.to_string(),
            None => self.source.latest_version(&spec.github_repo).await?,
        };

        let executable = self.executable_path(tool_name, spec);
        if let Some(current) = state.as_mut() {
            if current.installed_version.as_deref() == Some(version.as_str())
                && executable.exists()
            {
                tracing::debug!("{} {} already installed", spec.display_name, version);
                current.last_checked = Some(Utc::now());
                let current = current.clone();
                self.snapshots
                    .lock()
                    .insert(tool_name.to_string(), current.clone());
                return Ok(current);
            }
        }

        let install_dir = self.install_dir(tool_name, spec);
        tokio::fs::create_dir_all(&install_dir).await?;

        let scratch = tempfile::Builder::new()
            .prefix(".install-")
            .tempdir_in(&install_dir)?;
        let archive_path = scratch.path().join(&spec.asset_name);
        let extract_dir = scratch.path().join("extract");

        self.source.download(spec, &version, &archive_path).await?;

        tracing::info!("Extracting {}", spec.asset_name);
        let executable_name = spec.executable.clone();
        let found = tokio::task::spawn_blocking(move || {
            extract_archive(&archive_path, &extract_dir)?;
            find_executable(&extract_dir, &executable_name)
                .ok_or(InstallError::ExecutableNotFound(executable_name))
        })
        .await
        .map_err(InstallError::extract)??;

        archive::swap_in(&found, &executable)?;
        tokio::fs::write(version_marker(&executable), &version).await?;

        if let Err(e) = scratch.close() {
            tracing::warn!("Failed to remove install scratch directory: {}", e);
        }

        let installation = ToolInstallation {
            tool_name: tool_name.to_string(),
            executable_path: executable.clone(),
            installed_version: Some(version.clone()),
            last_checked: Some(Utc::now()),
        };
        *state = Some(installation.clone());
        self.snapshots
            .lock()
            .insert(tool_name.to_string(), installation.clone());

        tracing::info!(
            "Installed {} {} to {}",
            spec.display_name,
            version,
            executable.display()
        );
        Ok(installation)
    }

    /// Installation found on disk, with the version from its marker file.
    fn read_existing(&self, tool_name: &str, spec: &ToolSpec) -> Option<ToolInstallation> {
        let executable = self.executable_path(tool_name, spec);
        if !executable.exists() {
            return None;
        }
        let installed_version = fs::read_to_string(version_marker(&executable))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Some(ToolInstallation {
            tool_name: tool_name.to_string(),
            executable_path: executable,
            installed_version,
            last_checked: None,
        })
    }
}

/// `<executable>.version`, next to the executable.
fn version_marker(executable: &Path) -> PathBuf {
    let mut name = executable
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".version");
    executable.with_file_name(name)
}

#[async_trait]
impl ToolProvider for Installer {
    fn tool_for_platform(&self, platform: &str) -> Option<(String, ToolSpec)> {
        self.tools
            .iter()
            .find(|(_, spec)| spec.supports(platform))
            .map(|(name, spec)| (name.clone(), spec.clone()))
    }

    async fn ensure_ready(&self, tool_name: &str) -> Result<PathBuf, InstallError> {
        Installer::ensure_ready(self, tool_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    const TOOL: &str = "rec";

    /// Release source serving an in-memory zip.
    struct FakeReleases {
        latest: parking_lot::Mutex<String>,
        archive: Vec<u8>,
        fail_lookup: bool,
        lookups: AtomicUsize,
        downloads: AtomicUsize,
    }

    impl FakeReleases {
        fn new(latest: &str, archive: Vec<u8>) -> Self {
            Self {
                latest: parking_lot::Mutex::new(latest.to_string()),
                archive,
                fail_lookup: false,
                lookups: AtomicUsize::new(0),
                downloads: AtomicUsize::new(0),
            }
        }

        fn unreachable() -> Self {
            Self {
                fail_lookup: true,
                ..Self::new("", Vec::new())
            }
        }
    }

    #[async_trait]
    impl ReleaseSource for FakeReleases {
        async fn latest_version(&self, repo: &str) -> Result<String, InstallError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail_lookup {
                return Err(InstallError::version_lookup(repo, "offline"));
            }
            Ok(self.latest.lock().clone())
        }

        async fn download(
            &self,
            _spec: &ToolSpec,
            _version: &str,
            dest: &Path,
        ) -> Result<(), InstallError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            // Widen the window in which a second install could overlap
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(dest, &self.archive).await?;
            Ok(())
        }
    }

    fn zip_with(entry: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default().unix_permissions(0o644);
        writer.start_file(entry, options).unwrap();
        writer.write_all(b"#!/bin/sh\nexit 0\n").unwrap();
        writer.finish().unwrap().into_inner()
    }

    fn tool_spec() -> ToolSpec {
        ToolSpec {
            display_name: "Rec".to_string(),
            github_repo: "owner/rec".to_string(),
            asset_name: "rec-linux.zip".to_string(),
            executable: TOOL.to_string(),
            install_dir: None,
            platforms: vec!["bilibili".to_string()],
            room_url_template: "https://live.example.com/{room_id}".to_string(),
            run_args: vec!["run".to_string(), "{work_dir}".to_string()],
        }
    }

    fn installer(root: &Path, policy: UpdatePolicy, source: Arc<FakeReleases>) -> Installer {
        let mut tools = BTreeMap::new();
        tools.insert(TOOL.to_string(), tool_spec());
        let settings = InstallerSettings {
            update_policy: policy,
            update_check_interval_secs: 3600,
            download_timeout_secs: 5,
        };
        Installer::new(tools, root, &settings, source)
    }

    fn scratch_dirs(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir)
            .unwrap()
            .flatten()
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .is_some_and(|n| n.to_string_lossy().starts_with(".install-"))
            })
            .collect()
    }

    #[tokio::test]
    async fn concurrent_installs_download_once() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeReleases::new("v1.0.0", zip_with("pkg/rec")));
        let installer = installer(dir.path(), UpdatePolicy::Always, source.clone());

        let (a, b) = tokio::join!(installer.install(TOOL, None), installer.install(TOOL, None));

        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(source.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(a.installed_version.as_deref(), Some("v1.0.0"));
        assert_eq!(a.executable_path, b.executable_path);
    }

    #[tokio::test]
    async fn install_places_executable_and_cleans_scratch() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeReleases::new("v1.0.0", zip_with("pkg/bin/rec")));
        let installer = installer(dir.path(), UpdatePolicy::Interval, source);

        let installation = installer.install(TOOL, None).await.unwrap();

        let install_dir = dir.path().join(TOOL);
        assert_eq!(installation.executable_path, install_dir.join(TOOL));
        assert!(installation.executable_path.exists());
        assert_eq!(
            fs::read_to_string(install_dir.join("rec.version")).unwrap(),
            "v1.0.0"
        );
        assert!(scratch_dirs(&install_dir).is_empty());

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&installation.executable_path)
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }

    #[tokio::test]
    async fn missing_executable_fails_and_cleans_scratch() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeReleases::new("v1.0.0", zip_with("pkg/README")));
        let installer = installer(dir.path(), UpdatePolicy::Interval, source);

        let result = installer.install(TOOL, None).await;

        assert!(matches!(result, Err(InstallError::ExecutableNotFound(_))));
        let install_dir = dir.path().join(TOOL);
        assert!(!install_dir.join(TOOL).exists());
        assert!(scratch_dirs(&install_dir).is_empty());
        assert!(installer.installation(TOOL).is_none());
    }

    #[tokio::test]
    async fn ensure_ready_reuses_fresh_install_within_interval() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeReleases::new("v1.0.0", zip_with("rec")));
        let installer = installer(dir.path(), UpdatePolicy::Interval, source.clone());

        let first = installer.ensure_ready(TOOL).await.unwrap();
        let second = installer.ensure_ready(TOOL).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(source.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn always_policy_updates_to_new_release() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeReleases::new("v1.0.0", zip_with("rec")));
        let installer = installer(dir.path(), UpdatePolicy::Always, source.clone());

        installer.ensure_ready(TOOL).await.unwrap();
        installer.ensure_ready(TOOL).await.unwrap();
        assert_eq!(source.downloads.load(Ordering::SeqCst), 1);

        *source.latest.lock() = "v1.1.0".to_string();
        installer.ensure_ready(TOOL).await.unwrap();

        assert_eq!(source.downloads.load(Ordering::SeqCst), 2);
        let installation = installer.installation(TOOL).unwrap();
        assert_eq!(installation.installed_version.as_deref(), Some("v1.1.0"));
    }

    #[tokio::test]
    async fn failed_lookup_keeps_existing_executable() {
        let dir = tempdir().unwrap();
        let install_dir = dir.path().join(TOOL);
        fs::create_dir_all(&install_dir).unwrap();
        fs::write(install_dir.join(TOOL), b"old").unwrap();
        fs::write(install_dir.join("rec.version"), "v0.9.0\n").unwrap();

        let source = Arc::new(FakeReleases::unreachable());
        let installer = installer(dir.path(), UpdatePolicy::Always, source.clone());

        let path = installer.ensure_ready(TOOL).await.unwrap();

        assert_eq!(path, install_dir.join(TOOL));
        assert_eq!(source.downloads.load(Ordering::SeqCst), 0);
        let installation = installer.installation(TOOL).unwrap();
        assert_eq!(installation.installed_version.as_deref(), Some("v0.9.0"));
    }

    #[tokio::test]
    async fn never_policy_skips_lookup_and_missing_tool_needs_lookup() {
        let dir = tempdir().unwrap();
        let install_dir = dir.path().join(TOOL);
        fs::create_dir_all(&install_dir).unwrap();
        fs::write(install_dir.join(TOOL), b"cached").unwrap();

        let source = Arc::new(FakeReleases::unreachable());
        let installer = installer(dir.path(), UpdatePolicy::Never, source.clone());

        installer.ensure_ready(TOOL).await.unwrap();
        assert_eq!(source.lookups.load(Ordering::SeqCst), 0);

        fs::remove_file(install_dir.join(TOOL)).unwrap();
        let result = installer.ensure_ready(TOOL).await;
        assert!(matches!(
            result,
            Err(InstallError::VersionLookupFailed { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeReleases::new("v1", Vec::new()));
        let installer = installer(dir.path(), UpdatePolicy::Interval, source);

        let result = installer.ensure_ready("missing").await;
        assert!(matches!(result, Err(InstallError::UnknownTool(_))));
    }

    #[test]
    fn platform_lookup_finds_supporting_tool() {
        let dir = tempdir().unwrap();
        let source = Arc::new(FakeReleases::new("v1", Vec::new()));
        let installer = installer(dir.path(), UpdatePolicy::Interval, source);

        let (name, spec) = installer.tool_for_platform("bilibili").unwrap();
        assert_eq!(name, TOOL);
        assert_eq!(spec.executable, TOOL);
        assert!(installer.tool_for_platform("douyu").is_none());
    }
}
