//! Shell-backed recorder for tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::{tempdir, TempDir};

use super::ProcessRegistry;
use crate::config::RecorderSettings;
use crate::installer::{InstallError, ToolProvider};
use crate::models::ToolSpec;

/// Hands out `/bin/sh` (through a symlink) as the recorder, with a script
/// passed in the run arguments.
pub(crate) struct ShellTool {
    executable: PathBuf,
    script: String,
    /// Simulated install time.
    ready_delay: Duration,
}

#[async_trait]
impl ToolProvider for ShellTool {
    fn tool_for_platform(&self, platform: &str) -> Option<(String, ToolSpec)> {
        if platform != "bilibili" {
            return None;
        }
        let mut spec = ToolSpec::bililive_recorder();
        spec.executable = "rec".to_string();
        spec.run_args = vec!["-c".to_string(), self.script.clone()];
        Some(("rec".to_string(), spec))
    }

    async fn ensure_ready(&self, _tool_name: &str) -> Result<PathBuf, InstallError> {
        tokio::time::sleep(self.ready_delay).await;
        Ok(self.executable.clone())
    }
}

/// A registry whose recorder runs `script`, with short stop waits.
pub(crate) fn shell_registry(script: &str) -> (ProcessRegistry, TempDir) {
    slow_shell_registry(script, Duration::ZERO)
}

/// Like [`shell_registry`], but every start first waits `ready_delay`.
pub(crate) fn slow_shell_registry(
    script: &str,
    ready_delay: Duration,
) -> (ProcessRegistry, TempDir) {
    crate::logging::init_test_tracing();
    let dir = tempdir().unwrap();
    let tool_dir = dir.path().join("tool");
    std::fs::create_dir_all(&tool_dir).unwrap();
    let executable = tool_dir.join("rec");
    std::os::unix::fs::symlink("/bin/sh", &executable).unwrap();

    let tools = Arc::new(ShellTool {
        executable,
        script: script.to_string(),
        ready_delay,
    });
    let registry = ProcessRegistry::new(
        tools,
        dir.path().join("recordings"),
        &RecorderSettings::default(),
    )
    .with_grace(Duration::from_millis(300), Duration::from_secs(3));
    (registry, dir)
}
