//! Post-processing of finished recordings with FFmpeg.
//!
//! - Remux `.flv` recordings into `.mp4` without re-encoding
//! - Burn a text watermark into a video
//! - Batch remux or watermark of a directory tree, optionally mirrored
//!   into another directory
//!
//! Every FFmpeg run is bounded by a timeout; a run that exceeds it is
//! killed.

mod remux;
mod watermark;

pub use remux::remux_args;
pub use watermark::{drawtext_filter, position_expr, watermark_args, WatermarkOptions};

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::config::PostProcessSettings;

/// Default bound on a single FFmpeg run.
pub const DEFAULT_FFMPEG_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Errors from post-processing.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("FFmpeg not found at {0}")]
    FfmpegNotFound(PathBuf),

    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("Input {path} is not a .{expected} file")]
    WrongFormat { path: PathBuf, expected: String },

    #[error("FFmpeg failed with exit code {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("FFmpeg timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for post-processing.
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// An FFmpeg executable with a per-run timeout.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    path: PathBuf,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_FFMPEG_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `ffmpeg -version` and return its first output line.
    pub async fn check(&self) -> ProcessorResult<String> {
        let stdout = self.run(&["-version".to_string()]).await?;
        let version = stdout.lines().next().unwrap_or_default().to_string();
        tracing::info!("FFmpeg version: {}", version);
        Ok(version)
    }

    /// Run FFmpeg with `args`, returning stdout on success.
    async fn run(&self, args: &[String]) -> ProcessorResult<String> {
        let mut cmd = Command::new(&self.path);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("Running FFmpeg: {:?}", cmd);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => ProcessorError::FfmpegNotFound(self.path.clone()),
            _ => ProcessorError::Io(e),
        })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ProcessorError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // FFmpeg prints its banner first; the error is at the end
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(ProcessorError::Failed {
                exit_code: output.status.code(),
                stderr: tail.into_iter().rev().collect::<Vec<_>>().join("\n"),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Check that FFmpeg is runnable.
pub async fn check_ffmpeg(ffmpeg_path: &Path) -> ProcessorResult<String> {
    Ffmpeg::new(ffmpeg_path).check().await
}

/// Remux every `.flv` in `dir`, then watermark the results when enabled.
///
/// Returns the number of files produced.
pub async fn process_recordings(settings: &PostProcessSettings, dir: &Path) -> usize {
    let ffmpeg = Ffmpeg::new(&settings.ffmpeg_path);
    let remuxed = match ffmpeg.batch_remux(dir, None, settings.delete_original).await {
        Ok(outputs) => outputs,
        Err(e) => {
            tracing::error!("Remux of {} failed: {}", dir.display(), e);
            return 0;
        }
    };

    if !settings.watermark.enabled {
        return remuxed.len();
    }

    let mut produced = 0;
    for file in &remuxed {
        match ffmpeg
            .burn_text_watermark(file, None, &settings.watermark, settings.delete_original)
            .await
        {
            Ok(_) => produced += 1,
            Err(e) => tracing::error!("Watermark of {} failed: {}", file.display(), e),
        }
    }
    produced
}

/// Files below `dir` at any depth whose extension is one of `extensions`
/// (case-insensitive), in path order.
async fn collect_files(dir: &Path, extensions: &[&str]) -> ProcessorResult<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && has_extension(&path, extensions) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension().is_some_and(|ext| {
        extensions
            .iter()
            .any(|wanted| ext.eq_ignore_ascii_case(wanted))
    })
}

/// Output path for `input` found under `input_dir`.
///
/// Without `output_dir` the file lands next to its input. Otherwise it goes
/// under `output_dir` at the same relative subdirectory.
fn batch_output(
    input_dir: &Path,
    input: &Path,
    output_dir: Option<&Path>,
    file_name: String,
) -> PathBuf {
    match output_dir {
        None => input.with_file_name(file_name),
        Some(output_dir) => {
            let relative = input
                .parent()
                .and_then(|parent| parent.strip_prefix(input_dir).ok())
                .unwrap_or_else(|| Path::new(""));
            output_dir.join(relative).join(file_name)
        }
    }
}

/// Delete a processed input, logging instead of failing.
async fn remove_original(input: &Path) {
    match tokio::fs::remove_file(input).await {
        Ok(()) => tracing::info!("Deleted original {}", input.display()),
        Err(e) => tracing::warn!("Failed to delete original {}: {}", input.display(), e),
    }
}
