//! Container remux from FLV to MP4.

use std::path::{Path, PathBuf};

use super::{
    batch_output, collect_files, remove_original, Ffmpeg, ProcessorError, ProcessorResult,
};

/// FFmpeg arguments for a stream-copy remux with the index moved to the
/// front of the file.
pub fn remux_args(input: &Path, output: &Path) -> Vec<String> {
    vec![
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-c:v".to_string(),
        "copy".to_string(),
        "-c:a".to_string(),
        "copy".to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

fn is_flv(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("flv"))
}

fn mp4_name(input: &Path) -> String {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    format!("{}.mp4", stem)
}

impl Ffmpeg {
    /// Remux an `.flv` into `.mp4`. The output defaults to the input with
    /// an `.mp4` extension.
    pub async fn remux_to_mp4(
        &self,
        input: &Path,
        output: Option<&Path>,
        delete_original: bool,
    ) -> ProcessorResult<PathBuf> {
        if !input.exists() {
            return Err(ProcessorError::InputNotFound(input.to_path_buf()));
        }
        if !is_flv(input) {
            return Err(ProcessorError::WrongFormat {
                path: input.to_path_buf(),
                expected: "flv".to_string(),
            });
        }

        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| input.with_extension("mp4"));
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!("Remuxing {} -> {}", input.display(), output.display());
        self.run(&remux_args(input, &output)).await?;

        if delete_original {
            remove_original(input).await;
        }
        Ok(output)
    }

    /// Remux every `.flv` below `dir`, including the recorder's per-room
    /// subfolders.
    ///
    /// Outputs go next to their sources, or under `output_dir` with the same
    /// subdirectory layout. Individual failures are logged and skipped; the
    /// produced files are returned.
    pub async fn batch_remux(
        &self,
        dir: &Path,
        output_dir: Option<&Path>,
        delete_original: bool,
    ) -> ProcessorResult<Vec<PathBuf>> {
        let inputs = collect_files(dir, &["flv"]).await?;

        let mut outputs = Vec::new();
        for input in &inputs {
            let output = batch_output(dir, input, output_dir, mp4_name(input));
            match self
                .remux_to_mp4(input, Some(&output), delete_original)
                .await
            {
                Ok(output) => outputs.push(output),
                Err(e) => tracing::error!("Remux of {} failed: {}", input.display(), e),
            }
        }

        tracing::info!(
            "Remuxed {} of {} recordings in {}",
            outputs.len(),
            inputs.len(),
            dir.display()
        );
        Ok(outputs)
    }
}
