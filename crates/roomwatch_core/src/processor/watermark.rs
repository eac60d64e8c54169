//! Text watermark burn-in using FFmpeg's `drawtext` filter.

use std::path::{Path, PathBuf};

use super::{
    batch_output, collect_files, remove_original, Ffmpeg, ProcessorError, ProcessorResult,
};
use crate::config::WatermarkSettings;

/// Video formats picked up by a batch watermark.
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "flv", "avi", "mkv", "mov"];

const SUFFIX: &str = "_watermark";

/// Watermark appearance, as configured under `[postprocess.watermark]`.
pub type WatermarkOptions = WatermarkSettings;

/// `drawtext` x/y expressions for a named position.
///
/// Unknown positions fall back to bottom-left.
pub fn position_expr(position: &str, margin: u32) -> (String, String) {
    match position {
        "top-left" => (margin.to_string(), margin.to_string()),
        "top-right" => (
            format!("main_w-text_w-{}", margin),
            margin.to_string(),
        ),
        "bottom-left" => (margin.to_string(), format!("main_h-text_h-{}", margin)),
        "bottom-right" => (
            format!("main_w-text_w-{}", margin),
            format!("main_h-text_h-{}", margin),
        ),
        "center" => ("(main_w-text_w)/2".to_string(), "(main_h-text_h)/2".to_string()),
        _ => (margin.to_string(), format!("main_h-text_h-{}", margin)),
    }
}

/// Build the `drawtext=...` filter for the options.
pub fn drawtext_filter(options: &WatermarkOptions) -> String {
    let (x, y) = position_expr(&options.position, options.margin);
    // Single quotes delimit the text and cannot be escaped inside it
    let text = options.text.replace('\'', "");

    let mut params = vec![
        format!("text='{}'", text),
        format!("fontfile={}", options.font),
        format!("fontsize={}", options.font_size),
        format!("fontcolor={}@{}", options.font_color, options.opacity),
        format!("x={}", x),
        format!("y={}", y),
    ];

    if options.box_enabled {
        params.push("box=1".to_string());
        params.push(format!("boxcolor={}@{}", options.box_color, options.box_opacity));
        params.push("boxborderw=5".to_string());
    }

    format!("drawtext={}", params.join(":"))
}

/// FFmpeg arguments for burning the watermark, copying audio.
pub fn watermark_args(input: &Path, output: &Path, options: &WatermarkOptions) -> Vec<String> {
    vec![
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
        "-vf".to_string(),
        drawtext_filter(options),
        "-c:a".to_string(),
        "copy".to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ]
}

/// `<stem>_watermark<ext>`.
fn watermarked_name(input: &Path) -> String {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    match input.extension() {
        Some(ext) => format!("{}{}.{}", stem, SUFFIX, ext.to_string_lossy()),
        None => format!("{}{}", stem, SUFFIX),
    }
}

fn default_output(input: &Path) -> PathBuf {
    input.with_file_name(watermarked_name(input))
}

fn is_watermarked(path: &Path) -> bool {
    path.file_stem()
        .is_some_and(|stem| stem.to_string_lossy().ends_with(SUFFIX))
}

impl Ffmpeg {
    /// Burn a text watermark into a video.
    pub async fn burn_text_watermark(
        &self,
        input: &Path,
        output: Option<&Path>,
        options: &WatermarkOptions,
        delete_original: bool,
    ) -> ProcessorResult<PathBuf> {
        if !input.exists() {
            return Err(ProcessorError::InputNotFound(input.to_path_buf()));
        }

        let output = output
            .map(Path::to_path_buf)
            .unwrap_or_else(|| default_output(input));
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tracing::info!("Watermarking {} -> {}", input.display(), output.display());
        self.run(&watermark_args(input, &output, options)).await?;

        if delete_original {
            remove_original(input).await;
        }
        Ok(output)
    }

    /// Watermark every video below `dir`.
    ///
    /// Outputs are `<stem>_watermark<ext>`, next to their sources or under
    /// `output_dir` with the same subdirectory layout. Files that already
    /// carry the suffix are skipped. Individual failures are logged; the
    /// produced files are returned.
    pub async fn batch_watermark(
        &self,
        dir: &Path,
        output_dir: Option<&Path>,
        options: &WatermarkOptions,
        delete_original: bool,
    ) -> ProcessorResult<Vec<PathBuf>> {
        let inputs: Vec<PathBuf> = collect_files(dir, VIDEO_EXTENSIONS)
            .await?
            .into_iter()
            .filter(|path| !is_watermarked(path))
            .collect();

        let mut outputs = Vec::new();
        for input in &inputs {
            let output = batch_output(dir, input, output_dir, watermarked_name(input));
            match self
                .burn_text_watermark(input, Some(&output), options, delete_original)
                .await
            {
                Ok(output) => outputs.push(output),
                Err(e) => tracing::error!("Watermark of {} failed: {}", input.display(), e),
            }
        }

        tracing::info!(
            "Watermarked {} of {} videos in {}",
            outputs.len(),
            inputs.len(),
            dir.display()
        );
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_map_to_expressions() {
        assert_eq!(position_expr("top-left", 10), ("10".into(), "10".into()));
        assert_eq!(
            position_expr("bottom-right", 8),
            ("main_w-text_w-8".into(), "main_h-text_h-8".into())
        );
        assert_eq!(
            position_expr("center", 10),
            ("(main_w-text_w)/2".into(), "(main_h-text_h)/2".into())
        );
        // Unknown names fall back to bottom-left
        assert_eq!(
            position_expr("somewhere", 4),
            ("4".into(), "main_h-text_h-4".into())
        );
    }

    #[test]
    fn filter_includes_box_when_enabled() {
        let options = WatermarkOptions::default();
        let filter = drawtext_filter(&options);

        assert!(filter.starts_with("drawtext=text='recorded by roomwatch'"));
        assert!(filter.contains(":fontcolor=white@0.8:"));
        assert!(filter.contains(":x=main_w-text_w-10:y=main_h-text_h-10"));
        assert!(filter.ends_with(":box=1:boxcolor=black@0.5:boxborderw=5"));
    }

    #[test]
    fn filter_without_box_and_quotes_stripped() {
        let options = WatermarkOptions {
            text: "it's live".to_string(),
            box_enabled: false,
            position: "top-left".to_string(),
            ..WatermarkOptions::default()
        };
        let filter = drawtext_filter(&options);

        assert!(filter.starts_with("drawtext=text='its live'"));
        assert!(!filter.contains("box=1"));
    }

    #[test]
    fn watermark_args_copy_audio() {
        let args = watermark_args(
            Path::new("/rec/a.mp4"),
            Path::new("/rec/a_watermark.mp4"),
            &WatermarkOptions::default(),
        );
        assert_eq!(args[0], "-i");
        assert_eq!(args[2], "-vf");
        assert!(args[3].starts_with("drawtext="));
        assert_eq!(&args[4..], &["-c:a", "copy", "-y", "/rec/a_watermark.mp4"]);
    }

    #[test]
    fn default_output_adds_suffix() {
        assert_eq!(
            default_output(Path::new("/rec/a.mp4")),
            PathBuf::from("/rec/a_watermark.mp4")
        );
        assert!(is_watermarked(Path::new("/rec/a_watermark.mp4")));
        assert!(!is_watermarked(Path::new("/rec/a.mp4")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn batch_watermark_covers_existing_videos() {
        let dir = tempfile::tempdir().unwrap();
        let room_dir = dir.path().join("2233-anchor");
        std::fs::create_dir_all(&room_dir).unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        std::fs::write(room_dir.join("b.MKV"), b"x").unwrap();
        std::fs::write(room_dir.join("b_watermark.mp4"), b"x").unwrap();
        std::fs::write(room_dir.join("notes.txt"), b"x").unwrap();

        // `true` accepts any arguments and succeeds without writing output
        let outputs = Ffmpeg::new("true")
            .batch_watermark(dir.path(), None, &WatermarkOptions::default(), false)
            .await
            .unwrap();

        assert_eq!(
            outputs,
            vec![
                room_dir.join("b_watermark.MKV"),
                dir.path().join("a_watermark.mp4"),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn batch_watermark_mirrors_layout_into_output_dir() {
        let dir = tempfile::tempdir().unwrap();
        let input_dir = dir.path().join("in");
        let output_dir = dir.path().join("out");
        std::fs::create_dir_all(input_dir.join("room")).unwrap();
        std::fs::write(input_dir.join("room").join("a.flv"), b"x").unwrap();

        let outputs = Ffmpeg::new("true")
            .batch_watermark(&input_dir, Some(&output_dir), &WatermarkOptions::default(), true)
            .await
            .unwrap();

        assert_eq!(outputs, vec![output_dir.join("room").join("a_watermark.flv")]);
        assert!(!input_dir.join("room").join("a.flv").exists());
    }
}
