//! Per-room working directory and recorder configuration file.
//!
//! The file is input for the external recorder only; it is rewritten on
//! every start and never read back.

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::RecorderError;
use crate::models::{RoomSpec, ToolSpec};

/// Seconds between the recorder's own status checks.
const RECORDER_POLL_SECS: u32 = 30;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RecorderConfig {
    global: GlobalSection,
    rooms: Vec<RoomSection>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GlobalSection {
    enable_monitor: bool,
    timer: u32,
    cookie: String,
    output: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RoomSection {
    url: String,
    auto_record: bool,
    cookie: String,
    output: PathBuf,
}

/// Paths prepared for one recording.
#[derive(Debug, Clone)]
pub struct RoomWorkDir {
    pub work_dir: PathBuf,
    pub config_path: PathBuf,
    pub output_dir: PathBuf,
}

impl RoomWorkDir {
    /// Substitute `{work_dir}` and `{config_path}` in the tool's run arguments.
    pub fn render_args(&self, run_args: &[String]) -> Vec<String> {
        let work_dir = self.work_dir.to_string_lossy();
        let config_path = self.config_path.to_string_lossy();
        run_args
            .iter()
            .map(|arg| {
                arg.replace("{work_dir}", &work_dir)
                    .replace("{config_path}", &config_path)
            })
            .collect()
    }
}

/// Create the output directory and write a fresh
/// `<install_dir>/room_<platform>_<id>/config.json`.
pub async fn prepare(
    install_dir: &Path,
    room: &RoomSpec,
    tool: &ToolSpec,
    output_dir: &Path,
) -> Result<RoomWorkDir, RecorderError> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| RecorderError::work_dir(output_dir, e))?;

    let work_dir = install_dir.join(format!("room_{}", room.key()));
    tokio::fs::create_dir_all(&work_dir)
        .await
        .map_err(|e| RecorderError::work_dir(&work_dir, e))?;

    let config = RecorderConfig {
        global: GlobalSection {
            enable_monitor: true,
            timer: RECORDER_POLL_SECS,
            cookie: String::new(),
            output: output_dir.to_path_buf(),
        },
        rooms: vec![RoomSection {
            url: tool.room_url(&room.room_id),
            auto_record: true,
            cookie: String::new(),
            output: output_dir.to_path_buf(),
        }],
    };

    let config_path = work_dir.join("config.json");
    let content = serde_json::to_string_pretty(&config)
        .map_err(|e| RecorderError::work_dir(&config_path, e.into()))?;
    tokio::fs::write(&config_path, content)
        .await
        .map_err(|e| RecorderError::work_dir(&config_path, e))?;

    Ok(RoomWorkDir {
        work_dir,
        config_path,
        output_dir: output_dir.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_recorder_config() {
        let dir = tempdir().unwrap();
        let install_dir = dir.path().join("tool");
        let output_dir = dir.path().join("out").join("2233");
        let room = RoomSpec::new("bilibili", "2233");
        let tool = ToolSpec::bililive_recorder();

        let prepared = prepare(&install_dir, &room, &tool, &output_dir)
            .await
            .unwrap();

        assert!(output_dir.is_dir());
        assert_eq!(prepared.work_dir, install_dir.join("room_bilibili_2233"));

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&prepared.config_path).unwrap())
                .unwrap();
        assert_eq!(written["Global"]["EnableMonitor"], true);
        assert_eq!(written["Global"]["Timer"], 30);
        assert_eq!(
            written["Rooms"][0]["Url"],
            "https://live.bilibili.com/2233"
        );
        assert_eq!(written["Rooms"][0]["AutoRecord"], true);
        assert_eq!(written["Rooms"][0]["Output"], output_dir.to_str().unwrap());
    }

    #[tokio::test]
    async fn stale_config_is_overwritten() {
        let dir = tempdir().unwrap();
        let install_dir = dir.path().join("tool");
        let stale = install_dir.join("room_bilibili_1").join("config.json");
        std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
        std::fs::write(&stale, "stale").unwrap();

        let room = RoomSpec::new("bilibili", "1");
        let prepared = prepare(
            &install_dir,
            &room,
            &ToolSpec::bililive_recorder(),
            &dir.path().join("out"),
        )
        .await
        .unwrap();

        assert_eq!(prepared.config_path, stale);
        assert!(std::fs::read_to_string(&stale).unwrap().contains("\"Global\""));
    }

    #[tokio::test]
    async fn same_room_id_on_two_platforms_gets_two_work_dirs() {
        let dir = tempdir().unwrap();
        let install_dir = dir.path().join("tool");
        let tool = ToolSpec::bililive_recorder();
        let out = dir.path().join("out");

        let first = prepare(&install_dir, &RoomSpec::new("bilibili", "9"), &tool, &out)
            .await
            .unwrap();
        let second = prepare(&install_dir, &RoomSpec::new("douyu", "9"), &tool, &out)
            .await
            .unwrap();

        assert_ne!(first.config_path, second.config_path);
        assert!(first.config_path.is_file());
        assert!(second.config_path.is_file());
    }

    #[test]
    fn run_args_are_rendered() {
        let prepared = RoomWorkDir {
            work_dir: PathBuf::from("/opt/rec/room_1"),
            config_path: PathBuf::from("/opt/rec/room_1/config.json"),
            output_dir: PathBuf::from("/data/1"),
        };
        let args = prepared.render_args(&[
            "run".to_string(),
            "{work_dir}".to_string(),
            "--config={config_path}".to_string(),
        ]);
        assert_eq!(
            args,
            vec!["run", "/opt/rec/room_1", "--config=/opt/rec/room_1/config.json"]
        );
    }
}
