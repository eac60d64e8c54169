//! Registry of running recorder processes, at most one per room.
//!
//! Each room has a slot behind its own async mutex. The outer map lock is
//! only held to look up or insert a slot, so starting or stopping one room
//! never waits on another room. Every slot also publishes its phase behind a
//! plain lock, so status queries never wait on an in-flight start or stop.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};

use super::workdir;
use super::RecorderError;
use crate::config::RecorderSettings;
use crate::installer::ToolProvider;
use crate::logging::OutputTail;
use crate::models::{RecordingStatus, RoomKey, RoomSpec};

/// One live recorder process.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingHandle {
    pub room_key: RoomKey,
    pub pid: Option<u32>,
    pub start_time: DateTime<Utc>,
    pub work_directory: PathBuf,
    pub config_path: PathBuf,
}

struct ActiveRecording {
    handle: RecordingHandle,
    child: Child,
    output: OutputTail,
}

#[derive(Default)]
struct RecorderSlot {
    active: Option<ActiveRecording>,
    /// Output of the last process that ended, kept for diagnostics.
    last_output: Option<OutputTail>,
}

impl RecorderSlot {
    fn clear(&mut self) -> Option<RecordingHandle> {
        let active = self.active.take()?;
        self.last_output = Some(active.output);
        Some(active.handle)
    }
}

/// What a slot is doing, readable without taking the slot lock.
#[derive(Debug, Clone, Default)]
enum SlotPhase {
    #[default]
    Idle,
    Starting,
    Recording(RecordingHandle),
    Stopping(RecordingHandle),
}

impl SlotPhase {
    fn of(slot: &RecorderSlot) -> Self {
        match &slot.active {
            Some(active) => SlotPhase::Recording(active.handle.clone()),
            None => SlotPhase::Idle,
        }
    }

    /// A process is tracked, possibly on its way out.
    fn is_active(&self) -> bool {
        matches!(self, SlotPhase::Recording(_) | SlotPhase::Stopping(_))
    }

    fn status(&self) -> RecordingStatus {
        match self {
            SlotPhase::Idle => RecordingStatus::idle(),
            SlotPhase::Starting => RecordingStatus::starting(),
            SlotPhase::Recording(h) => RecordingStatus::recording(h.pid, h.start_time),
            SlotPhase::Stopping(h) => RecordingStatus::stopping(h.pid, h.start_time),
        }
    }
}

#[derive(Default)]
struct SlotCell {
    /// Held across a whole start or stop.
    state: tokio::sync::Mutex<RecorderSlot>,
    phase: parking_lot::Mutex<SlotPhase>,
}

impl SlotCell {
    fn set_phase(&self, phase: SlotPhase) {
        *self.phase.lock() = phase;
    }

    fn phase(&self) -> SlotPhase {
        self.phase.lock().clone()
    }
}

type Slot = Arc<SlotCell>;

/// Outcome of stopping every tracked recording.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StopAllReport {
    pub stopped: Vec<RoomKey>,
    pub failed: Vec<(RoomKey, String)>,
}

impl StopAllReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Starts, stops and reconciles recorder processes.
pub struct ProcessRegistry {
    tools: Arc<dyn ToolProvider>,
    recordings_root: PathBuf,
    stop_grace: Duration,
    kill_grace: Duration,
    tail_lines: usize,
    slots: parking_lot::Mutex<HashMap<RoomKey, Slot>>,
}

impl ProcessRegistry {
    pub fn new(
        tools: Arc<dyn ToolProvider>,
        recordings_root: impl Into<PathBuf>,
        settings: &RecorderSettings,
    ) -> Self {
        Self {
            tools,
            recordings_root: recordings_root.into(),
            stop_grace: Duration::from_secs(settings.stop_grace_secs),
            kill_grace: Duration::from_secs(settings.kill_grace_secs),
            tail_lines: settings.output_tail_lines,
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Override the terminate and kill waits.
    pub fn with_grace(mut self, stop_grace: Duration, kill_grace: Duration) -> Self {
        self.stop_grace = stop_grace;
        self.kill_grace = kill_grace;
        self
    }

    fn slot(&self, key: &RoomKey) -> Slot {
        self.slots.lock().entry(key.clone()).or_default().clone()
    }

    fn existing_slot(&self, key: &RoomKey) -> Option<Slot> {
        self.slots.lock().get(key).cloned()
    }

    fn all_slots(&self) -> Vec<(RoomKey, Slot)> {
        self.slots
            .lock()
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect()
    }

    /// Where a room's recordings are written.
    pub fn output_dir(&self, room: &RoomSpec) -> PathBuf {
        room.resolve_output_dir(&self.recordings_root)
    }

    /// Start recording a room.
    ///
    /// If the room already has a process, its handle is returned unchanged.
    pub async fn start(
        &self,
        room: &RoomSpec,
        title: &str,
        anchor_name: &str,
    ) -> Result<RecordingHandle, RecorderError> {
        let key = room.key();
        let cell = self.slot(&key);
        let mut slot = cell.state.lock().await;

        if let Some(active) = &slot.active {
            tracing::warn!(room = %key, pid = ?active.handle.pid, "Recorder already running");
            return Ok(active.handle.clone());
        }

        cell.set_phase(SlotPhase::Starting);
        let result = self.spawn_recorder(room, title, anchor_name).await;
        match result {
            Ok(active) => {
                let handle = active.handle.clone();
                slot.active = Some(active);
                cell.set_phase(SlotPhase::Recording(handle.clone()));
                Ok(handle)
            }
            Err(e) => {
                cell.set_phase(SlotPhase::Idle);
                Err(e)
            }
        }
    }

    async fn spawn_recorder(
        &self,
        room: &RoomSpec,
        title: &str,
        anchor_name: &str,
    ) -> Result<ActiveRecording, RecorderError> {
        let key = room.key();
        let (tool_name, tool) = self
            .tools
            .tool_for_platform(&room.platform)
            .ok_or_else(|| RecorderError::no_tool(key.to_string(), &room.platform))?;

        let executable = self
            .tools
            .ensure_ready(&tool_name)
            .await
            .map_err(|e| RecorderError::install_failed(key.to_string(), e))?;
        let install_dir = executable
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let output_dir = self.output_dir(room);
        let prepared = workdir::prepare(&install_dir, room, &tool, &output_dir).await?;

        let mut child = Command::new(&executable)
            .args(prepared.render_args(&tool.run_args))
            .current_dir(&install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // A start cancelled before the handle is stored must not leak the child
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RecorderError::SpawnFailed {
                room: key.to_string(),
                source,
            })?;

        let output = OutputTail::new(self.tail_lines);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, output.clone(), key.clone(), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, output.clone(), key.clone(), true));
        }

        let handle = RecordingHandle {
            room_key: key.clone(),
            pid: child.id(),
            start_time: Utc::now(),
            work_directory: prepared.work_dir,
            config_path: prepared.config_path,
        };

        tracing::info!(
            room = %key,
            pid = ?handle.pid,
            title,
            anchor = anchor_name,
            "Recording started for {}",
            room.label()
        );

        Ok(ActiveRecording {
            handle,
            child,
            output,
        })
    }

    /// Stop a room's recorder: SIGTERM, wait, then SIGKILL, wait.
    ///
    /// Returns `false` when no process was tracked for the room.
    pub async fn stop(&self, key: &RoomKey) -> Result<bool, RecorderError> {
        let Some(cell) = self.existing_slot(key) else {
            return Ok(false);
        };
        let mut slot = cell.state.lock().await;
        let Some(active) = slot.active.as_mut() else {
            return Ok(false);
        };

        cell.set_phase(SlotPhase::Stopping(active.handle.clone()));
        let pid = active.handle.pid;
        let exit = match terminate(&mut active.child, key) {
            Ok(()) => {
                match tokio::time::timeout(self.stop_grace, active.child.wait()).await {
                    Ok(Ok(status)) => Some(status),
                    Ok(Err(e)) => {
                        tracing::warn!(room = %key, "Waiting for recorder failed: {}", e);
                        None
                    }
                    Err(_) => {
                        tracing::warn!(
                            room = %key,
                            pid = ?pid,
                            "Recorder ignored terminate for {:?}, killing",
                            self.stop_grace
                        );
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!("{}, killing", e);
                None
            }
        };

        let exit = match exit {
            Some(status) => status,
            None => {
                if let Err(e) = active.child.start_kill() {
                    tracing::debug!(room = %key, "Kill failed: {}", e);
                }
                match tokio::time::timeout(self.kill_grace, active.child.wait()).await {
                    Ok(Ok(status)) => status,
                    _ => {
                        tracing::error!(
                            room = %key,
                            pid = ?pid,
                            "Recorder survived kill, process may be orphaned"
                        );
                        cell.set_phase(SlotPhase::Recording(active.handle.clone()));
                        return Err(RecorderError::StopTimeout {
                            room: key.to_string(),
                            pid,
                        });
                    }
                }
            }
        };

        slot.clear();
        cell.set_phase(SlotPhase::Idle);
        tracing::info!(room = %key, pid = ?pid, "Recording stopped ({})", exit);
        Ok(true)
    }

    /// Recording status of a room.
    ///
    /// Never waits: while a start or stop holds the room, its published
    /// phase is reported instead. Otherwise a process that exited on its own
    /// is removed here and reported with its exit code.
    pub async fn status(&self, key: &RoomKey) -> RecordingStatus {
        let Some(cell) = self.existing_slot(key) else {
            return RecordingStatus::idle();
        };
        let Ok(mut slot) = cell.state.try_lock() else {
            return cell.phase().status();
        };
        // Nothing is in flight, so the slot itself is authoritative
        cell.set_phase(SlotPhase::of(&slot));
        let Some(active) = slot.active.as_mut() else {
            return RecordingStatus::idle();
        };

        match active.child.try_wait() {
            Ok(None) => RecordingStatus::recording(active.handle.pid, active.handle.start_time),
            Ok(Some(exit)) => {
                tracing::warn!(
                    room = %key,
                    pid = ?active.handle.pid,
                    "Recorder exited on its own ({})",
                    exit
                );
                slot.clear();
                cell.set_phase(SlotPhase::Idle);
                RecordingStatus::exited(exit.code())
            }
            Err(e) => {
                tracing::warn!(room = %key, "Failed to poll recorder: {}", e);
                RecordingStatus::recording(active.handle.pid, active.handle.start_time)
            }
        }
    }

    /// Handle of a room's process, if one is tracked.
    pub async fn handle(&self, key: &RoomKey) -> Option<RecordingHandle> {
        let cell = self.existing_slot(key)?;
        let slot = cell.state.lock().await;
        slot.active.as_ref().map(|a| a.handle.clone())
    }

    /// Stop every tracked process concurrently.
    pub async fn stop_all(&self) -> StopAllReport {
        let keys: Vec<RoomKey> = self.all_slots().into_iter().map(|(key, _)| key).collect();

        let results = futures_util::future::join_all(keys.iter().map(|key| self.stop(key))).await;

        let mut report = StopAllReport::default();
        for (key, result) in keys.into_iter().zip(results) {
            match result {
                Ok(true) => report.stopped.push(key),
                Ok(false) => {}
                Err(e) => report.failed.push((key, e.to_string())),
            }
        }
        report
    }

    /// Number of rooms with a tracked process. Never waits on a room.
    pub async fn active_count(&self) -> usize {
        self.all_slots()
            .iter()
            .filter(|(_, cell)| cell.phase.lock().is_active())
            .count()
    }

    /// Rooms with a tracked process, in key order. Never waits on a room.
    pub async fn active_rooms(&self) -> Vec<RoomKey> {
        let mut rooms: Vec<RoomKey> = self
            .all_slots()
            .into_iter()
            .filter(|(_, cell)| cell.phase.lock().is_active())
            .map(|(key, _)| key)
            .collect();
        rooms.sort();
        rooms
    }

    /// Recent stdout/stderr lines of the room's current or last process.
    pub async fn recent_output(&self, key: &RoomKey) -> Vec<String> {
        let Some(cell) = self.existing_slot(key) else {
            return Vec::new();
        };
        let slot = cell.state.lock().await;
        match (&slot.active, &slot.last_output) {
            (Some(active), _) => active.output.lines(),
            (None, Some(tail)) => tail.lines(),
            (None, None) => Vec::new(),
        }
    }
}

/// Ask the process to exit.
#[cfg(unix)]
fn terminate(child: &mut Child, key: &RoomKey) -> Result<(), RecorderError> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No pid means the process was already reaped
    let Some(pid) = child.id() else {
        return Ok(());
    };
    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| RecorderError::signal(key.to_string(), e))
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, key: &RoomKey) -> Result<(), RecorderError> {
    child
        .start_kill()
        .map_err(|e| RecorderError::signal(key.to_string(), e))
}

async fn forward_lines<R>(reader: R, tail: OutputTail, key: RoomKey, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(room = %key, stderr = is_stderr, "{}", line);
                tail.push(&line, is_stderr);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(room = %key, "Recorder output closed: {}", e);
                break;
            }
        }
    }
}
