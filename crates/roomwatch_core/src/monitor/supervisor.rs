//! Owner of the room watchers.
//!
//! Start spawns one watcher task per distinct room, with first polls
//! staggered. Stop is bounded at every step: watchers are cancelled and
//! joined with a timeout (aborted past it), then live recordings are
//! stopped within a shutdown budget. The returned [`ShutdownReport`] says
//! whether everything was confirmed stopped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;

use super::{CancelFlag, MonitorError, RecordingActions, RoomWatcher};
use crate::config::{MonitorSettings, Settings};
use crate::gate::StatusGate;
use crate::installer::Installer;
use crate::models::{RecordingStatus, RoomKey, RoomSpec, ToolInstallation};
use crate::recorder::{ProcessRegistry, RecordingHandle};
use crate::status::StatusClients;

struct WatcherTask {
    key: RoomKey,
    cancel: CancelFlag,
    handle: JoinHandle<()>,
}

/// Monitor overview for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub is_running: bool,
    pub watcher_count: usize,
    pub interval_secs: u64,
    pub rooms_count: usize,
}

/// Everything known about one configured room.
#[derive(Debug, Clone, Serialize)]
pub struct RoomReport {
    pub key: String,
    pub room: RoomSpec,
    /// `None` until the room's first successful poll.
    pub last_known_live: Option<bool>,
    pub last_transition: Option<DateTime<Utc>>,
    pub recording: RecordingStatus,
}

/// Outcome of a supervisor stop.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub watchers_stopped: usize,
    pub watchers_aborted: usize,
    pub recordings_stopped: Vec<RoomKey>,
    pub failed: Vec<(RoomKey, String)>,
    pub budget_exhausted: bool,
    /// Rooms still holding a recorder process after shutdown.
    pub still_recording: Vec<RoomKey>,
    pub complete: bool,
    pub elapsed_ms: u64,
}

/// Starts, stops and reports on the room watchers.
pub struct Supervisor {
    rooms: Vec<RoomSpec>,
    settings: MonitorSettings,
    clients: StatusClients,
    gate: Arc<StatusGate>,
    registry: Arc<ProcessRegistry>,
    installer: Option<Arc<Installer>>,
    watchers: tokio::sync::Mutex<Vec<WatcherTask>>,
    running: AtomicBool,
}

impl Supervisor {
    pub fn new(
        rooms: Vec<RoomSpec>,
        settings: MonitorSettings,
        clients: StatusClients,
        gate: Arc<StatusGate>,
        registry: Arc<ProcessRegistry>,
    ) -> Self {
        Self {
            rooms,
            settings,
            clients,
            gate,
            registry,
            installer: None,
            watchers: tokio::sync::Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Attach the installer so its state shows up in reports.
    pub fn with_installer(mut self, installer: Arc<Installer>) -> Self {
        self.installer = Some(installer);
        self
    }

    /// Wire the full stack from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, MonitorError> {
        let installer = Arc::new(Installer::from_settings(settings)?);
        let registry = Arc::new(ProcessRegistry::new(
            installer.clone(),
            &settings.paths.recordings_root,
            &settings.recorder,
        ));
        let actions =
            RecordingActions::new(registry.clone()).with_postprocess(&settings.postprocess);
        let gate = Arc::new(StatusGate::new(Arc::new(actions)));

        Ok(Self::new(
            settings.rooms.clone(),
            settings.monitor.clone(),
            StatusClients::with_defaults()?,
            gate,
            registry,
        )
        .with_installer(installer))
    }

    /// Spawn one watcher per distinct room. Returns the number spawned,
    /// zero if already running.
    pub async fn start(&self) -> usize {
        let mut watchers = self.watchers.lock().await;
        if !watchers.is_empty() {
            tracing::warn!("Monitor already running");
            return 0;
        }

        let mut seen = HashSet::new();
        for room in &self.rooms {
            let key = room.key();
            if !seen.insert(key.clone()) {
                tracing::warn!(room = %key, "Room configured twice, skipping duplicate");
                continue;
            }

            let cancel = CancelFlag::new();
            let delay = self.settings.stagger_delay() * watchers.len() as u32;
            let watcher = RoomWatcher::new(
                room.clone(),
                self.clients.get(&room.platform),
                self.gate.clone(),
                &self.settings,
                cancel.clone(),
            )
            .with_initial_delay(delay);

            watchers.push(WatcherTask {
                key,
                cancel,
                handle: tokio::spawn(watcher.run()),
            });
        }

        self.running.store(true, Ordering::SeqCst);
        tracing::info!(
            "Monitoring {} rooms every {}s",
            watchers.len(),
            self.settings.interval_secs
        );
        watchers.len()
    }

    /// Cancel all watchers and stop every recording, within bounded waits.
    pub async fn stop(&self) -> ShutdownReport {
        let started = Instant::now();
        let tasks = std::mem::take(&mut *self.watchers.lock().await);
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("Stopping {} watchers", tasks.len());

        for task in &tasks {
            task.cancel.cancel();
        }

        let mut report = ShutdownReport::default();
        let joins = tasks.into_iter().map(|task| self.join_watcher(task));
        for joined in futures_util::future::join_all(joins).await {
            if joined {
                report.watchers_stopped += 1;
            } else {
                report.watchers_aborted += 1;
            }
        }

        let budget = self.settings.shutdown_budget();
        let stops = async {
            let gate = self.gate.stop_all().await;
            // Catches manual recordings the gate never saw
            let registry = self.registry.stop_all().await;
            (gate, registry)
        };
        match tokio::time::timeout(budget, stops).await {
            Ok((gate, registry)) => {
                for part in [gate, registry] {
                    report.recordings_stopped.extend(part.stopped);
                    report.failed.extend(part.failed);
                }
            }
            Err(_) => {
                tracing::error!("Recordings not stopped within {:?}", budget);
                report.budget_exhausted = true;
            }
        }

        report.still_recording = self.registry.active_rooms().await;

        report.complete = !report.budget_exhausted
            && report.failed.is_empty()
            && report.still_recording.is_empty();
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        if report.complete {
            tracing::info!(
                "Monitor stopped in {}ms, {} recordings stopped",
                report.elapsed_ms,
                report.recordings_stopped.len()
            );
        } else {
            tracing::warn!(
                failed = report.failed.len(),
                still_recording = report.still_recording.len(),
                "Monitor stopped partially after {}ms",
                report.elapsed_ms
            );
        }
        report
    }

    /// Join a cancelled watcher, aborting it past the join timeout.
    ///
    /// Returns `false` if it had to be aborted.
    async fn join_watcher(&self, mut task: WatcherTask) -> bool {
        let wait = self.settings.join_timeout();
        match tokio::time::timeout(wait, &mut task.handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(room = %task.key, "Watcher ended abnormally: {}", e);
                true
            }
            Err(_) => {
                tracing::warn!(room = %task.key, "Watcher did not stop within {:?}, aborting", wait);
                task.handle.abort();
                // Wait for the abort to land so no task outlives the stop
                let _ = task.handle.await;
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> MonitorStatus {
        MonitorStatus {
            is_running: self.is_running(),
            watcher_count: self.watchers.lock().await.len(),
            interval_secs: self.settings.interval_secs,
            rooms_count: self.rooms.len(),
        }
    }

    pub fn rooms(&self) -> &[RoomSpec] {
        &self.rooms
    }

    /// First configured room with this id, on any platform.
    pub fn find_room(&self, room_id: &str) -> Option<&RoomSpec> {
        self.rooms.iter().find(|r| r.room_id == room_id)
    }

    pub fn find_room_on(&self, platform: &str, room_id: &str) -> Option<&RoomSpec> {
        self.rooms
            .iter()
            .find(|r| r.platform == platform && r.room_id == room_id)
    }

    async fn report(&self, room: &RoomSpec) -> RoomReport {
        let key = room.key();
        RoomReport {
            key: key.to_string(),
            room: room.clone(),
            last_known_live: self.gate.last_known_live(&key),
            last_transition: self.gate.last_transition(&key),
            recording: self.registry.status(&key).await,
        }
    }

    pub async fn room_reports(&self) -> Vec<RoomReport> {
        let mut reports = Vec::with_capacity(self.rooms.len());
        for room in &self.rooms {
            reports.push(self.report(room).await);
        }
        reports
    }

    pub async fn room_report(&self, room_id: &str) -> Option<RoomReport> {
        let room = self.find_room(room_id)?;
        Some(self.report(room).await)
    }

    pub async fn active_recordings(&self) -> usize {
        self.registry.active_count().await
    }

    pub fn installations(&self) -> Vec<ToolInstallation> {
        self.installer
            .as_ref()
            .map(|installer| installer.installations())
            .unwrap_or_default()
    }

    /// Start a recording outside the polling loop.
    pub async fn start_recording(
        &self,
        platform: &str,
        room_id: &str,
    ) -> Result<RecordingHandle, MonitorError> {
        let room = self
            .find_room_on(platform, room_id)
            .ok_or_else(|| MonitorError::RoomNotFound(format!("{}_{}", platform, room_id)))?;
        tracing::info!(room = %room.key(), "Manual recording start");
        Ok(self.registry.start(room, "", "").await?)
    }

    /// Stop a recording outside the polling loop.
    pub async fn stop_recording(&self, platform: &str, room_id: &str) -> Result<(), MonitorError> {
        let room = self
            .find_room_on(platform, room_id)
            .ok_or_else(|| MonitorError::RoomNotFound(format!("{}_{}", platform, room_id)))?;
        tracing::info!(room = %room.key(), "Manual recording stop");
        if self.registry.stop(&room.key()).await? {
            Ok(())
        } else {
            Err(MonitorError::NotRecording(room.key().to_string()))
        }
    }
}
