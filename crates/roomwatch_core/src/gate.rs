//! Per-room transition gate.
//!
//! Turns a stream of possibly repeated live/offline observations into
//! exactly one start per rising edge and one stop per falling edge. Each
//! room's state sits behind its own async mutex, held across the start or
//! stop action, so actions for one room never overlap while different
//! rooms proceed independently.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{LiveObservation, RoomKey, RoomSpec};
use crate::recorder::{RecorderError, StopAllReport};

/// What the gate does on an edge.
#[async_trait]
pub trait GateActions: Send + Sync {
    async fn on_start(
        &self,
        room: &RoomSpec,
        title: &str,
        anchor_name: &str,
    ) -> Result<(), RecorderError>;

    /// Returns `false` when the room had no process left to stop.
    async fn on_stop(&self, room: &RoomSpec) -> Result<bool, RecorderError>;
}

/// Action taken for one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateAction {
    None,
    Started,
    StartFailed,
    Stopped,
    StopFailed,
}

/// Per-room state. `action` is held across a start or stop; the live flag
/// is only written while it is held.
struct RoomState {
    room: RoomSpec,
    action: tokio::sync::Mutex<()>,
    last_known_live: AtomicBool,
    last_transition: parking_lot::Mutex<Option<DateTime<Utc>>>,
}

impl RoomState {
    fn new(room: &RoomSpec) -> Self {
        Self {
            room: room.clone(),
            action: tokio::sync::Mutex::new(()),
            last_known_live: AtomicBool::new(false),
            last_transition: parking_lot::Mutex::new(None),
        }
    }

    fn set_live(&self, live: bool) {
        self.last_known_live.store(live, Ordering::SeqCst);
        *self.last_transition.lock() = Some(Utc::now());
    }
}

/// Exactly-once edge detection per room.
pub struct StatusGate {
    actions: Arc<dyn GateActions>,
    rooms: parking_lot::Mutex<HashMap<RoomKey, Arc<RoomState>>>,
}

impl StatusGate {
    pub fn new(actions: Arc<dyn GateActions>) -> Self {
        Self {
            actions,
            rooms: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn state(&self, room: &RoomSpec) -> Arc<RoomState> {
        self.rooms
            .lock()
            .entry(room.key())
            .or_insert_with(|| Arc::new(RoomState::new(room)))
            .clone()
    }

    fn existing(&self, key: &RoomKey) -> Option<Arc<RoomState>> {
        self.rooms.lock().get(key).cloned()
    }

    /// Feed one observation for a room.
    pub async fn observe(&self, room: &RoomSpec, obs: &LiveObservation) -> GateAction {
        let state = self.state(room);
        let _action = state.action.lock().await;

        if obs.is_live == state.last_known_live.load(Ordering::SeqCst) {
            tracing::trace!(room = %room.key(), live = obs.is_live, "No transition");
            return GateAction::None;
        }

        state.set_live(obs.is_live);

        if obs.is_live {
            tracing::info!(
                room = %room.key(),
                title = %obs.title,
                anchor = %obs.anchor_name,
                "{} went live",
                room.label()
            );
            match self
                .actions
                .on_start(room, &obs.title, &obs.anchor_name)
                .await
            {
                Ok(()) => GateAction::Started,
                Err(e) => {
                    tracing::error!(room = %room.key(), "Failed to start recording: {}", e);
                    // Next live observation is a rising edge again
                    state.last_known_live.store(false, Ordering::SeqCst);
                    GateAction::StartFailed
                }
            }
        } else {
            tracing::info!(room = %room.key(), "{} went offline", room.label());
            match self.actions.on_stop(room).await {
                Ok(_) => GateAction::Stopped,
                Err(e) => {
                    tracing::error!(room = %room.key(), "Failed to stop recording: {}", e);
                    GateAction::StopFailed
                }
            }
        }
    }

    /// Stop every room last seen live, then drop all state.
    pub async fn stop_all(&self) -> StopAllReport {
        let states: Vec<Arc<RoomState>> = self.rooms.lock().values().cloned().collect();

        let stops = states.into_iter().map(|state| async move {
            let _action = state.action.lock().await;
            if !state.last_known_live.load(Ordering::SeqCst) {
                return None;
            }
            state.set_live(false);
            let key = state.room.key();
            let result = self.actions.on_stop(&state.room).await;
            if let Err(e) = &result {
                tracing::error!(room = %key, "Failed to stop recording: {}", e);
            }
            Some((key, result))
        });

        let mut report = StopAllReport::default();
        for (key, result) in futures_util::future::join_all(stops).await.into_iter().flatten() {
            match result {
                Ok(true) => report.stopped.push(key),
                Ok(false) => tracing::debug!(room = %key, "No recorder left to stop"),
                Err(e) => report.failed.push((key, e.to_string())),
            }
        }

        self.rooms.lock().clear();
        report
    }

    /// Drop one room's state.
    pub fn forget(&self, key: &RoomKey) {
        self.rooms.lock().remove(key);
    }

    /// Last known live state of a room, `None` before its first observation.
    pub fn last_known_live(&self, key: &RoomKey) -> Option<bool> {
        self.existing(key)
            .map(|state| state.last_known_live.load(Ordering::SeqCst))
    }

    /// Time of the room's last edge.
    pub fn last_transition(&self, key: &RoomKey) -> Option<DateTime<Utc>> {
        self.existing(key)
            .and_then(|state| *state.last_transition.lock())
    }

    /// Number of rooms with state.
    pub fn tracked_rooms(&self) -> usize {
        self.rooms.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct CountingActions {
        starts: AtomicUsize,
        stops: AtomicUsize,
        in_flight: AtomicUsize,
        overlapped: AtomicBool,
        fail_start: AtomicBool,
        /// Report stops as finding no process.
        gone: AtomicBool,
    }

    impl CountingActions {
        async fn enter(&self) {
            if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl GateActions for CountingActions {
        async fn on_start(
            &self,
            room: &RoomSpec,
            _title: &str,
            _anchor_name: &str,
        ) -> Result<(), RecorderError> {
            self.enter().await;
            if self.fail_start.load(Ordering::SeqCst) {
                return Err(RecorderError::no_tool(room.key().to_string(), &room.platform));
            }
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_stop(&self, _room: &RoomSpec) -> Result<bool, RecorderError> {
            self.enter().await;
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(!self.gone.load(Ordering::SeqCst))
        }
    }

    fn live() -> LiveObservation {
        LiveObservation::live("title", "anchor")
    }

    fn offline() -> LiveObservation {
        LiveObservation::offline()
    }

    #[tokio::test]
    async fn repeated_observations_fire_once_per_edge() {
        let actions = Arc::new(CountingActions::default());
        let gate = StatusGate::new(actions.clone());
        let room = RoomSpec::new("bilibili", "1");

        let sequence = [offline(), offline(), live(), live(), live(), offline()];
        let mut taken = Vec::new();
        for obs in &sequence {
            taken.push(gate.observe(&room, obs).await);
        }

        assert_eq!(actions.starts.load(Ordering::SeqCst), 1);
        assert_eq!(actions.stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            taken,
            vec![
                GateAction::None,
                GateAction::None,
                GateAction::Started,
                GateAction::None,
                GateAction::None,
                GateAction::Stopped,
            ]
        );
        assert_eq!(gate.last_known_live(&room.key()), Some(false));
    }

    #[tokio::test]
    async fn first_live_observation_starts() {
        let actions = Arc::new(CountingActions::default());
        let gate = StatusGate::new(actions.clone());
        let room = RoomSpec::new("bilibili", "1");

        assert_eq!(gate.last_known_live(&room.key()), None);
        assert_eq!(gate.observe(&room, &live()).await, GateAction::Started);
        assert_eq!(gate.last_known_live(&room.key()), Some(true));
        assert!(gate.last_transition(&room.key()).is_some());
    }

    #[tokio::test]
    async fn failed_start_retries_on_next_live() {
        let actions = Arc::new(CountingActions::default());
        actions.fail_start.store(true, Ordering::SeqCst);
        let gate = StatusGate::new(actions.clone());
        let room = RoomSpec::new("bilibili", "1");

        assert_eq!(gate.observe(&room, &live()).await, GateAction::StartFailed);
        assert_eq!(gate.last_known_live(&room.key()), Some(false));

        actions.fail_start.store(false, Ordering::SeqCst);
        assert_eq!(gate.observe(&room, &live()).await, GateAction::Started);
        assert_eq!(actions.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_flaps_never_overlap_for_one_room() {
        let actions = Arc::new(CountingActions::default());
        let gate = Arc::new(StatusGate::new(actions.clone()));
        let room = RoomSpec::new("bilibili", "1");

        let mut tasks = Vec::new();
        for i in 0..20 {
            let gate = gate.clone();
            let room = room.clone();
            tasks.push(tokio::spawn(async move {
                let obs = if i % 2 == 0 { live() } else { offline() };
                gate.observe(&room, &obs).await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(!actions.overlapped.load(Ordering::SeqCst));
        let starts = actions.starts.load(Ordering::SeqCst);
        let stops = actions.stops.load(Ordering::SeqCst);
        // Edges alternate, so starts lead stops by at most one
        assert!(starts == stops || starts == stops + 1);
    }

    #[tokio::test]
    async fn stop_all_stops_live_rooms_and_clears_state() {
        let actions = Arc::new(CountingActions::default());
        let gate = StatusGate::new(actions.clone());
        let rooms: Vec<RoomSpec> = (1..=3)
            .map(|i| RoomSpec::new("bilibili", i.to_string()))
            .collect();

        gate.observe(&rooms[0], &live()).await;
        gate.observe(&rooms[1], &live()).await;
        gate.observe(&rooms[2], &offline()).await;

        let report = gate.stop_all().await;

        assert!(report.is_complete());
        assert_eq!(report.stopped.len(), 2);
        assert_eq!(actions.stops.load(Ordering::SeqCst), 2);
        assert_eq!(gate.tracked_rooms(), 0);

        // Safe to call again with nothing tracked
        assert!(gate.stop_all().await.stopped.is_empty());
        assert_eq!(actions.stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stop_all_leaves_out_rooms_without_a_process() {
        let actions = Arc::new(CountingActions::default());
        let gate = StatusGate::new(actions.clone());
        let room = RoomSpec::new("bilibili", "1");

        gate.observe(&room, &live()).await;
        // The recorder already exited and was reconciled away
        actions.gone.store(true, Ordering::SeqCst);

        let report = gate.stop_all().await;

        assert!(report.is_complete());
        assert!(report.stopped.is_empty());
        assert_eq!(actions.stops.load(Ordering::SeqCst), 1);
        assert_eq!(gate.tracked_rooms(), 0);
    }

    #[tokio::test]
    async fn forget_resets_room_to_offline() {
        let actions = Arc::new(CountingActions::default());
        let gate = StatusGate::new(actions.clone());
        let room = RoomSpec::new("bilibili", "1");

        gate.observe(&room, &live()).await;
        gate.forget(&room.key());
        assert_eq!(gate.last_known_live(&room.key()), None);

        assert_eq!(gate.observe(&room, &live()).await, GateAction::Started);
        assert_eq!(actions.starts.load(Ordering::SeqCst), 2);
    }
}
