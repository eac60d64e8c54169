//! Polling loop for a single room.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::CancelFlag;
use crate::config::MonitorSettings;
use crate::gate::StatusGate;
use crate::models::{LiveObservation, RoomSpec};
use crate::status::{StatusClient, StatusError};

/// Granularity of cancellation checks while sleeping.
const SLEEP_TICK: Duration = Duration::from_secs(1);

/// Polls one room's status and feeds it to the gate until cancelled.
pub struct RoomWatcher {
    room: RoomSpec,
    client: Option<Arc<dyn StatusClient>>,
    gate: Arc<StatusGate>,
    interval: Duration,
    request_timeout: Duration,
    initial_delay: Duration,
    cancel: CancelFlag,
}

impl RoomWatcher {
    /// `client` is `None` when no status client exists for the room's
    /// platform; such a watcher never produces a transition.
    pub fn new(
        room: RoomSpec,
        client: Option<Arc<dyn StatusClient>>,
        gate: Arc<StatusGate>,
        settings: &MonitorSettings,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            room,
            client,
            gate,
            interval: settings.interval(),
            request_timeout: settings.request_timeout(),
            initial_delay: Duration::ZERO,
            cancel,
        }
    }

    /// Delay before the first poll.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Override the poll interval and request timeout.
    pub fn with_timing(mut self, interval: Duration, request_timeout: Duration) -> Self {
        self.interval = interval;
        self.request_timeout = request_timeout;
        self
    }

    /// Run until the cancel flag is set.
    pub async fn run(self) {
        let key = self.room.key();
        tracing::info!(room = %key, "Watching {}", self.room.label());

        if self.client.is_none() {
            tracing::warn!(
                room = %key,
                "{}, room will never be recorded",
                StatusError::UnsupportedPlatform(self.room.platform.clone())
            );
        }

        if self.sleep_unless_cancelled(self.initial_delay).await {
            while !self.cancel.is_cancelled() {
                if let Some(obs) = self.poll_once().await {
                    self.gate.observe(&self.room, &obs).await;
                }
                if !self.sleep_unless_cancelled(self.interval).await {
                    break;
                }
            }
        }

        tracing::info!(room = %key, "Stopped watching {}", self.room.label());
    }

    /// One bounded status request. `None` means no new information.
    pub async fn poll_once(&self) -> Option<LiveObservation> {
        let client = self.client.as_ref()?;

        let result = tokio::time::timeout(
            self.request_timeout,
            client.live_status(&self.room.room_id),
        )
        .await
        .unwrap_or_else(|_| Err(StatusError::Timeout(self.request_timeout)));

        match result {
            Ok(obs) => {
                tracing::debug!(room = %self.room.key(), live = obs.is_live, "Status polled");
                Some(obs)
            }
            Err(e) => {
                tracing::warn!(room = %self.room.key(), "Status check failed: {}", e);
                None
            }
        }
    }

    /// Sleep for `total`, waking every tick to check the cancel flag.
    ///
    /// Returns `false` if cancelled before the time elapsed.
    async fn sleep_unless_cancelled(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            tokio::time::sleep((deadline - now).min(SLEEP_TICK)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateActions;
    use crate::recorder::RecorderError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Replays scripted results, then reports offline.
    #[derive(Default)]
    struct ScriptedClient {
        script: Mutex<VecDeque<Result<LiveObservation, StatusError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn with(script: Vec<Result<LiveObservation, StatusError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl StatusClient for ScriptedClient {
        async fn live_status(&self, _room_id: &str) -> Result<LiveObservation, StatusError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(LiveObservation::offline()))
        }
    }

    struct HangingClient;

    #[async_trait]
    impl StatusClient for HangingClient {
        async fn live_status(&self, _room_id: &str) -> Result<LiveObservation, StatusError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(LiveObservation::live("never", "never"))
        }
    }

    #[derive(Default)]
    struct Edges {
        starts: AtomicUsize,
        stops: AtomicUsize,
    }

    #[async_trait]
    impl GateActions for Edges {
        async fn on_start(&self, _: &RoomSpec, _: &str, _: &str) -> Result<(), RecorderError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_stop(&self, _: &RoomSpec) -> Result<bool, RecorderError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }
    }

    fn watcher(
        client: Option<Arc<dyn StatusClient>>,
        edges: Arc<Edges>,
    ) -> (RoomWatcher, CancelFlag) {
        let cancel = CancelFlag::new();
        let gate = Arc::new(StatusGate::new(edges));
        let watcher = RoomWatcher::new(
            RoomSpec::new("bilibili", "1"),
            client,
            gate,
            &MonitorSettings::default(),
            cancel.clone(),
        )
        .with_timing(Duration::from_millis(20), Duration::from_millis(100));
        (watcher, cancel)
    }

    fn api_error() -> StatusError {
        StatusError::Api {
            code: -412,
            message: "request blocked".to_string(),
        }
    }

    #[tokio::test]
    async fn failed_poll_is_no_information() {
        let client = Arc::new(ScriptedClient::with(vec![Err(api_error())]));
        let (watcher, _cancel) = watcher(Some(client), Arc::default());

        assert!(watcher.poll_once().await.is_none());
        assert!(watcher.poll_once().await.is_some());
    }

    #[tokio::test]
    async fn hanging_client_is_bounded_by_timeout() {
        let (watcher, _cancel) = watcher(Some(Arc::new(HangingClient)), Arc::default());

        let started = Instant::now();
        assert!(watcher.poll_once().await.is_none());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn unknown_platform_never_observes() {
        let (watcher, _cancel) = watcher(None, Arc::default());
        assert!(watcher.poll_once().await.is_none());
    }

    #[tokio::test]
    async fn errors_between_live_polls_do_not_cause_edges() {
        let client = Arc::new(ScriptedClient::with(vec![
            Ok(LiveObservation::live("t", "a")),
            Err(api_error()),
            Ok(LiveObservation::live("t", "a")),
            Err(api_error()),
            Ok(LiveObservation::offline()),
        ]));
        let edges = Arc::new(Edges::default());
        let (watcher, cancel) = watcher(Some(client.clone()), edges.clone());

        let task = tokio::spawn(watcher.run());
        while client.calls.load(Ordering::SeqCst) < 6 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(edges.starts.load(Ordering::SeqCst), 1);
        assert_eq!(edges.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_interrupts_long_interval() {
        let client = Arc::new(ScriptedClient::default());
        let (watcher, cancel) = watcher(Some(client.clone()), Arc::default());
        let watcher = watcher.with_timing(Duration::from_secs(300), Duration::from_secs(1));

        let task = tokio::spawn(watcher.run());
        while client.calls.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cancel.cancel();

        let joined = tokio::time::timeout(Duration::from_secs(3), task).await;
        assert!(joined.is_ok());
    }

    #[tokio::test]
    async fn cancel_during_initial_delay_skips_polling() {
        let client = Arc::new(ScriptedClient::default());
        let (watcher, cancel) = watcher(Some(client.clone()), Arc::default());
        let watcher = watcher.with_initial_delay(Duration::from_secs(60));

        let task = tokio::spawn(watcher.run());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(3), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }
}
