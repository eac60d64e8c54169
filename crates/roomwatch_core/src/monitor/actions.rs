//! Gate actions that drive the recorder registry.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::PostProcessSettings;
use crate::gate::GateActions;
use crate::models::RoomSpec;
use crate::processor;
use crate::recorder::{ProcessRegistry, RecorderError};

/// Starts and stops recorder processes on gate edges, optionally remuxing
/// a room's recordings after its recorder stops.
pub struct RecordingActions {
    registry: Arc<ProcessRegistry>,
    postprocess: Option<PostProcessSettings>,
}

impl RecordingActions {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self {
            registry,
            postprocess: None,
        }
    }

    /// Enable post-processing when `remux_on_stop` is set.
    pub fn with_postprocess(mut self, settings: &PostProcessSettings) -> Self {
        self.postprocess = settings.remux_on_stop.then(|| settings.clone());
        self
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }
}

#[async_trait]
impl GateActions for RecordingActions {
    async fn on_start(
        &self,
        room: &RoomSpec,
        title: &str,
        anchor_name: &str,
    ) -> Result<(), RecorderError> {
        self.registry.start(room, title, anchor_name).await?;
        Ok(())
    }

    async fn on_stop(&self, room: &RoomSpec) -> Result<bool, RecorderError> {
        let stopped = self.registry.stop(&room.key()).await?;

        if let (true, Some(settings)) = (stopped, &self.postprocess) {
            let settings = settings.clone();
            let dir = self.registry.output_dir(room);
            let key = room.key();
            tokio::spawn(async move {
                let produced = processor::process_recordings(&settings, &dir).await;
                tracing::info!(room = %key, "Post-processed {} recordings", produced);
            });
        }
        Ok(stopped)
    }
}
