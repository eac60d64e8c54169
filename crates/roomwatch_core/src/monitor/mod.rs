//! Room monitoring: one polling task per room plus the supervisor that
//! starts, stops and reports on them.

mod actions;
mod supervisor;
mod watcher;

pub use actions::RecordingActions;
pub use supervisor::{MonitorStatus, RoomReport, ShutdownReport, Supervisor};
pub use watcher::RoomWatcher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::installer::InstallError;
use crate::recorder::RecorderError;
use crate::status::StatusError;

/// Errors from supervisor commands.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Room not found: {0}")]
    RoomNotFound(String),

    #[error("Room {0} is not recording")]
    NotRecording(String),

    #[error(transparent)]
    Recorder(#[from] RecorderError),

    #[error(transparent)]
    Install(#[from] InstallError),

    #[error(transparent)]
    Status(#[from] StatusError),
}

/// Cooperative stop flag shared between the supervisor and one watcher.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
