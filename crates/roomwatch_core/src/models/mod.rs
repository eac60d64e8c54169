//! Core data types shared across the monitor, gate and recorder.

mod room;
mod status;
mod tool;

pub use room::{LiveObservation, RoomKey, RoomSpec, DEFAULT_PLATFORM};
pub use status::{RecordingStatus, ToolInstallation};
pub use tool::{ToolSpec, UpdatePolicy, BILILIVE_RECORDER};
