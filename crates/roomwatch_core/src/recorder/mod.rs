//! External recorder process management.
//!
//! The registry owns zero or one recorder process per room:
//! - `start` installs the tool if needed, writes the per-room config and
//!   spawns the process
//! - `stop` sends SIGTERM, waits, then escalates to SIGKILL
//! - `status` reconciles processes that exited on their own

mod error;
mod registry;
mod workdir;

#[cfg(all(test, unix))]
pub(crate) mod testing;

pub use error::RecorderError;
pub use registry::{ProcessRegistry, RecordingHandle, StopAllReport};
pub use workdir::RoomWorkDir;
