//! Replay of queued mutations once connectivity returns.

mod coordinator;
mod sync;

pub use coordinator::{DrainReport, ReplayCoordinator};
pub use sync::{FallbackTimer, SyncManager, REPLAY_TAG};
