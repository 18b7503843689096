//! Periodic per-coin telemetry snapshots of the fleet.

mod engine;
mod sampler;
mod store;

pub use engine::{EnginePhase, LatestSnapshots, SnapshotEngine, SnapshotError, SnapshotSettings};
pub use sampler::{CoinRole, ShareDelta, ShareSampler};
pub use store::SnapshotStore;
