//! Fleet-side core of a mining-rig management server: live session tracking,
//! an in-process command/event bus, and periodic per-coin telemetry snapshots.

pub mod bus;
pub mod clients;
pub mod config;
mod context;
pub mod db;
pub mod profile;
pub mod session;
pub mod snapshot;
pub mod utils;

pub use bus::{HandlerId, Message, MessageBus, PublishReport};
pub use clients::{ClientCount, ClientRecord, ClientSet, ClientStateSet};
pub use config::FleetConfig;
pub use context::FleetContext;
pub use db::{CoinSnapshot, Database};
pub use session::{ConnectionHub, ConnectionId, MinerSession, SessionRegistry};
pub use snapshot::{LatestSnapshots, SnapshotEngine, SnapshotError};
