//! Commands and events exchanged over the [`MessageBus`](super::MessageBus).

use std::any::Any;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    profile::{MinerProfileField, ProfileValue},
    session::{ClientId, ConnectionId},
};

/// A logical message type. Routing is by Rust type; `NAME` only labels logs.
pub trait Message: Any + Send + Sync {
    const NAME: &'static str;
}

/// Identity of a logical handler.
///
/// Registering twice under the same id for the same message type replaces the
/// earlier registration, which keeps repeated construction of a component from
/// stacking duplicate subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerId {
    CaptureCoinSnapshots,
    EvictExpiredSnapshots,
    SweepStaleSessions,
    LogFleetActivity,
    SetProfileProperty,
    /// Handlers added by the application embedding the fleet core.
    Extension(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortTick {
    pub timestamp: DateTime<Utc>,
}

impl Message for ShortTick {
    const NAME: &'static str = "short-tick";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LongTick {
    pub timestamp: DateTime<Utc>,
}

impl Message for LongTick {
    const NAME: &'static str = "long-tick";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConnected {
    pub client_id: ClientId,
    pub connection_id: ConnectionId,
    /// Connections of the same client that the transport should now close.
    pub superseded: Vec<ConnectionId>,
}

impl Message for ClientConnected {
    const NAME: &'static str = "client-connected";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientActivated {
    pub client_id: ClientId,
    pub connection_id: ConnectionId,
    pub displaced: Option<ConnectionId>,
}

impl Message for ClientActivated {
    const NAME: &'static str = "client-activated";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientDisconnected {
    pub client_id: ClientId,
    pub connection_id: ConnectionId,
    pub was_active: bool,
}

impl Message for ClientDisconnected {
    const NAME: &'static str = "client-disconnected";
}

#[derive(Debug, Clone, PartialEq)]
pub struct SetProfilePropertyCommand {
    pub field: MinerProfileField,
    pub value: ProfileValue,
}

impl Message for SetProfilePropertyCommand {
    const NAME: &'static str = "set-profile-property";
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProfilePropertyChanged {
    pub field: MinerProfileField,
    pub value: ProfileValue,
}

impl Message for ProfilePropertyChanged {
    const NAME: &'static str = "profile-property-changed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetShuttingDown;

impl Message for FleetShuttingDown {
    const NAME: &'static str = "fleet-shutting-down";
}
