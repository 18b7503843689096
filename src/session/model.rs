use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable rig identity; survives reconnects.
pub type ClientId = Uuid;

/// Volatile identity of one network connection, assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// What the registry needs from a session type.
pub trait RigSession: Clone + Send + Sync + 'static {
    fn client_id(&self) -> ClientId;

    fn connection_id(&self) -> &ConnectionId;

    fn last_active_at(&self) -> DateTime<Utc>;

    fn touch(&mut self, at: DateTime<Utc>);
}

/// Session of a mining client connected over the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MinerSession {
    pub client_id: ClientId,
    pub connection_id: ConnectionId,
    pub miner_name: String,
    pub connected_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl MinerSession {
    pub fn new(
        client_id: ClientId,
        connection_id: ConnectionId,
        miner_name: impl Into<String>,
        connected_at: DateTime<Utc>,
    ) -> Self {
        Self {
            client_id,
            connection_id,
            miner_name: miner_name.into(),
            connected_at,
            last_active_at: connected_at,
        }
    }
}

impl RigSession for MinerSession {
    fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    fn last_active_at(&self) -> DateTime<Utc> {
        self.last_active_at
    }

    fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_active_at {
            self.last_active_at = at;
        }
    }
}
