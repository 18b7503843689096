//! Live rig sessions indexed by durable client id and volatile connection id.
//!
//! A reconnecting rig goes through two steps: [`SessionRegistry::add`] when the
//! new connection arrives, then [`SessionRegistry::activate_by_connection_id`]
//! once that connection has completed its handshake. Adding supersedes every
//! other connection of the same client for connection-id lookups, but the
//! client's active session only changes on activation, and the last
//! activation wins no matter in which order the connections were added.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::model::{ClientId, ConnectionId, RigSession};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),
    #[error("no session is bound to connection {0}")]
    NotFound(ConnectionId),
}

/// Result of removing a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Removal<S> {
    pub session: S,
    /// Whether the removed session was its client's active one.
    pub was_active: bool,
}

/// Result of activating a connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Activation<S> {
    pub active: S,
    /// Previously active session of the same client, which the caller should close.
    pub displaced: Option<S>,
}

struct Entry<S> {
    session: S,
    superseded: bool,
}

#[derive(Default)]
struct ClientSlot {
    active: Option<ConnectionId>,
    connections: Vec<ConnectionId>,
}

struct RegistryState<S> {
    by_connection: HashMap<ConnectionId, Entry<S>>,
    by_client: HashMap<ClientId, ClientSlot>,
    active_count: usize,
}

impl<S: RigSession> RegistryState<S> {
    fn detach(&mut self, connection_id: &ConnectionId) -> Option<Removal<S>> {
        let entry = self.by_connection.remove(connection_id)?;
        let client_id = entry.session.client_id();
        let mut was_active = false;

        if let Some(slot) = self.by_client.get_mut(&client_id) {
            slot.connections.retain(|id| id != connection_id);
            if slot.active.as_ref() == Some(connection_id) {
                slot.active = None;
                self.active_count -= 1;
                was_active = true;
            }
            if slot.connections.is_empty() {
                self.by_client.remove(&client_id);
            }
        }

        Some(Removal {
            session: entry.session,
            was_active,
        })
    }
}

pub struct SessionRegistry<S> {
    state: RwLock<RegistryState<S>>,
}

impl<S: RigSession> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: RigSession> SessionRegistry<S> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState {
                by_connection: HashMap::new(),
                by_client: HashMap::new(),
                active_count: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RegistryState<S>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RegistryState<S>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a freshly accepted connection.
    ///
    /// Returns the sessions it superseded; their transports should be closed by
    /// the caller. The client's active session is untouched until activation.
    pub fn add(&self, session: S) -> Result<Vec<S>, RegistryError> {
        let connection_id = session.connection_id().clone();
        let client_id = session.client_id();
        let mut state = self.write();

        if state.by_connection.contains_key(&connection_id) {
            return Err(RegistryError::DuplicateConnection(connection_id));
        }

        let RegistryState {
            by_connection,
            by_client,
            ..
        } = &mut *state;

        let slot = by_client.entry(client_id).or_default();
        let mut superseded = Vec::new();
        for other in &slot.connections {
            if let Some(entry) = by_connection.get_mut(other) {
                if !entry.superseded {
                    entry.superseded = true;
                    superseded.push(entry.session.clone());
                }
            }
        }
        slot.connections.push(connection_id.clone());
        by_connection.insert(
            connection_id,
            Entry {
                session,
                superseded: false,
            },
        );

        Ok(superseded)
    }

    /// Makes the session bound to `connection_id` the active one for its client.
    pub fn activate_by_connection_id(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Activation<S>, RegistryError> {
        let mut state = self.write();
        let state = &mut *state;

        let client_id = match state.by_connection.get_mut(connection_id) {
            Some(entry) => {
                entry.superseded = false;
                entry.session.client_id()
            }
            None => return Err(RegistryError::NotFound(connection_id.clone())),
        };

        let slot = state.by_client.entry(client_id).or_default();
        let previous = slot.active.replace(connection_id.clone());
        let mut displaced = None;

        match previous {
            None => state.active_count += 1,
            Some(previous) if previous == *connection_id => {}
            Some(previous) => {
                if let Some(entry) = state.by_connection.get(&previous) {
                    displaced = Some(entry.session.clone());
                }
            }
        }

        for other in &slot.connections {
            if other != connection_id {
                if let Some(entry) = state.by_connection.get_mut(other) {
                    entry.superseded = true;
                }
            }
        }

        let active = state
            .by_connection
            .get(connection_id)
            .map(|entry| entry.session.clone())
            .ok_or_else(|| RegistryError::NotFound(connection_id.clone()))?;

        Ok(Activation { active, displaced })
    }

    /// Drops the session bound to `connection_id`.
    ///
    /// Removing a superseded connection leaves the client's active session alone.
    pub fn remove_by_connection_id(
        &self,
        connection_id: &ConnectionId,
    ) -> Result<Removal<S>, RegistryError> {
        self.write()
            .detach(connection_id)
            .ok_or_else(|| RegistryError::NotFound(connection_id.clone()))
    }

    pub fn try_get_by_client_id(&self, client_id: &ClientId) -> Option<S> {
        let state = self.read();
        let active = state.by_client.get(client_id)?.active.as_ref()?;
        state
            .by_connection
            .get(active)
            .map(|entry| entry.session.clone())
    }

    /// Superseded connections are not visible here.
    pub fn try_get_by_connection_id(&self, connection_id: &ConnectionId) -> Option<S> {
        self.read()
            .by_connection
            .get(connection_id)
            .filter(|entry| !entry.superseded)
            .map(|entry| entry.session.clone())
    }

    pub fn is_active(&self, connection_id: &ConnectionId) -> bool {
        let state = self.read();
        state
            .by_connection
            .get(connection_id)
            .and_then(|entry| state.by_client.get(&entry.session.client_id()))
            .and_then(|slot| slot.active.as_ref())
            .is_some_and(|active| active == connection_id)
    }

    /// Number of active sessions.
    pub fn count(&self) -> usize {
        self.read().active_count
    }

    /// Refreshes the activity timestamp of a live connection.
    pub fn touch(&self, connection_id: &ConnectionId, at: DateTime<Utc>) -> bool {
        match self.write().by_connection.get_mut(connection_id) {
            Some(entry) if !entry.superseded => {
                entry.session.touch(at);
                true
            }
            _ => false,
        }
    }

    /// Removes every session silent for longer than `idle` and returns them for closing.
    pub fn sweep_stale(&self, now: DateTime<Utc>, idle: Duration) -> Vec<Removal<S>> {
        let mut state = self.write();
        let stale: Vec<ConnectionId> = state
            .by_connection
            .iter()
            .filter(|(_, entry)| entry.session.last_active_at() + idle < now)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .iter()
            .filter_map(|id| state.detach(id))
            .collect()
    }

    /// Active sessions at this instant.
    pub fn sessions(&self) -> Vec<S> {
        let state = self.read();
        state
            .by_client
            .values()
            .filter_map(|slot| slot.active.as_ref())
            .filter_map(|id| state.by_connection.get(id))
            .map(|entry| entry.session.clone())
            .collect()
    }
}
