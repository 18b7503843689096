use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};

use super::{
    model::{ConnectionId, MinerSession, RigSession},
    registry::{Activation, RegistryError, Removal, SessionRegistry},
};
use crate::{
    bus::{
        ClientActivated, ClientConnected, ClientDisconnected, HandlerId, LongTick, Message,
        MessageBus,
    },
    clients::{ClientRecord, ClientSet},
    log_debug, log_info,
};

const ENABLE_LOGS: bool = true;

/// Entry point for the network layer.
///
/// Owns the session registry, keeps the client state set fresh from
/// handshakes and heartbeats, and announces lifecycle changes on the bus.
pub struct ConnectionHub<S: RigSession = MinerSession> {
    registry: SessionRegistry<S>,
    clients: Arc<ClientSet>,
    bus: Weak<MessageBus>,
    idle: Duration,
}

impl<S: RigSession> ConnectionHub<S> {
    pub fn new(clients: Arc<ClientSet>, bus: &Arc<MessageBus>, idle: Duration) -> Self {
        Self {
            registry: SessionRegistry::new(),
            clients,
            bus: Arc::downgrade(bus),
            idle,
        }
    }

    /// Subscribes the stale-session sweep to the long tick.
    pub fn register(self: &Arc<Self>, bus: &MessageBus) {
        let hub = Arc::clone(self);
        bus.register_handler::<LongTick, _>(
            HandlerId::SweepStaleSessions,
            "close sessions that stopped sending heartbeats",
            move |tick| {
                hub.sweep(tick.timestamp);
                Ok(())
            },
        );
    }

    pub fn registry(&self) -> &SessionRegistry<S> {
        &self.registry
    }

    /// Registers a freshly opened connection. Returns the sessions it superseded.
    pub fn on_connected(&self, session: S) -> Result<Vec<S>, RegistryError> {
        let client_id = session.client_id();
        let connection_id = session.connection_id().clone();
        let superseded = self.registry.add(session)?;

        log_debug!("connection {connection_id} opened for client {client_id}");
        self.publish(&ClientConnected {
            client_id,
            connection_id,
            superseded: superseded
                .iter()
                .map(|session| session.connection_id().clone())
                .collect(),
        });
        Ok(superseded)
    }

    /// Completes the handshake: the connection becomes its client's active one.
    pub fn on_handshake(
        &self,
        connection_id: &ConnectionId,
        at: DateTime<Utc>,
    ) -> Result<Activation<S>, RegistryError> {
        let mut activation = self.registry.activate_by_connection_id(connection_id)?;
        if self.registry.touch(connection_id, at) {
            activation.active.touch(at);
        }
        let client_id = activation.active.client_id();
        self.clients.touch(client_id, at);

        log_info!("client {client_id} active on {connection_id}");
        self.publish(&ClientActivated {
            client_id,
            connection_id: connection_id.clone(),
            displaced: activation
                .displaced
                .as_ref()
                .map(|session| session.connection_id().clone()),
        });
        Ok(activation)
    }

    /// Records a state report. Reports from superseded or unknown connections
    /// are rejected so a lingering old socket cannot overwrite fresh state.
    pub fn on_heartbeat(
        &self,
        connection_id: &ConnectionId,
        mut record: ClientRecord,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        if !self.registry.touch(connection_id, at) {
            return Err(RegistryError::NotFound(connection_id.clone()));
        }
        let session = self
            .registry
            .try_get_by_connection_id(connection_id)
            .ok_or_else(|| RegistryError::NotFound(connection_id.clone()))?;

        record.client_id = session.client_id();
        record.modified_on = at;
        self.clients.apply_report(record);
        Ok(())
    }

    pub fn on_disconnected(&self, connection_id: &ConnectionId) -> Result<Removal<S>, RegistryError> {
        let removal = self.registry.remove_by_connection_id(connection_id)?;
        self.announce_removal(&removal);
        Ok(removal)
    }

    /// Drops sessions idle for longer than the configured timeout, then
    /// forgets client records that left the active window.
    pub fn sweep(&self, now: DateTime<Utc>) -> Vec<S> {
        let removed = self.registry.sweep_stale(now, self.idle);
        if !removed.is_empty() {
            log_info!("swept {} idle sessions", removed.len());
        }
        let forgotten = self.clients.prune_inactive(now);
        if forgotten > 0 {
            log_debug!("forgot {forgotten} inactive client records");
        }
        removed
            .into_iter()
            .map(|removal| {
                self.announce_removal(&removal);
                removal.session
            })
            .collect()
    }

    fn announce_removal(&self, removal: &Removal<S>) {
        log_debug!(
            "connection {} closed (active: {})",
            removal.session.connection_id(),
            removal.was_active
        );
        self.publish(&ClientDisconnected {
            client_id: removal.session.client_id(),
            connection_id: removal.session.connection_id().clone(),
            was_active: removal.was_active,
        });
    }

    fn publish<M: Message>(&self, message: &M) {
        if let Some(bus) = self.bus.upgrade() {
            bus.publish(message);
        }
    }
}
