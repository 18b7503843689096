use std::sync::Arc;

use anyhow::{Context, Result};
use log::LevelFilter;

use crate::{
    bus::{
        ClientActivated, ClientDisconnected, FleetShuttingDown, HandlerId, MessageBus, Ticker,
    },
    clients::ClientSet,
    config::FleetConfig,
    db::Database,
    profile::{ProfileService, ProfileStore},
    session::ConnectionHub,
    snapshot::{SnapshotEngine, SnapshotSettings},
    utils::init_logging,
};

/// Everything one fleet server instance shares between its components.
///
/// Built once by [`FleetContext::init`] and torn down by
/// [`FleetContext::shutdown`]; there is no process-global state.
pub struct FleetContext {
    config: FleetConfig,
    database: Database,
    bus: Arc<MessageBus>,
    clients: Arc<ClientSet>,
    snapshots: Arc<SnapshotEngine>,
    hub: Arc<ConnectionHub>,
    profiles: Option<Arc<ProfileService>>,
    ticker: Ticker,
}

impl FleetContext {
    /// Opens storage, wires the components onto a fresh bus and starts the
    /// ticker. Must be called from within a tokio runtime.
    pub fn init(config: FleetConfig) -> Result<Self> {
        init_logging(LevelFilter::Info);
        config.validate()?;
        log::info!("minerfleet starting up...");

        let database = Database::new(config.database_path.clone(), config.store_timeout())
            .with_context(|| {
                format!("Failed to open database at {}", config.database_path.display())
            })?;

        let bus = Arc::new(MessageBus::new());
        let clients = Arc::new(ClientSet::new(config.active_window()));

        let snapshots = Arc::new(SnapshotEngine::new(
            clients.clone(),
            Arc::new(database.clone()),
            SnapshotSettings::from(&config),
        ));
        snapshots.register(&bus);

        let hub = Arc::new(ConnectionHub::new(
            Arc::clone(&clients),
            &bus,
            config.session_idle(),
        ));
        hub.register(&bus);

        register_activity_log(&bus);

        let mut ticker = Ticker::new();
        ticker.start(Arc::clone(&bus), config.short_tick(), config.long_tick())?;

        Ok(Self {
            config,
            database,
            bus,
            clients,
            snapshots,
            hub,
            profiles: None,
            ticker,
        })
    }

    /// Attaches a profile store and subscribes its service to the bus.
    pub fn attach_profile_store(&mut self, store: Arc<dyn ProfileStore>) -> Arc<ProfileService> {
        let service = ProfileService::register(store, &self.bus);
        self.profiles = Some(Arc::clone(&service));
        service
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn clients(&self) -> &Arc<ClientSet> {
        &self.clients
    }

    pub fn snapshots(&self) -> &Arc<SnapshotEngine> {
        &self.snapshots
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    pub fn profiles(&self) -> Option<&Arc<ProfileService>> {
        self.profiles.as_ref()
    }

    /// Announces shutdown, then stops the ticker and waits for its last pass.
    pub async fn shutdown(mut self) -> Result<()> {
        let bus = Arc::clone(&self.bus);
        tokio::task::spawn_blocking(move || bus.publish(&FleetShuttingDown))
            .await
            .context("shutdown announcement failed")?;
        self.ticker.stop().await?;
        log::info!("minerfleet stopped");
        Ok(())
    }
}

fn register_activity_log(bus: &MessageBus) {
    bus.register_handler::<ClientActivated, _>(
        HandlerId::LogFleetActivity,
        "log client activations",
        |event| {
            match &event.displaced {
                Some(old) => log::info!(
                    "client {} moved from {} to {}",
                    event.client_id,
                    old,
                    event.connection_id
                ),
                None => log::info!("client {} online on {}", event.client_id, event.connection_id),
            }
            Ok(())
        },
    );
    bus.register_handler::<ClientDisconnected, _>(
        HandlerId::LogFleetActivity,
        "log client disconnects",
        |event| {
            if event.was_active {
                log::info!("client {} offline ({})", event.client_id, event.connection_id);
            }
            Ok(())
        },
    );
}
