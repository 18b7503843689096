use std::sync::{Arc, Weak};

use anyhow::{Context, Result};

use super::{MinerProfile, MinerProfileField, ProfileStore, ProfileValue};
use crate::{
    bus::{HandlerId, MessageBus, ProfilePropertyChanged, SetProfilePropertyCommand},
    log_info,
};

const ENABLE_LOGS: bool = true;

/// Applies profile commands from the bus to the injected store.
pub struct ProfileService {
    store: Arc<dyn ProfileStore>,
    bus: Weak<MessageBus>,
}

impl ProfileService {
    /// Builds the service and subscribes it to [`SetProfilePropertyCommand`].
    pub fn register(store: Arc<dyn ProfileStore>, bus: &Arc<MessageBus>) -> Arc<Self> {
        let service = Arc::new(Self {
            store,
            bus: Arc::downgrade(bus),
        });

        let handler = Arc::clone(&service);
        bus.register_handler::<SetProfilePropertyCommand, _>(
            HandlerId::SetProfileProperty,
            "write a miner profile property and announce the change",
            move |command| handler.set(command.field, command.value.clone()),
        );
        service
    }

    pub fn profile(&self) -> Result<MinerProfile> {
        self.store.load()
    }

    pub fn get(&self, field: MinerProfileField) -> Result<ProfileValue> {
        self.store.get(field)
    }

    /// Writes through the store, then publishes [`ProfilePropertyChanged`].
    pub fn set(&self, field: MinerProfileField, value: ProfileValue) -> Result<()> {
        self.store
            .set(field, value.clone())
            .with_context(|| format!("Failed to set profile property {field}"))?;
        log_info!("profile property {field} updated");

        if let Some(bus) = self.bus.upgrade() {
            bus.publish(&ProfilePropertyChanged { field, value });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::profile::LocalStore;

    fn changes(bus: &MessageBus) -> Arc<Mutex<Vec<ProfilePropertyChanged>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bus.register_handler::<ProfilePropertyChanged, _>(HandlerId::Extension(1), "observe", move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });
        seen
    }

    #[test]
    fn command_on_bus_updates_store_and_announces_change() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path().join("miner.json")).unwrap());
        let bus = Arc::new(MessageBus::new());
        let seen = changes(&bus);
        let service = ProfileService::register(store.clone(), &bus);

        let report = bus.publish(&SetProfilePropertyCommand {
            field: MinerProfileField::IsNoShareRestartKernel,
            value: ProfileValue::Bool(true),
        });

        assert!(report.faults.is_empty());
        assert!(store.load().unwrap().is_no_share_restart_kernel);
        assert_eq!(
            service.get(MinerProfileField::IsNoShareRestartKernel).unwrap(),
            ProfileValue::Bool(true)
        );
        assert_eq!(
            *seen.lock().unwrap(),
            vec![ProfilePropertyChanged {
                field: MinerProfileField::IsNoShareRestartKernel,
                value: ProfileValue::Bool(true),
            }]
        );
    }

    #[test]
    fn invalid_command_faults_without_announcing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LocalStore::open(dir.path().join("miner.json")).unwrap());
        let bus = Arc::new(MessageBus::new());
        let seen = changes(&bus);
        let _service = ProfileService::register(store, &bus);

        let report = bus.publish(&SetProfilePropertyCommand {
            field: MinerProfileField::NoShareRestartKernelMinutes,
            value: ProfileValue::Text("ten".into()),
        });

        assert_eq!(report.faults.len(), 1);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn registering_twice_keeps_one_subscription() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn ProfileStore> =
            Arc::new(LocalStore::open(dir.path().join("miner.json")).unwrap());
        let bus = Arc::new(MessageBus::new());

        ProfileService::register(Arc::clone(&store), &bus);
        ProfileService::register(store, &bus);
        assert_eq!(bus.handler_count::<SetProfilePropertyCommand>(), 1);
    }
}
