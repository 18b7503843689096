use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use uuid::Uuid;

use super::{MinerProfile, MinerProfileField, ProfileStore, ProfileValue};

/// RPC surface of the control center that owns remotely managed profiles.
pub trait ProfileClient: Send + Sync {
    fn fetch_profile(&self, work_id: Uuid) -> Result<MinerProfile>;

    fn set_property(&self, work_id: Uuid, field: MinerProfileField, value: &ProfileValue)
        -> Result<()>;
}

/// Profile of a work (a named rig configuration) held by the control center.
///
/// Writes are validated locally, forwarded, and cached only once the remote
/// side accepted them.
pub struct RemoteStore<C: ProfileClient> {
    client: C,
    work_id: Uuid,
    cache: RwLock<Option<MinerProfile>>,
}

impl<C: ProfileClient> RemoteStore<C> {
    pub fn new(client: C, work_id: Uuid) -> Self {
        Self {
            client,
            work_id,
            cache: RwLock::new(None),
        }
    }

    pub fn work_id(&self) -> Uuid {
        self.work_id
    }

    pub fn invalidate(&self) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn fetch(&self) -> Result<MinerProfile> {
        self.client
            .fetch_profile(self.work_id)
            .with_context(|| format!("Failed to fetch profile of work {}", self.work_id))
    }
}

impl<C: ProfileClient> ProfileStore for RemoteStore<C> {
    fn load(&self) -> Result<MinerProfile> {
        if let Some(profile) = self.cache.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
            return Ok(profile.clone());
        }

        let profile = self.fetch()?;
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(profile.clone());
        Ok(profile)
    }

    fn set(&self, field: MinerProfileField, value: ProfileValue) -> Result<()> {
        let mut updated = self.load()?;
        updated.set(field, value.clone())?;

        self.client
            .set_property(self.work_id, field, &value)
            .with_context(|| format!("Control center rejected {field} for work {}", self.work_id))?;

        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(updated);
        Ok(())
    }
}
