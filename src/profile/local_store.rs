use std::{
    fs,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use anyhow::{Context, Result};

use super::{MinerProfile, MinerProfileField, ProfileStore, ProfileValue};
use crate::log_warn;

const ENABLE_LOGS: bool = true;

/// Profile kept as a JSON file on the rig itself.
pub struct LocalStore {
    path: PathBuf,
    data: RwLock<MinerProfile>,
}

impl LocalStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read profile from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!("ignoring unreadable profile {}: {err}", path.display());
                MinerProfile::default()
            })
        } else {
            MinerProfile::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the file, replacing the cached profile.
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read profile from {}", self.path.display()))?;
        let data: MinerProfile = serde_json::from_str(&contents)
            .with_context(|| format!("Malformed profile in {}", self.path.display()))?;
        *self.data.write().unwrap_or_else(PoisonError::into_inner) = data;
        Ok(())
    }

    fn persist(&self, data: &MinerProfile) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write profile to {}", self.path.display()))
    }
}

impl ProfileStore for LocalStore {
    fn load(&self) -> Result<MinerProfile> {
        Ok(self.data.read().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn set(&self, field: MinerProfileField, value: ProfileValue) -> Result<()> {
        let mut guard = self.data.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = guard.clone();
        updated.set(field, value)?;
        self.persist(&updated)?;
        *guard = updated;
        Ok(())
    }
}
