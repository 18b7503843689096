//! Live per-rig state as last reported by each rig.
//!
//! The snapshot engine only reads through [`ClientStateSet`]; the connection
//! hub is the writer.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::session::ClientId;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub main_coin_code: String,
    pub dual_coin_code: String,
    pub is_mining: bool,
    pub is_dual_coin_enabled: bool,
    pub main_coin_speed: f64,
    pub dual_coin_speed: f64,
    /// Cumulative counters as reported by the rig's kernel.
    pub main_coin_total_share: u64,
    pub main_coin_reject_share: u64,
    pub dual_coin_total_share: u64,
    pub dual_coin_reject_share: u64,
    pub modified_on: DateTime<Utc>,
}

impl ClientRecord {
    pub fn new(client_id: ClientId, modified_on: DateTime<Utc>) -> Self {
        Self {
            client_id,
            modified_on,
            ..Self::default()
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        self.modified_on + window >= now
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClientCount {
    pub mining_count: u32,
    pub online_count: u32,
}

/// Read-only view of the fleet consumed by the snapshot engine.
pub trait ClientStateSet: Send + Sync {
    fn for_each_record(&self, visit: &mut dyn FnMut(&ClientRecord));

    fn count(&self, now: DateTime<Utc>) -> ClientCount;
}

/// In-memory client state keyed by client id.
pub struct ClientSet {
    records: RwLock<HashMap<ClientId, ClientRecord>>,
    active_window: Duration,
}

impl ClientSet {
    pub fn new(active_window: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            active_window,
        }
    }

    /// Replaces the record with the rig's latest report.
    pub fn apply_report(&self, record: ClientRecord) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.insert(record.client_id, record);
    }

    /// Refreshes `modified_on`, creating an empty record for a rig not seen before.
    pub fn touch(&self, client_id: ClientId, at: DateTime<Utc>) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records
            .entry(client_id)
            .and_modify(|record| {
                if record.modified_on < at {
                    record.modified_on = at;
                }
            })
            .or_insert_with(|| ClientRecord::new(client_id, at));
    }

    pub fn get(&self, client_id: &ClientId) -> Option<ClientRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(client_id)
            .cloned()
    }

    /// Drops records not refreshed within the active window. Returns how many went.
    pub fn prune_inactive(&self, now: DateTime<Utc>) -> usize {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|_, record| record.is_active_at(now, self.active_window));
        before - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ClientStateSet for ClientSet {
    fn for_each_record(&self, visit: &mut dyn FnMut(&ClientRecord)) {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        for record in records.values() {
            visit(record);
        }
    }

    fn count(&self, now: DateTime<Utc>) -> ClientCount {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records
            .values()
            .filter(|record| record.is_active_at(now, self.active_window))
            .fold(ClientCount::default(), |mut count, record| {
                count.online_count += 1;
                if record.is_mining {
                    count.mining_count += 1;
                }
                count
            })
    }
}
