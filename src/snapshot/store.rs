use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::db::{CoinSnapshot, Database};

/// Durable home of coin snapshots. Rows are append-only.
pub trait SnapshotStore: Send + Sync {
    fn insert_batch(&self, rows: &[CoinSnapshot]) -> Result<()>;

    /// Rows with `after < timestamp <= until`, oldest first.
    fn load_range(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<CoinSnapshot>>;
}

impl SnapshotStore for Database {
    fn insert_batch(&self, rows: &[CoinSnapshot]) -> Result<()> {
        self.insert_coin_snapshots(rows.to_vec())
    }

    fn load_range(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<CoinSnapshot>> {
        self.load_coin_snapshots(after, until)
    }
}
