//! Aggregate fleet telemetry for one coin at one tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoinSnapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub coin_code: String,
    pub main_coin_online_count: u32,
    pub main_coin_mining_count: u32,
    pub dual_coin_online_count: u32,
    pub dual_coin_mining_count: u32,
    /// Summed instantaneous speed of the rigs mining this coin, in hashes per second.
    pub speed: f64,
    pub share_delta: u64,
    pub reject_share_delta: u64,
}

impl CoinSnapshot {
    pub fn new(coin_code: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp,
            coin_code: coin_code.into(),
            main_coin_online_count: 0,
            main_coin_mining_count: 0,
            dual_coin_online_count: 0,
            dual_coin_mining_count: 0,
            speed: 0.0,
            share_delta: 0,
            reject_share_delta: 0,
        }
    }
}
