use std::convert::TryFrom;

use anyhow::{anyhow, Result};
use chrono::{DateTime, TimeZone, Utc};

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} value {value} is out of range"))
}

/// Timestamps are stored as UTC epoch milliseconds so range scans hit the index.
pub fn to_millis(value: DateTime<Utc>) -> i64 {
    value.timestamp_millis()
}

pub fn from_millis(value: i64, field: &str) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| anyhow!("{field} holds invalid timestamp {value}"))
}

/// Wraps a conversion failure so it can cross a `query_map` closure.
pub fn conversion_error(err: anyhow::Error) -> rusqlite::Error {
    rusqlite::Error::ToSqlConversionFailure(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        err.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millis_keep_sub_second_precision() {
        let at = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(from_millis(to_millis(at), "timestamp").unwrap(), at);
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert!(to_u64(-1, "share_delta").is_err());
        assert!(to_u32(i64::from(u32::MAX) + 1, "count").is_err());
    }
}
