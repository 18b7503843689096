use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::db::{
    connection::Database,
    helpers::{conversion_error, from_millis, to_i64, to_millis, to_u32, to_u64},
    models::CoinSnapshot,
};

const SELECT_COLUMNS: &str = "SELECT
        id,
        timestamp_ms,
        coin_code,
        main_coin_online_count,
        main_coin_mining_count,
        dual_coin_online_count,
        dual_coin_mining_count,
        speed,
        share_delta,
        reject_share_delta
    FROM coin_snapshots";

fn row_to_snapshot(row: &Row) -> Result<CoinSnapshot, rusqlite::Error> {
    let timestamp_ms: i64 = row.get("timestamp_ms")?;

    Ok(CoinSnapshot {
        id: row.get("id")?,
        timestamp: from_millis(timestamp_ms, "timestamp_ms").map_err(conversion_error)?,
        coin_code: row.get("coin_code")?,
        main_coin_online_count: to_u32(row.get("main_coin_online_count")?, "main_coin_online_count")
            .map_err(conversion_error)?,
        main_coin_mining_count: to_u32(row.get("main_coin_mining_count")?, "main_coin_mining_count")
            .map_err(conversion_error)?,
        dual_coin_online_count: to_u32(row.get("dual_coin_online_count")?, "dual_coin_online_count")
            .map_err(conversion_error)?,
        dual_coin_mining_count: to_u32(row.get("dual_coin_mining_count")?, "dual_coin_mining_count")
            .map_err(conversion_error)?,
        speed: row.get("speed")?,
        share_delta: to_u64(row.get("share_delta")?, "share_delta").map_err(conversion_error)?,
        reject_share_delta: to_u64(row.get("reject_share_delta")?, "reject_share_delta")
            .map_err(conversion_error)?,
    })
}

fn insert_batch(conn: &mut Connection, rows: &[CoinSnapshot]) -> Result<()> {
    let tx = conn
        .transaction()
        .context("failed to open snapshot insert transaction")?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO coin_snapshots (
                id,
                timestamp_ms,
                coin_code,
                main_coin_online_count,
                main_coin_mining_count,
                dual_coin_online_count,
                dual_coin_mining_count,
                speed,
                share_delta,
                reject_share_delta
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )?;

        for row in rows {
            stmt.execute(params![
                row.id,
                to_millis(row.timestamp),
                row.coin_code,
                row.main_coin_online_count,
                row.main_coin_mining_count,
                row.dual_coin_online_count,
                row.dual_coin_mining_count,
                row.speed,
                to_i64(row.share_delta)?,
                to_i64(row.reject_share_delta)?,
            ])
            .with_context(|| format!("failed to insert snapshot for {}", row.coin_code))?;
        }
    }
    tx.commit().context("failed to commit snapshot batch")?;
    Ok(())
}

/// Rows with `after < timestamp <= until`, oldest first.
fn select_range(
    conn: &Connection,
    after: DateTime<Utc>,
    until: DateTime<Utc>,
) -> Result<Vec<CoinSnapshot>> {
    let sql = format!(
        "{SELECT_COLUMNS}
         WHERE timestamp_ms > ?1 AND timestamp_ms <= ?2
         ORDER BY timestamp_ms ASC, coin_code ASC"
    );
    let mut stmt = conn.prepare(&sql)?;

    let rows = stmt
        .query_map(params![to_millis(after), to_millis(until)], row_to_snapshot)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(rows)
}

impl Database {
    /// Appends one aggregation pass in a single transaction.
    pub fn insert_coin_snapshots(&self, rows: Vec<CoinSnapshot>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.call(move |conn| insert_batch(conn, &rows))
    }

    pub fn load_coin_snapshots(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CoinSnapshot>> {
        self.call(move |conn| select_range(conn, after, until))
    }

    /// History lookup for reports reaching past the in-memory window.
    pub async fn coin_snapshots_between(
        &self,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<CoinSnapshot>> {
        self.execute(move |conn| select_range(conn, after, until))
            .await
    }
}
