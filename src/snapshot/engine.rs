use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use chrono::{DateTime, Duration, Utc};
use thiserror::Error;

use super::{
    sampler::{CoinRole, ShareSampler},
    store::SnapshotStore,
};
use crate::{
    bus::{HandlerId, LongTick, MessageBus, ShortTick},
    clients::{ClientCount, ClientRecord, ClientStateSet},
    config::FleetConfig,
    db::CoinSnapshot,
    log_debug, log_info,
};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Uninitialized,
    Initializing,
    Ready,
}

impl EnginePhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Initializing,
            2 => Self::Ready,
            _ => Self::Uninitialized,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("snapshot storage failed while {operation}: {reason}")]
    AggregationIo {
        operation: &'static str,
        reason: String,
    },
}

impl SnapshotError {
    fn io(operation: &'static str, err: anyhow::Error) -> Self {
        Self::AggregationIo {
            operation,
            reason: format!("{err:#}"),
        }
    }
}

/// Timing knobs of the engine, in wall-clock terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotSettings {
    pub short_tick: Duration,
    pub retention: Duration,
    pub active_window: Duration,
    pub read_guard: Duration,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self::from(&FleetConfig::default())
    }
}

impl From<&FleetConfig> for SnapshotSettings {
    fn from(config: &FleetConfig) -> Self {
        Self {
            short_tick: config.tick_span(1),
            retention: config.retention(),
            active_window: config.active_window(),
            read_guard: config.read_guard(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatestSnapshots {
    /// Newest first.
    pub snapshots: Vec<CoinSnapshot>,
    pub totals: ClientCount,
}

struct EngineState {
    window: Vec<CoinSnapshot>,
    sampler: ShareSampler,
}

/// Aggregates per-coin fleet telemetry on every short tick and keeps the
/// recent history in memory for dashboard reads.
pub struct SnapshotEngine {
    clients: Arc<dyn ClientStateSet>,
    store: Arc<dyn SnapshotStore>,
    settings: SnapshotSettings,
    phase: AtomicU8,
    state: Mutex<EngineState>,
}

impl SnapshotEngine {
    pub fn new(
        clients: Arc<dyn ClientStateSet>,
        store: Arc<dyn SnapshotStore>,
        settings: SnapshotSettings,
    ) -> Self {
        Self {
            clients,
            store,
            settings,
            phase: AtomicU8::new(EnginePhase::Uninitialized as u8),
            state: Mutex::new(EngineState {
                window: Vec::new(),
                sampler: ShareSampler::new(settings.active_window),
            }),
        }
    }

    /// Subscribes the capture and eviction passes to the tick messages.
    pub fn register(self: &Arc<Self>, bus: &MessageBus) {
        let engine = Arc::clone(self);
        bus.register_handler::<ShortTick, _>(
            HandlerId::CaptureCoinSnapshots,
            "aggregate client state into per-coin snapshots",
            move |tick| {
                engine.on_short_tick(tick.timestamp)?;
                Ok(())
            },
        );

        let engine = Arc::clone(self);
        bus.register_handler::<LongTick, _>(
            HandlerId::EvictExpiredSnapshots,
            "evict snapshots older than the retention window",
            move |tick| {
                engine.on_long_tick(tick.timestamp);
                Ok(())
            },
        );
    }

    pub fn phase(&self) -> EnginePhase {
        EnginePhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    pub fn settings(&self) -> SnapshotSettings {
        self.settings
    }

    /// Runs one aggregation pass at `now` and returns the number of rows written.
    ///
    /// Rows are appended to memory before the durable write; a failed write
    /// leaves them in memory and is reported as [`SnapshotError::AggregationIo`].
    pub fn on_short_tick(&self, now: DateTime<Utc>) -> Result<usize, SnapshotError> {
        let rows = {
            let mut state = self.lock_ready(now)?;
            let rows = self.aggregate(&mut state.sampler, now);
            state.window.extend(rows.iter().cloned());
            rows
        };

        if rows.is_empty() {
            return Ok(0);
        }
        self.store
            .insert_batch(&rows)
            .map_err(|err| SnapshotError::io("writing a snapshot batch", err))?;
        log_debug!("captured {} coin snapshots at {}", rows.len(), now);
        Ok(rows.len())
    }

    /// Evicts rows with `timestamp < now - retention`. Durable rows are kept.
    pub fn on_long_tick(&self, now: DateTime<Utc>) -> usize {
        let horizon = now - self.settings.retention;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.window.len();
        state.window.retain(|row| row.timestamp >= horizon);
        let evicted = before - state.window.len();
        let pruned = state.sampler.prune(now);
        if evicted > 0 || pruned > 0 {
            log_debug!("evicted {evicted} snapshots and {pruned} share samples");
        }
        evicted
    }

    pub fn get_latest_snapshots(&self, limit: u32) -> Result<LatestSnapshots, SnapshotError> {
        self.get_latest_snapshots_at(limit, Utc::now())
    }

    /// Rows in `(now - (limit * short_tick + guard), now - guard]`, newest
    /// first, with fleet totals that are not windowed.
    ///
    /// The guard keeps a pass still being written out of the result.
    pub fn get_latest_snapshots_at(
        &self,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<LatestSnapshots, SnapshotError> {
        let right = now - self.settings.read_guard;
        // No left edge when the span does not fit in a timestamp.
        let left = i32::try_from(limit)
            .ok()
            .and_then(|ticks| self.settings.short_tick.checked_mul(ticks))
            .and_then(|span| right.checked_sub_signed(span));

        let mut snapshots: Vec<CoinSnapshot> = {
            let state = self.lock_ready(now)?;
            state
                .window
                .iter()
                .filter(|row| {
                    left.map_or(true, |left| row.timestamp > left) && row.timestamp <= right
                })
                .cloned()
                .collect()
        };
        snapshots.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        Ok(LatestSnapshots {
            snapshots,
            totals: self.clients.count(now),
        })
    }

    /// Durable history in `(from, to]`, for ranges older than the memory window.
    pub async fn snapshots_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<CoinSnapshot>, SnapshotError> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.load_range(from, to))
            .await
            .map_err(|err| SnapshotError::io("joining a history query", err.into()))?
            .map_err(|err| SnapshotError::io("loading snapshot history", err))
    }

    pub fn window_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .window
            .len()
    }

    /// Locks the state, loading the recent durable rows on first use.
    ///
    /// A failed load leaves the engine uninitialized so the next call retries.
    fn lock_ready(&self, now: DateTime<Utc>) -> Result<MutexGuard<'_, EngineState>, SnapshotError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if self.phase() == EnginePhase::Ready {
            return Ok(state);
        }

        self.phase
            .store(EnginePhase::Initializing as u8, Ordering::Release);
        match self.store.load_range(now - self.settings.retention, now) {
            Ok(rows) => {
                log_info!("loaded {} recent snapshots into memory", rows.len());
                let mut restored = rows;
                restored.append(&mut state.window);
                state.window = restored;
                self.phase.store(EnginePhase::Ready as u8, Ordering::Release);
                Ok(state)
            }
            Err(err) => {
                self.phase
                    .store(EnginePhase::Uninitialized as u8, Ordering::Release);
                Err(SnapshotError::io("loading recent snapshots", err))
            }
        }
    }

    fn aggregate(&self, sampler: &mut ShareSampler, now: DateTime<Utc>) -> Vec<CoinSnapshot> {
        let mut by_coin: BTreeMap<String, CoinSnapshot> = BTreeMap::new();
        let window = self.settings.active_window;

        self.clients.for_each_record(&mut |record: &ClientRecord| {
            if !record.is_active_at(now, window) || record.main_coin_code.is_empty() {
                return;
            }

            let main_delta = sampler.observe(
                record.client_id,
                CoinRole::Main,
                record.main_coin_total_share,
                record.main_coin_reject_share,
                now,
            );
            let main = by_coin
                .entry(record.main_coin_code.clone())
                .or_insert_with(|| CoinSnapshot::new(&record.main_coin_code, now));
            main.main_coin_online_count += 1;
            if record.is_mining {
                main.main_coin_mining_count += 1;
                main.speed += record.main_coin_speed;
                main.share_delta += main_delta.accepted;
                main.reject_share_delta += main_delta.rejected;
            }

            if record.dual_coin_code.is_empty() || !record.is_dual_coin_enabled {
                return;
            }
            let dual_delta = sampler.observe(
                record.client_id,
                CoinRole::Dual,
                record.dual_coin_total_share,
                record.dual_coin_reject_share,
                now,
            );
            let dual = by_coin
                .entry(record.dual_coin_code.clone())
                .or_insert_with(|| CoinSnapshot::new(&record.dual_coin_code, now));
            dual.dual_coin_online_count += 1;
            if record.is_mining {
                dual.dual_coin_mining_count += 1;
                dual.speed += record.dual_coin_speed;
                dual.share_delta += dual_delta.accepted;
                dual.reject_share_delta += dual_delta.rejected;
            }
        });

        by_coin.into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{atomic::AtomicBool, Barrier},
        thread,
        time::Duration as StdDuration,
    };

    use anyhow::{bail, Result};
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::*;
    use crate::clients::ClientSet;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<CoinSnapshot>>,
        inserts: AtomicU8,
        loads: AtomicU8,
        failing: AtomicBool,
        slow: AtomicBool,
    }

    impl SnapshotStore for MemoryStore {
        fn insert_batch(&self, rows: &[CoinSnapshot]) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                bail!("disk full");
            }
            self.inserts.fetch_add(1, Ordering::SeqCst);
            self.rows.lock().unwrap().extend_from_slice(rows);
            Ok(())
        }

        fn load_range(&self, after: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<CoinSnapshot>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            if self.slow.load(Ordering::SeqCst) {
                thread::sleep(StdDuration::from_millis(100));
            }
            if self.failing.load(Ordering::SeqCst) {
                bail!("database locked");
            }
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|row| row.timestamp > after && row.timestamp <= until)
                .cloned()
                .collect())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn engine_with(store: Arc<MemoryStore>) -> (Arc<ClientSet>, SnapshotEngine) {
        let clients = Arc::new(ClientSet::new(Duration::minutes(3)));
        let engine = SnapshotEngine::new(clients.clone(), store, SnapshotSettings::default());
        (clients, engine)
    }

    fn btc_miner(client_id: Uuid, total: u64, reject: u64, now: DateTime<Utc>) -> ClientRecord {
        ClientRecord {
            main_coin_code: "BTC".into(),
            is_mining: true,
            main_coin_speed: 100.0,
            main_coin_total_share: total,
            main_coin_reject_share: reject,
            ..ClientRecord::new(client_id, now)
        }
    }

    fn row(coin: &str, timestamp: DateTime<Utc>) -> CoinSnapshot {
        CoinSnapshot::new(coin, timestamp)
    }

    #[test]
    fn single_btc_miner_yields_one_row() {
        let store = Arc::new(MemoryStore::default());
        let (clients, engine) = engine_with(store.clone());
        let rig = Uuid::new_v4();
        let now = at(1_000);

        clients.apply_report(btc_miner(rig, 200, 3, now - Duration::seconds(10)));
        engine.on_short_tick(now - Duration::seconds(10)).unwrap();
        clients.apply_report(btc_miner(rig, 205, 4, now));
        assert_eq!(engine.on_short_tick(now).unwrap(), 1);

        let latest = engine.get_latest_snapshots_at(1, now + Duration::seconds(5)).unwrap();
        assert_eq!(latest.snapshots.len(), 1);
        let btc = &latest.snapshots[0];
        assert_eq!(btc.coin_code, "BTC");
        assert_eq!(btc.timestamp, now);
        assert_eq!(btc.main_coin_mining_count, 1);
        assert_eq!(btc.main_coin_online_count, 1);
        assert_eq!(btc.speed, 100.0);
        assert_eq!(btc.share_delta, 5);
        assert_eq!(btc.reject_share_delta, 1);
        assert_eq!((btc.dual_coin_online_count, btc.dual_coin_mining_count), (0, 0));
        assert_eq!(store.rows.lock().unwrap().len(), 2);
    }

    #[test]
    fn stale_and_coinless_clients_contribute_nothing() {
        let store = Arc::new(MemoryStore::default());
        let (clients, engine) = engine_with(store.clone());
        let now = at(1_000);

        clients.apply_report(btc_miner(Uuid::new_v4(), 10, 0, now - Duration::seconds(181)));
        clients.apply_report(ClientRecord::new(Uuid::new_v4(), now));

        assert_eq!(engine.on_short_tick(now).unwrap(), 0);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 0);
        assert_eq!(engine.window_len(), 0);
    }

    #[test]
    fn dual_mining_rig_feeds_both_coin_rows() {
        let store = Arc::new(MemoryStore::default());
        let (clients, engine) = engine_with(store);
        let now = at(1_000);

        clients.apply_report(ClientRecord {
            main_coin_code: "ETH".into(),
            dual_coin_code: "ZIL".into(),
            is_dual_coin_enabled: true,
            is_mining: true,
            main_coin_speed: 30.0,
            dual_coin_speed: 7.5,
            ..ClientRecord::new(Uuid::new_v4(), now)
        });
        clients.apply_report(ClientRecord {
            main_coin_code: "ZIL".into(),
            dual_coin_code: "ETH".into(),
            is_dual_coin_enabled: false,
            ..ClientRecord::new(Uuid::new_v4(), now)
        });
        engine.on_short_tick(now).unwrap();

        let latest = engine.get_latest_snapshots_at(1, now + Duration::seconds(5)).unwrap();
        let eth = latest.snapshots.iter().find(|r| r.coin_code == "ETH").unwrap();
        let zil = latest.snapshots.iter().find(|r| r.coin_code == "ZIL").unwrap();

        assert_eq!((eth.main_coin_online_count, eth.main_coin_mining_count), (1, 1));
        assert_eq!((eth.dual_coin_online_count, eth.dual_coin_mining_count), (0, 0));
        assert_eq!(eth.speed, 30.0);
        assert_eq!((zil.main_coin_online_count, zil.main_coin_mining_count), (1, 0));
        assert_eq!((zil.dual_coin_online_count, zil.dual_coin_mining_count), (1, 1));
        assert_eq!(zil.speed, 7.5);
        assert_eq!(
            latest.totals,
            ClientCount {
                mining_count: 1,
                online_count: 2
            }
        );
    }

    #[test]
    fn long_tick_eviction_is_idempotent() {
        let store = Arc::new(MemoryStore::default());
        let now = at(10_000);
        store.rows.lock().unwrap().extend([
            row("BTC", now - Duration::minutes(19)),
            row("BTC", now - Duration::minutes(10)),
        ]);
        let (clients, engine) = engine_with(store.clone());
        clients.apply_report(btc_miner(Uuid::new_v4(), 1, 0, now));
        engine.on_short_tick(now).unwrap();
        assert_eq!(engine.window_len(), 3);

        let later = now + Duration::minutes(10);
        assert_eq!(engine.on_long_tick(later), 1);
        assert_eq!(engine.window_len(), 2);
        assert_eq!(engine.on_long_tick(later), 0);
        assert_eq!(engine.window_len(), 2);
        assert_eq!(store.rows.lock().unwrap().len(), 3);
    }

    #[test]
    fn row_exactly_at_horizon_survives_eviction() {
        let store = Arc::new(MemoryStore::default());
        let now = at(10_000);
        store.rows.lock().unwrap().push(row("LTC", now - Duration::seconds(1)));
        let (_, engine) = engine_with(store);
        engine.get_latest_snapshots_at(1, now).unwrap();

        assert_eq!(engine.on_long_tick(now - Duration::seconds(1) + Duration::minutes(20)), 0);
        assert_eq!(engine.on_long_tick(now + Duration::minutes(20)), 1);
    }

    #[test]
    fn latest_window_for_six_ticks_is_guarded_and_newest_first() {
        let store = Arc::new(MemoryStore::default());
        let t = at(50_000);
        for secs in [70, 65, 64, 40, 10, 5, 4, 0] {
            store
                .rows
                .lock()
                .unwrap()
                .push(row(&format!("T-{secs}"), t - Duration::seconds(secs)));
        }
        let (_, engine) = engine_with(store);

        let latest = engine.get_latest_snapshots_at(6, t).unwrap();
        let coins: Vec<&str> = latest.snapshots.iter().map(|r| r.coin_code.as_str()).collect();
        assert_eq!(coins, vec!["T-5", "T-10", "T-40", "T-64"]);
    }

    #[test]
    fn initialization_loads_recent_history_once() {
        let store = Arc::new(MemoryStore::default());
        let now = at(20_000);
        store.rows.lock().unwrap().extend([
            row("OLD", now - Duration::minutes(21)),
            row("BTC", now - Duration::seconds(30)),
        ]);
        let (_, engine) = engine_with(store.clone());
        assert_eq!(engine.phase(), EnginePhase::Uninitialized);

        engine.get_latest_snapshots_at(6, now).unwrap();
        engine.on_short_tick(now).unwrap();
        engine.get_latest_snapshots_at(6, now).unwrap();

        assert_eq!(engine.phase(), EnginePhase::Ready);
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert_eq!(engine.window_len(), 1);
    }

    #[test]
    fn concurrent_first_callers_share_one_initialization() {
        let store = Arc::new(MemoryStore::default());
        let now = at(25_000);
        store.rows.lock().unwrap().push(row("HIST", now - Duration::seconds(30)));
        store.slow.store(true, Ordering::SeqCst);
        let (clients, engine) = engine_with(store.clone());
        clients.apply_report(btc_miner(Uuid::new_v4(), 1, 0, now));

        const CALLERS: usize = 8;
        let start = Barrier::new(CALLERS);
        let phases: Vec<EnginePhase> = thread::scope(|scope| {
            let handles: Vec<_> = (0..CALLERS)
                .map(|i| {
                    let (engine, start) = (&engine, &start);
                    scope.spawn(move || {
                        start.wait();
                        if i % 2 == 0 {
                            engine.on_short_tick(now).unwrap();
                        } else {
                            let latest = engine.get_latest_snapshots_at(6, now).unwrap();
                            assert!(latest.snapshots.iter().any(|r| r.coin_code == "HIST"));
                        }
                        engine.phase()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(phases.iter().all(|phase| *phase == EnginePhase::Ready));
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        let state = engine.state.lock().unwrap();
        let hist = state.window.iter().filter(|r| r.coin_code == "HIST").count();
        assert_eq!(hist, 1);
        assert_eq!(state.window.len(), 1 + CALLERS / 2);
    }

    #[test]
    fn latest_window_reaches_rows_past_retention_until_evicted() {
        let store = Arc::new(MemoryStore::default());
        let (clients, engine) = engine_with(store);
        let t0 = at(70_000);
        clients.apply_report(btc_miner(Uuid::new_v4(), 1, 0, t0));
        engine.on_short_tick(t0).unwrap();

        // 21 minutes later the row is past retention but no long tick has run.
        let now = t0 + Duration::seconds(1_260);
        assert_eq!(engine.window_len(), 1);
        let latest = engine.get_latest_snapshots_at(130, now).unwrap();
        assert_eq!(latest.snapshots.len(), 1);
        assert_eq!(latest.snapshots[0].timestamp, t0);

        assert!(engine.get_latest_snapshots_at(125, now).unwrap().snapshots.is_empty());
        assert_eq!(engine.get_latest_snapshots_at(u32::MAX, now).unwrap().snapshots.len(), 1);
    }

    #[test]
    fn store_failure_is_reported_and_next_tick_retries() {
        let store = Arc::new(MemoryStore::default());
        let (clients, engine) = engine_with(store.clone());
        let now = at(30_000);
        clients.apply_report(btc_miner(Uuid::new_v4(), 1, 0, now));

        store.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            engine.on_short_tick(now),
            Err(SnapshotError::AggregationIo { .. })
        ));
        assert_eq!(engine.phase(), EnginePhase::Uninitialized);

        store.failing.store(false, Ordering::SeqCst);
        assert_eq!(engine.on_short_tick(now + Duration::seconds(10)).unwrap(), 1);
        assert_eq!(engine.phase(), EnginePhase::Ready);

        store.failing.store(true, Ordering::SeqCst);
        assert!(engine.on_short_tick(now + Duration::seconds(20)).is_err());
        assert_eq!(engine.window_len(), 2);
    }

    #[test]
    fn handlers_on_the_bus_drive_the_engine() {
        let store = Arc::new(MemoryStore::default());
        let (clients, engine) = engine_with(store.clone());
        let engine = Arc::new(engine);
        let bus = MessageBus::new();
        engine.register(&bus);
        engine.register(&bus);
        let now = at(40_000);
        let rig = Uuid::new_v4();
        clients.apply_report(btc_miner(rig, 1, 0, now));

        let report = bus.publish(&ShortTick { timestamp: now });
        assert_eq!(report.delivered, 1);
        assert_eq!(store.inserts.load(Ordering::SeqCst), 1);

        bus.publish(&LongTick {
            timestamp: now + Duration::minutes(25),
        });
        assert_eq!(engine.window_len(), 0);

        store.failing.store(true, Ordering::SeqCst);
        let later = now + Duration::minutes(26);
        clients.apply_report(btc_miner(rig, 2, 0, later));
        let report = bus.publish(&ShortTick { timestamp: later });
        assert_eq!(report.faults.len(), 1);
    }

    #[tokio::test]
    async fn history_reads_go_to_the_store() {
        let store = Arc::new(MemoryStore::default());
        let now = at(60_000);
        store.rows.lock().unwrap().extend([
            row("BTC", now - Duration::hours(2)),
            row("BTC", now - Duration::hours(1)),
        ]);
        let (_, engine) = engine_with(store);

        let rows = engine
            .snapshots_between(now - Duration::hours(3), now - Duration::minutes(90))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(engine.phase(), EnginePhase::Uninitialized);
    }
}
