use std::{sync::Arc, time::Duration as StdDuration};

use chrono::{Duration, Utc};
use minerfleet::{
    bus::{ProfilePropertyChanged, SetProfilePropertyCommand},
    profile::{LocalStore, MinerProfileField, ProfileStore, ProfileValue},
    ClientRecord, FleetConfig, FleetContext, MinerSession,
};
use uuid::Uuid;

fn fast_config(dir: &tempfile::TempDir) -> FleetConfig {
    FleetConfig {
        database_path: dir.path().join("fleet.sqlite3"),
        short_tick_secs: 1,
        long_tick_secs: 60,
        read_guard_secs: 0,
        ..FleetConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ticking_context_captures_connected_rigs() {
    let dir = tempfile::tempdir().unwrap();
    let context = FleetContext::init(fast_config(&dir)).unwrap();
    let database = context.database().clone();
    let hub = Arc::clone(context.hub());
    let rig = Uuid::new_v4();
    let started = Utc::now();

    hub.on_connected(MinerSession::new(rig, "ws-1".into(), "rig-01", started))
        .unwrap();
    hub.on_handshake(&"ws-1".into(), started).unwrap();
    hub.on_heartbeat(
        &"ws-1".into(),
        ClientRecord {
            main_coin_code: "ETC".into(),
            is_mining: true,
            main_coin_speed: 42.0,
            ..ClientRecord::default()
        },
        Utc::now(),
    )
    .unwrap();

    tokio::time::sleep(StdDuration::from_millis(2_500)).await;

    let latest = context.snapshots().get_latest_snapshots(5).unwrap();
    assert!(!latest.snapshots.is_empty());
    assert!(latest.snapshots.iter().all(|row| row.coin_code == "ETC"));
    assert!(latest
        .snapshots
        .windows(2)
        .all(|pair| pair[0].timestamp >= pair[1].timestamp));
    assert_eq!(latest.totals.mining_count, 1);
    assert_eq!(latest.totals.online_count, 1);

    context.shutdown().await.unwrap();

    let stored = database
        .coin_snapshots_between(started - Duration::minutes(1), Utc::now())
        .await
        .unwrap();
    assert!(!stored.is_empty());
    assert!(stored.iter().all(|row| row.speed == 42.0));
}

#[tokio::test]
async fn profile_commands_flow_through_the_context_bus() {
    let dir = tempfile::tempdir().unwrap();
    let mut context = FleetContext::init(fast_config(&dir)).unwrap();
    let store = Arc::new(LocalStore::open(dir.path().join("miner.json")).unwrap());
    context.attach_profile_store(store.clone());

    let changes = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    context.bus().register_handler::<ProfilePropertyChanged, _>(
        minerfleet::HandlerId::Extension(1),
        "collect profile changes",
        move |event| {
            sink.lock().unwrap().push(event.field);
            Ok(())
        },
    );

    let report = context.bus().publish(&SetProfilePropertyCommand {
        field: MinerProfileField::MinerName,
        value: ProfileValue::Text("rig-west-3".into()),
    });

    assert!(report.faults.is_empty());
    assert_eq!(store.load().unwrap().miner_name, "rig-west-3");
    assert_eq!(*changes.lock().unwrap(), vec![MinerProfileField::MinerName]);
    assert!(context.profiles().is_some());

    context.shutdown().await.unwrap();
}

#[tokio::test]
async fn out_of_range_config_is_refused_at_init() {
    let dir = tempfile::tempdir().unwrap();
    let config = FleetConfig {
        retention_minutes: i64::MAX,
        ..fast_config(&dir)
    };
    assert!(FleetContext::init(config).is_err());
}

#[tokio::test]
async fn handlers_are_registered_once_per_context() {
    let dir = tempfile::tempdir().unwrap();
    let context = FleetContext::init(fast_config(&dir)).unwrap();

    let mut ids: Vec<String> = context
        .bus()
        .registrations()
        .into_iter()
        .map(|info| format!("{:?}/{}", info.id, info.message))
        .collect();
    ids.sort();

    assert_eq!(
        ids,
        vec![
            "CaptureCoinSnapshots/short-tick",
            "EvictExpiredSnapshots/long-tick",
            "LogFleetActivity/client-activated",
            "LogFleetActivity/client-disconnected",
            "SweepStaleSessions/long-tick",
        ]
    );

    context.shutdown().await.unwrap();
}
