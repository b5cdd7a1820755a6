//! Integration tests for the on-disk store
//!
//! These tests open real store files in temporary directories to cover what
//! the in-memory unit tests cannot: legacy file relocation, reopening, the
//! separate reader connection and concurrent writers.

use backpack_core::config::StorageConfig;
use backpack_core::notify::StepEvent;
use backpack_core::{
    ActivityKind, ActivitySnapshot, ChangeBus, Config, Coordinates, Database, Error,
    ListenerResult, LocationFilter, LocationFix, WeatherObservation,
};
use chrono::{Local, TimeZone};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use tempfile::TempDir;

fn local_noon(y: i32, m: u32, d: u32) -> i64 {
    Local
        .with_ymd_and_hms(y, m, d, 12, 0, 0)
        .single()
        .unwrap()
        .timestamp_millis()
}

fn config_in(dir: &Path) -> Config {
    Config {
        storage: StorageConfig {
            data_dir: Some(dir.to_path_buf()),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn user_version(path: &Path) -> i32 {
    let conn = rusqlite::Connection::open(path).unwrap();
    conn.query_row("PRAGMA user_version", [], |r| r.get(0)).unwrap()
}

// ============================================
// Open and reopen
// ============================================

#[test]
fn test_reopen_keeps_data_and_skips_migrations() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    let t = local_noon(2024, 4, 2);

    {
        let db = Database::open(&path).unwrap();
        assert!(db.migration_report().created);
        db.update_steps(t, 250).unwrap();
        db.insert_location(
            &LocationFix::new(t, "gps", 51.5, -0.12),
            Some("lunch"),
            ActivitySnapshot::default(),
        )
        .unwrap();
    }

    let db = Database::open(&path).unwrap();
    assert!(db.migration_report().is_noop());
    assert_eq!(db.get_steps_on(t).unwrap(), 250);

    let waypoints = db
        .get_locations(&LocationFilter::between(t, t).waypoints_only())
        .unwrap();
    assert_eq!(waypoints.len(), 1);
    assert_eq!(waypoints[0].name.as_deref(), Some("lunch"));

    let status = db.status().unwrap();
    assert_eq!(status.path.as_deref(), Some(path.as_path()));
    assert_eq!(status.rows["location"], 1);
}

#[test]
fn test_open_with_relocates_legacy_store() {
    let dir = TempDir::new().unwrap();
    let config = config_in(dir.path());
    let legacy = dir.path().join(&config.storage.legacy_database_name);
    let t = local_noon(2023, 11, 20);

    {
        let db = Database::open(&legacy).unwrap();
        db.update_steps(t, 42).unwrap();
    }

    let db = Database::open_with(&config).unwrap();
    assert_eq!(db.path(), Some(config.database_path().as_path()));
    assert_eq!(db.get_steps_on(t).unwrap(), 42);
    assert!(!legacy.exists());
}

#[test]
fn test_newer_store_is_left_untouched() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("future.db");
    {
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA user_version = 99").unwrap();
    }

    match Database::open(&path) {
        Err(Error::UnsupportedVersion { found, .. }) => assert_eq!(found, 99),
        Err(e) => panic!("expected unsupported version, got {e}"),
        Ok(_) => panic!("expected unsupported version"),
    }
    assert_eq!(user_version(&path), 99);
}

#[test]
fn test_failed_upgrade_keeps_old_version() {
    backpack_core::logging::init_test();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.db");
    {
        // Claims version 11 but has no weather table to rebuild
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch("PRAGMA user_version = 11").unwrap();
    }

    match Database::open(&path) {
        Err(Error::MigrationFailure { from, to, .. }) => {
            assert_eq!(from, 11);
            assert_eq!(to, 12);
        }
        Err(e) => panic!("expected migration failure, got {e}"),
        Ok(_) => panic!("expected migration failure"),
    }
    assert_eq!(user_version(&path), 11);
}

// ============================================
// Concurrency
// ============================================

#[test]
fn test_concurrent_writers_keep_one_bucket_per_day() {
    backpack_core::logging::init_test();
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("store.db")).unwrap());
    let t = local_noon(2024, 9, 14);

    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let db = Arc::clone(&db);
            thread::spawn(move || {
                for i in 0..25 {
                    db.update_steps(t + i, 1).unwrap();
                    db.update_activity(t + worker * 1_000_000 + i, ActivityKind::Still, 10)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let steps = db.get_steps(true).unwrap();
    assert_eq!(steps.len(), 1);
    assert_eq!(steps[0].count, 200);

    let durations = db.get_activity_durations(true).unwrap();
    assert_eq!(durations.len(), 1);
    assert_eq!(durations[0].still, 2_000);
}

#[test]
fn test_listener_reads_committed_state_through_reader() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(Database::open(&dir.path().join("store.db")).unwrap());
    let seen = Arc::new(Mutex::new(Vec::new()));

    let reader = Arc::clone(&db);
    let sink = Arc::clone(&seen);
    db.bus()
        .steps()
        .subscribe(Arc::new(move |event: &StepEvent| -> ListenerResult {
            if let StepEvent::Updated { day, .. } | StepEvent::Added { day, .. } = event {
                sink.lock().unwrap().push(reader.get_steps_on(*day)?);
            }
            Ok(())
        }));

    let t = local_noon(2024, 9, 15);
    db.update_steps(t, 5).unwrap();
    db.update_steps(t, 6).unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![5, 11]);
}

#[test]
fn test_stores_can_share_a_bus() {
    let dir = TempDir::new().unwrap();
    let bus = Arc::new(ChangeBus::new());
    let storage = StorageConfig::default();
    let a = Database::open_with_bus(&dir.path().join("a.db"), &storage, Arc::clone(&bus)).unwrap();
    let b = Database::open_with_bus(&dir.path().join("b.db"), &storage, Arc::clone(&bus)).unwrap();

    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    bus.steps()
        .subscribe(Arc::new(move |_: &StepEvent| -> ListenerResult {
            *sink.lock().unwrap() += 1;
            Ok(())
        }));

    let t = local_noon(2024, 1, 8);
    a.update_steps(t, 1).unwrap();
    b.update_steps(t, 1).unwrap();

    assert_eq!(*count.lock().unwrap(), 2);
    assert_eq!(a.get_steps_on(t).unwrap(), 1);
}

// ============================================
// Write semantics end to end
// ============================================

#[test]
fn test_delete_of_missing_location_reports_but_notifies() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("store.db")).unwrap();
    let deleted = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&deleted);
    db.bus().locations().subscribe(Arc::new(
        move |event: &backpack_core::notify::LocationEvent| -> ListenerResult {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        },
    ));

    let err = db.delete_location(7).unwrap_err();
    assert!(err.is_write_failure());
    assert_eq!(deleted.lock().unwrap().len(), 1);
}

#[test]
fn test_weather_dedupe_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("store.db");
    let observation = WeatherObservation {
        time: 1_700_000_000_000,
        station_id: 3772,
        station_type: 2,
        station_name: None,
        station_location: Coordinates::new(51.47, -0.45),
        temperature: Some(9.0),
        humidity: None,
        pressure: None,
        wind_speed: Some(4.1),
        wind_direction: Some(230.0),
    };
    let observer = Coordinates::new(51.5, -0.12);

    {
        let db = Database::open(&path).unwrap();
        assert!(db.insert_weather(&observation, observer).unwrap());
    }

    let db = Database::open(&path).unwrap();
    assert!(!db.insert_weather(&observation, observer).unwrap());
    let rows = db.get_weather(false).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].station_name, None);
    assert_eq!(rows[0].wind_direction, Some(230.0));
}

#[test]
fn test_vacuum_on_disk() {
    let dir = TempDir::new().unwrap();
    let db = Database::open(&dir.path().join("store.db")).unwrap();
    for i in 0..200 {
        db.insert_location(
            &LocationFix::new(i, "network", 0.0, 0.0),
            None,
            ActivitySnapshot::default(),
        )
        .unwrap();
    }
    assert_eq!(db.delete_locations(0, 199).unwrap(), 200);

    db.vacuum().unwrap();
    assert_eq!(db.status().unwrap().rows["location"], 0);
}
