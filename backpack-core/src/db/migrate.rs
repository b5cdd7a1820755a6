//! Schema upgrades
//!
//! Versions are tracked with `PRAGMA user_version`. An upgrade from version
//! `n` applies `upgrade_k` for every `k` in `n+1..=SCHEMA_VERSION`, in order,
//! inside one immediate transaction. Any failure rolls the whole upgrade
//! back and leaves the store at `n`.
//!
//! A store at version 0 is new and gets the current schema directly.

use super::schema::{self, get_schema_version, set_schema_version, Table, SCHEMA_VERSION};
use crate::error::{Error, Result};
use crate::types::local_utc_offset_ms;
use rusqlite::{Connection, TransactionBehavior};

struct Upgrade {
    version: i32,
    description: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

/// Upgrade steps, indexed by the version they produce
const UPGRADES: &[Upgrade] = &[
    Upgrade {
        version: 2,
        description: "add activity table",
        apply: upgrade_2,
    },
    Upgrade {
        version: 3,
        description: "add step table",
        apply: upgrade_3,
    },
    Upgrade {
        version: 4,
        description: "add activity snapshot columns to location",
        apply: upgrade_4,
    },
    Upgrade {
        version: 5,
        description: "move step buckets to local midnight",
        apply: upgrade_5,
    },
    Upgrade {
        version: 6,
        description: "no schema change",
        apply: upgrade_6,
    },
    Upgrade {
        version: 7,
        description: "add activityduration table",
        apply: upgrade_7,
    },
    Upgrade {
        version: 8,
        description: "rename activity, fold on-foot durations into walking",
        apply: upgrade_8,
    },
    Upgrade {
        version: 9,
        description: "add activitylog table",
        apply: upgrade_9,
    },
    Upgrade {
        version: 10,
        description: "add weather table",
        apply: upgrade_10,
    },
    Upgrade {
        version: 11,
        description: "split weather station and observer location",
        apply: upgrade_11,
    },
    Upgrade {
        version: 12,
        description: "rebuild weather in final column order",
        apply: upgrade_12,
    },
];

/// What [`run_migrations`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Version found in the store
    pub from: i32,
    /// Version stamped after the run
    pub to: i32,
    /// True when the store was new and created at the current version
    pub created: bool,
    /// Versions whose upgrade step ran, in order
    pub applied: Vec<i32>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        !self.created && self.applied.is_empty()
    }
}

/// Bring the store to [`SCHEMA_VERSION`].
pub fn run_migrations(conn: &mut Connection) -> Result<MigrationReport> {
    migrate_to(conn, SCHEMA_VERSION)
}

/// Bring the store to `target`.
///
/// Targets below the current version build historical stores, which is how
/// the upgrade path is exercised in tests.
pub(crate) fn migrate_to(conn: &mut Connection, target: i32) -> Result<MigrationReport> {
    let current_version = get_schema_version(conn)?;
    let _span = tracing::info_span!("migrate", from = current_version, to = target).entered();

    tracing::info!("Checking database migrations");

    if current_version > SCHEMA_VERSION {
        return Err(Error::UnsupportedVersion {
            found: current_version,
            supported: SCHEMA_VERSION,
        });
    }

    let mut report = MigrationReport {
        from: current_version,
        to: current_version,
        created: false,
        applied: Vec::new(),
    };
    if current_version >= target {
        return Ok(report);
    }

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let mut version = current_version;
    if version == 0 {
        if target == SCHEMA_VERSION {
            tracing::info!(version = SCHEMA_VERSION, "Creating database");
            schema::create_all(&tx)?;
            report.created = true;
            version = SCHEMA_VERSION;
        } else {
            create_baseline(&tx)?;
            version = 1;
        }
    }

    for upgrade in UPGRADES
        .iter()
        .filter(|u| u.version > version && u.version <= target)
    {
        tracing::info!(
            version = upgrade.version,
            step = upgrade.description,
            "Running migration"
        );
        if let Err(e) = (upgrade.apply)(&tx) {
            tracing::error!(
                from = current_version,
                version = upgrade.version,
                error = %e,
                "Migration failed, rolling back"
            );
            return Err(Error::MigrationFailure {
                from: current_version,
                to: upgrade.version,
                step: upgrade.description,
                source: Box::new(e),
            });
        }
        report.applied.push(upgrade.version);
    }

    set_schema_version(&tx, target)?;
    tx.commit()?;
    report.to = target;

    tracing::info!(
        from = current_version,
        to = target,
        created = report.created,
        "Migrations complete"
    );

    Ok(report)
}

// ============================================
// Historical tables
// ============================================

const V1_LOCATION: &str = r#"
    CREATE TABLE location (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        time INTEGER NOT NULL,
        provider INTEGER NOT NULL,
        latitude REAL NOT NULL,
        longitude REAL NOT NULL,
        altitude REAL NULL,
        speed REAL NULL,
        bearing REAL NULL,
        accuracy REAL NULL,
        name TEXT
    );
    CREATE INDEX idx_location_time ON location(time);
    CREATE INDEX idx_location_name ON location(name);
"#;

const V2_ACTIVITY: &str = r#"
    CREATE TABLE activity (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        time INTEGER NOT NULL,
        activity INTEGER NOT NULL,
        confidence INTEGER NOT NULL
    );
    CREATE INDEX idx_activity_time ON activity(time);
"#;

// ON_FOOT and WALKING were counted separately until version 8
const V7_ACTIVITYDURATION: &str = r#"
    CREATE TABLE activityduration (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        time INTEGER NOT NULL,
        still INTEGER NOT NULL,
        onfoot INTEGER NOT NULL,
        walking INTEGER NOT NULL,
        running INTEGER NOT NULL,
        onbicycle INTEGER NOT NULL,
        invehicle INTEGER NOT NULL,
        unknown INTEGER NOT NULL
    );
    CREATE INDEX idx_activityduration_time ON activityduration(time);
"#;

// latitude/longitude held the station position until version 11
const V10_WEATHER: &str = r#"
    CREATE TABLE weather (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        time INTEGER NOT NULL,
        station_id INTEGER NOT NULL,
        station_type INTEGER NOT NULL,
        station_name TEXT NULL,
        latitude REAL NULL,
        longitude REAL NULL,
        distance REAL NULL,
        temperature REAL NULL,
        humidity REAL NULL,
        pressure REAL NULL,
        wind_speed REAL NULL,
        wind_direction REAL NULL,
        created INTEGER NULL
    );
    CREATE INDEX idx_weather_time ON weather(time);
    CREATE INDEX idx_weather_station_id ON weather(station_id);
"#;

const WEATHER_COLUMNS: &str = "ID, time, station_id, station_type, station_name, \
     station_latitude, station_longitude, latitude, longitude, \
     temperature, humidity, pressure, wind_speed, wind_direction, created";

fn create_baseline(conn: &Connection) -> Result<()> {
    tracing::info!(version = 1, "Creating baseline schema");
    schema::create_raw(
        conn,
        "location",
        &["idx_location_time", "idx_location_name"],
        V1_LOCATION,
    )
}

fn column_names(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
    let names = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(names)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    Ok(column_names(conn, table)?.iter().any(|c| c == column))
}

/// Returns true if the column was added.
fn add_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<bool> {
    if has_column(conn, table, column)? {
        tracing::debug!(table, column, "Column already present, skipping");
        return Ok(false);
    }
    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl}"))?;
    Ok(true)
}

// ============================================
// Upgrade steps
// ============================================

fn upgrade_2(conn: &Connection) -> Result<()> {
    schema::create_raw(conn, "activity", &["idx_activity_time"], V2_ACTIVITY)
}

fn upgrade_3(conn: &Connection) -> Result<()> {
    schema::create_table(conn, Table::Step)
}

fn upgrade_4(conn: &Connection) -> Result<()> {
    add_column(conn, "location", "activity_type", "INTEGER NULL")?;
    add_column(conn, "location", "activity_confidence", "INTEGER NULL")?;
    add_column(conn, "location", "stepcount", "INTEGER NULL")?;
    Ok(())
}

/// Version 4 keyed step buckets by UTC midnight.
fn upgrade_5(conn: &Connection) -> Result<()> {
    let offset = local_utc_offset_ms();
    let moved = conn.execute("UPDATE step SET time = time - ?1", [offset])?;
    tracing::info!(offset_ms = offset, rows = moved, "Shifted step buckets");
    Ok(())
}

fn upgrade_6(_conn: &Connection) -> Result<()> {
    Ok(())
}

fn upgrade_7(conn: &Connection) -> Result<()> {
    schema::create_raw(
        conn,
        "activityduration",
        &["idx_activityduration_time"],
        V7_ACTIVITYDURATION,
    )
}

fn upgrade_8(conn: &Connection) -> Result<()> {
    if schema::object_exists(conn, "table", "activity")? {
        schema::create_table(conn, Table::ActivityType)?;
        conn.execute_batch(
            r#"
            INSERT INTO activitytype (ID, time, activity, confidence)
                SELECT ID, time, activity, confidence FROM activity;
            DROP TABLE activity;
            "#,
        )?;
    }

    if has_column(conn, "activityduration", "onfoot")? {
        conn.execute_batch(
            r#"
            ALTER TABLE activityduration RENAME TO activityduration_orig;
            DROP INDEX idx_activityduration_time;
            "#,
        )?;
        schema::create_table(conn, Table::ActivityDuration)?;
        conn.execute_batch(
            r#"
            INSERT INTO activityduration (ID, time, still, walking, running, onbicycle, invehicle, unknown)
                SELECT ID, time, still, onfoot + walking, running, onbicycle, invehicle, unknown
                FROM activityduration_orig;
            DROP TABLE activityduration_orig;
            "#,
        )?;
    }
    Ok(())
}

fn upgrade_9(conn: &Connection) -> Result<()> {
    schema::create_table(conn, Table::ActivityLog)
}

fn upgrade_10(conn: &Connection) -> Result<()> {
    schema::create_raw(
        conn,
        "weather",
        &["idx_weather_time", "idx_weather_station_id"],
        V10_WEATHER,
    )
}

fn upgrade_11(conn: &Connection) -> Result<()> {
    let added_lat = add_column(conn, "weather", "station_latitude", "REAL NULL")?;
    let added_lon = add_column(conn, "weather", "station_longitude", "REAL NULL")?;
    if added_lat && added_lon {
        conn.execute_batch(
            r#"
            UPDATE weather SET
                station_latitude = latitude,
                station_longitude = longitude,
                latitude = NULL,
                longitude = NULL;
            "#,
        )?;
    }
    Ok(())
}

fn upgrade_12(conn: &Connection) -> Result<()> {
    let expected: Vec<&str> = WEATHER_COLUMNS.split(',').map(str::trim).collect();
    if column_names(conn, "weather")? == expected {
        return Ok(());
    }

    conn.execute_batch(
        r#"
        ALTER TABLE weather RENAME TO weather_orig;
        DROP INDEX idx_weather_time;
        DROP INDEX idx_weather_station_id;
        "#,
    )?;
    schema::create_table(conn, Table::Weather)?;
    conn.execute_batch(&format!(
        "INSERT INTO weather ({WEATHER_COLUMNS}) SELECT {WEATHER_COLUMNS} FROM weather_orig; \
         DROP TABLE weather_orig;"
    ))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::params;

    fn store_at(version: i32) -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate_to(&mut conn, version).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), version);
        conn
    }

    fn fresh_shape() -> schema::SchemaShape {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();
        schema::describe(&conn).unwrap()
    }

    #[test]
    fn test_upgrade_chain_is_contiguous() {
        let versions: Vec<i32> = UPGRADES.iter().map(|u| u.version).collect();
        let expected: Vec<i32> = (2..=SCHEMA_VERSION).collect();
        assert_eq!(versions, expected);
    }

    #[test]
    fn test_migrations_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();

        let first = run_migrations(&mut conn).unwrap();
        assert!(first.created);
        assert_eq!(first.to, SCHEMA_VERSION);

        let second = run_migrations(&mut conn).unwrap();
        assert!(second.is_noop());
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_every_single_step_upgrade_matches_fresh_schema() {
        let fresh = fresh_shape();

        let mut conn = store_at(1);
        for version in 2..=SCHEMA_VERSION {
            let report = migrate_to(&mut conn, version).unwrap();
            assert_eq!(report.applied, vec![version]);
        }
        assert_eq!(schema::describe(&conn).unwrap(), fresh);
    }

    #[test]
    fn test_upgrade_from_any_version_matches_fresh_schema() {
        let fresh = fresh_shape();
        for start in 1..SCHEMA_VERSION {
            let mut conn = store_at(start);
            let report = run_migrations(&mut conn).unwrap();
            assert_eq!(report.from, start);
            assert_eq!(report.applied.len() as i32, SCHEMA_VERSION - start);
            assert_eq!(
                schema::describe(&conn).unwrap(),
                fresh,
                "schema after upgrade from {} differs",
                start
            );
        }
    }

    #[test]
    fn test_version_one_store_from_device_matches_fresh_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE location ( ID INTEGER PRIMARY KEY AUTOINCREMENT\
             , time INTEGER NOT NULL, provider INTEGER NOT NULL\
             , latitude REAL NOT NULL, longitude REAL NOT NULL\
             , altitude REAL NULL, speed REAL NULL, bearing REAL NULL\
             , accuracy REAL NULL, name TEXT);\
             CREATE INDEX idx_location_time ON location(time);\
             CREATE INDEX idx_location_name ON location(name);\
             PRAGMA user_version = 1;",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO location (time, provider, latitude, longitude) VALUES (1, 'network', 0, 0)",
            [],
        )
        .unwrap();

        let report = run_migrations(&mut conn).unwrap();
        assert_eq!(report.from, 1);
        assert_eq!(schema::describe(&conn).unwrap(), fresh_shape());

        let provider: String = conn
            .query_row("SELECT provider FROM location", [], |r| r.get(0))
            .unwrap();
        assert_eq!(provider, "network");
    }

    #[test]
    fn test_location_rows_survive_snapshot_columns() {
        let mut conn = store_at(1);
        conn.execute(
            "INSERT INTO location (time, provider, latitude, longitude, name) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![1_000, "gps", 52.1, 4.3, "home"],
        )
        .unwrap();

        run_migrations(&mut conn).unwrap();

        let (name, activity_type): (Option<String>, Option<i32>) = conn
            .query_row(
                "SELECT name, activity_type FROM location WHERE time = 1000",
                [],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .unwrap();
        assert_eq!(name.as_deref(), Some("home"));
        assert_eq!(activity_type, None);
    }

    #[test]
    fn test_step_buckets_shift_to_local_midnight() {
        let mut conn = store_at(4);
        conn.execute("INSERT INTO step (time, count) VALUES (?1, ?2)", params![86_400_000i64, 12])
            .unwrap();

        migrate_to(&mut conn, 5).unwrap();

        let time: i64 = conn
            .query_row("SELECT time FROM step", [], |r| r.get(0))
            .unwrap();
        assert_eq!(time, 86_400_000 - local_utc_offset_ms());
    }

    #[test]
    fn test_activity_rows_move_and_on_foot_folds_into_walking() {
        let mut conn = store_at(7);
        conn.execute(
            "INSERT INTO activity (time, activity, confidence) VALUES (?1, ?2, ?3)",
            params![5_000, 7, 90],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO activityduration (time, still, onfoot, walking, running, onbicycle, invehicle, unknown)
             VALUES (?1, 1, 200, 300, 4, 5, 6, 7)",
            params![0],
        )
        .unwrap();

        migrate_to(&mut conn, 8).unwrap();

        assert!(!schema::object_exists(&conn, "table", "activity").unwrap());
        assert!(!schema::object_exists(&conn, "index", "idx_activity_time").unwrap());
        let confidence: i32 = conn
            .query_row("SELECT confidence FROM activitytype WHERE time = 5000", [], |r| r.get(0))
            .unwrap();
        assert_eq!(confidence, 90);

        let (still, walking, unknown): (i64, i64, i64) = conn
            .query_row("SELECT still, walking, unknown FROM activityduration", [], |r| {
                Ok((r.get(0)?, r.get(1)?, r.get(2)?))
            })
            .unwrap();
        assert_eq!((still, walking, unknown), (1, 500, 7));
        assert!(!has_column(&conn, "activityduration", "onfoot").unwrap());
    }

    #[test]
    fn test_weather_station_location_is_backfilled_and_preserved() {
        let mut conn = store_at(10);
        conn.execute(
            "INSERT INTO weather (time, station_id, station_type, station_name, latitude, longitude, distance, temperature, created)
             VALUES (?1, ?2, 1, 'Schiphol', 52.3, 4.76, 12.5, 18.5, ?3)",
            params![9_000, 6240, 9_500],
        )
        .unwrap();

        // Jump straight to the current version
        run_migrations(&mut conn).unwrap();

        let row: (Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<f64>, Option<i64>) = conn
            .query_row(
                "SELECT station_latitude, station_longitude, latitude, longitude, temperature, created
                 FROM weather WHERE station_id = 6240",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?)),
            )
            .unwrap();
        assert_eq!(row, (Some(52.3), Some(4.76), None, None, Some(18.5), Some(9_500)));
        assert!(!has_column(&conn, "weather", "distance").unwrap());
        assert!(!schema::object_exists(&conn, "table", "weather_orig").unwrap());
    }

    #[test]
    fn test_failed_upgrade_rolls_back_to_prior_version() {
        let mut conn = store_at(7);
        conn.execute(
            "INSERT INTO activity (time, activity, confidence) VALUES (1, 3, 50)",
            [],
        )
        .unwrap();
        // A stray table in the way of the version 8 rename
        conn.execute_batch("CREATE TABLE activitytype (x INTEGER)").unwrap();

        match run_migrations(&mut conn) {
            Err(Error::MigrationFailure { from, to, source, .. }) => {
                assert_eq!(from, 7);
                assert_eq!(to, 8);
                assert!(matches!(*source, Error::SchemaConflict { .. }));
            }
            other => panic!("expected migration failure, got {:?}", other),
        }

        assert_eq!(get_schema_version(&conn).unwrap(), 7);
        assert!(schema::object_exists(&conn, "table", "activity").unwrap());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM activity", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_newer_store_is_refused() {
        let mut conn = Connection::open_in_memory().unwrap();
        set_schema_version(&conn, SCHEMA_VERSION + 1).unwrap();

        match run_migrations(&mut conn) {
            Err(Error::UnsupportedVersion { found, supported }) => {
                assert_eq!(found, SCHEMA_VERSION + 1);
                assert_eq!(supported, SCHEMA_VERSION);
            }
            other => panic!("expected unsupported version, got {:?}", other),
        }
    }

    #[test]
    fn test_fresh_create_over_existing_tables_conflicts() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE step (ID INTEGER PRIMARY KEY)").unwrap();

        let err = run_migrations(&mut conn).unwrap_err();
        assert!(matches!(err, Error::SchemaConflict { .. }));
        assert_eq!(get_schema_version(&conn).unwrap(), 0);
    }
}
