//! Database repository layer
//!
//! Provides the insert, update, delete and query operations for every
//! entity, plus day-bucket aggregation and activity-log interval merging.
//!
//! Every write takes the writer lock, runs in an immediate transaction and
//! commits before any listener is notified. Reads on a file-backed store go
//! through a separate read-only connection inside a deferred transaction,
//! so they see one committed snapshot and never wait on a writer.

use super::migrate::{run_migrations, MigrationReport};
use super::schema::{get_schema_version, Table};
use crate::config::{Config, StorageConfig};
use crate::error::{Error, Result};
use crate::notify::{
    ActivityDurationEvent, ActivityLogEvent, ActivityTypeEvent, ChangeBus, LocationEvent,
    StepEvent, WeatherEvent,
};
use crate::types::*;
use rusqlite::types::ValueRef;
use rusqlite::{
    params, Connection, OpenFlags, OptionalExtension, Row, Transaction, TransactionBehavior,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Filter for [`Database::get_locations`].
///
/// Both flags set, or both cleared, means no name filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationFilter {
    /// Inclusive lower bound on `time`
    pub from: i64,
    /// Inclusive upper bound on `time`
    pub to: i64,
    /// Include samples without a name
    pub trackpoints: bool,
    /// Include samples with a name
    pub waypoints: bool,
    pub ascending: bool,
}

impl LocationFilter {
    /// Everything in `[from, to]`, oldest first
    pub fn between(from: i64, to: i64) -> Self {
        Self {
            from,
            to,
            trackpoints: true,
            waypoints: true,
            ascending: true,
        }
    }

    pub fn trackpoints_only(mut self) -> Self {
        self.trackpoints = true;
        self.waypoints = false;
        self
    }

    pub fn waypoints_only(mut self) -> Self {
        self.trackpoints = false;
        self.waypoints = true;
        self
    }

    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }
}

/// Snapshot of the store for maintenance tooling.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    /// `None` for in-memory stores
    pub path: Option<PathBuf>,
    pub schema_version: i32,
    /// Row count per table
    pub rows: BTreeMap<String, i64>,
    /// page_count * page_size
    pub size_bytes: u64,
    /// Listener failures since the store was opened
    pub listener_failures: u64,
}

/// Database handle: one writer connection, plus a reader for file stores
pub struct Database {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    bus: Arc<ChangeBus>,
    path: Option<PathBuf>,
    migration: MigrationReport,
}

impl Database {
    /// Open or create a store at the given path with default settings.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_bus(path, &StorageConfig::default(), Arc::new(ChangeBus::new()))
    }

    /// Open the store described by `config`, relocating a legacy store
    /// file first if one is found.
    pub fn open_with(config: &Config) -> Result<Self> {
        let dir = config.storage_dir();
        std::fs::create_dir_all(&dir)?;
        super::relocate_legacy(
            &dir,
            &config.storage.legacy_database_name,
            &config.storage.database_name,
        )?;
        Self::open_with_bus(
            &config.database_path(),
            &config.storage,
            Arc::new(ChangeBus::new()),
        )
    }

    /// Open or create a store that publishes on `bus`.
    ///
    /// Migrations run before this returns; a failed upgrade leaves the file
    /// at its old version and returns the error.
    pub fn open_with_bus(
        path: &Path,
        storage: &StorageConfig,
        bus: Arc<ChangeBus>,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let busy_timeout = Duration::from_millis(storage.busy_timeout_ms);

        let mut writer = Connection::open(path)?;
        writer.busy_timeout(busy_timeout)?;
        writer.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        let migration = run_migrations(&mut writer)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(busy_timeout)?;

        tracing::info!(
            path = %path.display(),
            schema_version = migration.to,
            created = migration.created,
            "Store opened"
        );

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            bus,
            path: Some(path.to_path_buf()),
            migration,
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        let migration = run_migrations(&mut conn)?;
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
            bus: Arc::new(ChangeBus::new()),
            path: None,
            migration,
        })
    }

    /// Notification channels of this store
    pub fn bus(&self) -> &Arc<ChangeBus> {
        &self.bus
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// What the open-time migration run did
    pub fn migration_report(&self) -> &MigrationReport {
        &self.migration
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer.lock().map_err(|_| Error::LockPoisoned("writer"))
    }

    /// Run `f` in an immediate transaction under the writer lock.
    ///
    /// The transaction commits only if `f` succeeds; the lock is released
    /// before this returns.
    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock_writer()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        match &self.reader {
            Some(reader) => {
                let mut conn = reader.lock().map_err(|_| Error::LockPoisoned("reader"))?;
                let tx = conn.transaction_with_behavior(TransactionBehavior::Deferred)?;
                let out = f(&tx)?;
                tx.commit()?;
                Ok(out)
            }
            None => {
                let conn = self.lock_writer()?;
                f(&conn)
            }
        }
    }

    // ============================================
    // Location operations
    // ============================================

    /// Append a location sample. Returns the new row id.
    ///
    /// `name` makes the sample a waypoint. Negative snapshot values are
    /// stored as NULL.
    pub fn insert_location(
        &self,
        fix: &LocationFix,
        name: Option<&str>,
        snapshot: ActivitySnapshot,
    ) -> Result<i64> {
        let id = self.write(|tx| {
            let affected = tx.execute(
                r#"
                INSERT INTO location (time, provider, latitude, longitude, altitude, speed,
                                      bearing, accuracy, name, activity_type,
                                      activity_confidence, stepcount)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    fix.time,
                    fix.provider,
                    fix.latitude,
                    fix.longitude,
                    finite(fix.altitude),
                    finite32(fix.speed),
                    finite32(fix.bearing),
                    finite32(fix.accuracy),
                    name,
                    snapshot.activity_type(),
                    snapshot.confidence(),
                    snapshot.step_count(),
                ],
            )?;
            check_rows("insert_location", 1, affected)?;
            Ok(tx.last_insert_rowid())
        })?;

        tracing::debug!(id, time = fix.time, waypoint = name.is_some(), "Location added");
        self.bus.locations().publish(&LocationEvent::Added {
            id,
            fix: fix.clone(),
        });
        Ok(id)
    }

    /// Rename a waypoint (or turn a trackpoint into one).
    pub fn update_location_name(&self, id: i64, name: &str) -> Result<()> {
        let affected = self.write(|tx| {
            Ok(tx.execute(
                "UPDATE location SET name = ?1 WHERE ID = ?2",
                params![name, id],
            )?)
        })?;
        self.bus.locations().publish(&LocationEvent::Updated { id });
        check_rows("update_location_name", 1, affected)
    }

    pub fn update_location_altitude(&self, id: i64, altitude: f64) -> Result<()> {
        let affected = self.write(|tx| {
            Ok(tx.execute(
                "UPDATE location SET altitude = ?1 WHERE ID = ?2",
                params![finite(Some(altitude)), id],
            )?)
        })?;
        self.bus.locations().publish(&LocationEvent::Updated { id });
        check_rows("update_location_altitude", 1, affected)
    }

    /// Delete one sample.
    ///
    /// Listeners hear `Deleted` even when no row matched; the caller gets
    /// [`Error::WriteFailure`] in that case.
    pub fn delete_location(&self, id: i64) -> Result<()> {
        let affected =
            self.write(|tx| Ok(tx.execute("DELETE FROM location WHERE ID = ?1", [id])?))?;
        self.bus.locations().publish(&LocationEvent::Deleted { id });
        check_rows("delete_location", 1, affected)
    }

    /// Delete samples with `from <= time <= to`. Returns how many went.
    pub fn delete_locations(&self, from: i64, to: i64) -> Result<usize> {
        let deleted = self.write(|tx| {
            Ok(tx.execute(
                "DELETE FROM location WHERE time >= ?1 AND time <= ?2",
                params![from, to],
            )?)
        })?;
        tracing::info!(from, to, deleted, "Location range deleted");
        self.bus
            .locations()
            .publish(&LocationEvent::RangeDeleted { from, to });
        Ok(deleted)
    }

    pub fn get_locations(&self, filter: &LocationFilter) -> Result<Vec<LocationRecord>> {
        let mut sql = String::from("SELECT * FROM location WHERE time >= ?1 AND time <= ?2");
        match (filter.trackpoints, filter.waypoints) {
            (true, false) => sql.push_str(" AND name IS NULL"),
            (false, true) => sql.push_str(" AND name IS NOT NULL"),
            _ => {}
        }
        sql.push_str(&order_by("time", filter.ascending));

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let locations = stmt
                .query_map(params![filter.from, filter.to], Self::row_to_location)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(locations)
        })
    }

    fn row_to_location(row: &Row) -> rusqlite::Result<LocationRecord> {
        Ok(LocationRecord {
            id: row.get("ID")?,
            time: row.get("time")?,
            provider: provider_name(row)?,
            latitude: row.get("latitude")?,
            longitude: row.get("longitude")?,
            altitude: row.get("altitude")?,
            speed: row.get("speed")?,
            bearing: row.get("bearing")?,
            accuracy: row.get("accuracy")?,
            name: row.get("name")?,
            activity_type: row.get("activity_type")?,
            activity_confidence: row.get("activity_confidence")?,
            step_count: row.get("stepcount")?,
        })
    }

    // ============================================
    // Activity type operations
    // ============================================

    /// Record one classifier callback.
    pub fn insert_activity_type(
        &self,
        time: i64,
        activity: ActivityKind,
        confidence: i32,
    ) -> Result<i64> {
        let id = self.write(|tx| {
            let affected = tx.execute(
                "INSERT INTO activitytype (time, activity, confidence) VALUES (?1, ?2, ?3)",
                params![time, activity.code(), confidence],
            )?;
            check_rows("insert_activity_type", 1, affected)?;
            Ok(tx.last_insert_rowid())
        })?;

        self.bus.activity_types().publish(&ActivityTypeEvent::Added {
            time,
            activity,
            confidence,
        });
        Ok(id)
    }

    /// Remove every classifier sample. Returns how many went.
    pub fn delete_activity_types(&self) -> Result<usize> {
        let deleted = self.write(|tx| Ok(tx.execute("DELETE FROM activitytype", [])?))?;
        tracing::info!(deleted, "Activity types cleared");
        self.bus.activity_types().publish(&ActivityTypeEvent::Cleared);
        Ok(deleted)
    }

    /// Classifier samples in `[from, to]`, newest first
    pub fn get_activity_types(&self, from: i64, to: i64) -> Result<Vec<ActivityTypeRecord>> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM activitytype WHERE time >= ?1 AND time <= ?2 ORDER BY time DESC, ID DESC",
            )?;
            let rows = stmt
                .query_map(params![from, to], |row| {
                    Ok(ActivityTypeRecord {
                        id: row.get("ID")?,
                        time: row.get("time")?,
                        activity: ActivityKind::from_code(row.get("activity")?),
                        confidence: row.get("confidence")?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ============================================
    // Activity duration and log operations
    // ============================================

    /// Account `duration_ms` of `activity` starting at `time`.
    ///
    /// Adds the duration to the day bucket for `time` (creating the bucket
    /// at zero if the day has none) and extends the open log interval that
    /// ends at `time` for the same activity, or starts a new one.
    pub fn update_activity(
        &self,
        time: i64,
        activity: ActivityKind,
        duration_ms: i64,
    ) -> Result<ActivityUpdate> {
        let day = day_start(time);
        let column = activity.duration_column();

        let update = self.write(|tx| {
            let (bucket, total) = Self::accrue_duration(tx, day, column, duration_ms)?;
            let (interval, extended) = Self::extend_log(tx, time, activity, duration_ms)?;
            Ok(ActivityUpdate {
                day,
                column,
                bucket,
                total,
                interval,
                extended,
            })
        })?;

        match update.bucket {
            BucketChange::Created => {
                self.bus
                    .activity_durations()
                    .publish(&ActivityDurationEvent::Added { day });
            }
            BucketChange::Updated => {
                self.bus
                    .activity_durations()
                    .publish(&ActivityDurationEvent::Updated {
                        day,
                        activity,
                        total: update.total,
                    });
            }
            BucketChange::Unchanged => {}
        }

        let interval = &update.interval;
        let event = if update.extended {
            ActivityLogEvent::Updated {
                start: interval.start,
                finish: interval.finish,
                activity,
            }
        } else {
            ActivityLogEvent::Added {
                start: interval.start,
                finish: interval.finish,
                activity,
            }
        };
        self.bus.activity_log().publish(&event);

        Ok(update)
    }

    fn accrue_duration(
        tx: &Transaction<'_>,
        day: i64,
        column: DurationColumn,
        duration_ms: i64,
    ) -> Result<(BucketChange, i64)> {
        let col = column.as_str();
        let existing: Option<(i64, i64)> = tx
            .query_row(
                &format!("SELECT ID, {col} FROM activityduration WHERE time = ?1"),
                [day],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let (id, current, change) = match existing {
            Some((id, current)) => (id, current, BucketChange::Updated),
            None => {
                let affected = tx.execute(
                    r#"
                    INSERT INTO activityduration (time, still, walking, running, onbicycle, invehicle, unknown)
                    VALUES (?1, 0, 0, 0, 0, 0, 0)
                    "#,
                    [day],
                )?;
                check_rows("update_activity", 1, affected)?;
                tracing::info!(day, "Activity duration bucket created");
                (tx.last_insert_rowid(), 0, BucketChange::Created)
            }
        };

        if duration_ms <= 0 {
            let change = match change {
                BucketChange::Updated => BucketChange::Unchanged,
                other => other,
            };
            return Ok((change, current));
        }

        let total = current.saturating_add(duration_ms);
        let affected = tx.execute(
            &format!("UPDATE activityduration SET {col} = ?1 WHERE ID = ?2"),
            params![total, id],
        )?;
        check_rows("update_activity", 1, affected)?;
        tracing::debug!(day, column = col, duration_ms, "Activity duration accrued");

        Ok((change, total))
    }

    fn extend_log(
        tx: &Transaction<'_>,
        time: i64,
        activity: ActivityKind,
        duration_ms: i64,
    ) -> Result<(ActivityLogEntry, bool)> {
        // finish never precedes start
        let finish = time.saturating_add(duration_ms.max(0));

        let open: Option<(i64, i64)> = tx
            .query_row(
                "SELECT ID, start FROM activitylog WHERE finish = ?1 AND activity = ?2 ORDER BY ID DESC LIMIT 1",
                params![time, activity.code()],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        match open {
            Some((id, start)) => {
                let affected = tx.execute(
                    "UPDATE activitylog SET finish = ?1 WHERE ID = ?2",
                    params![finish, id],
                )?;
                check_rows("update_activity", 1, affected)?;
                let entry = ActivityLogEntry {
                    id,
                    start,
                    finish,
                    activity,
                };
                Ok((entry, true))
            }
            None => {
                let affected = tx.execute(
                    "INSERT INTO activitylog (start, finish, activity) VALUES (?1, ?2, ?3)",
                    params![time, finish, activity.code()],
                )?;
                check_rows("update_activity", 1, affected)?;
                let entry = ActivityLogEntry {
                    id: tx.last_insert_rowid(),
                    start: time,
                    finish,
                    activity,
                };
                Ok((entry, false))
            }
        }
    }

    /// All day buckets ordered by day
    pub fn get_activity_durations(&self, ascending: bool) -> Result<Vec<ActivityDuration>> {
        let sql = format!("SELECT * FROM activityduration{}", order_by("time", ascending));
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ActivityDuration {
                        id: row.get("ID")?,
                        day: row.get("time")?,
                        still: row.get("still")?,
                        walking: row.get("walking")?,
                        running: row.get("running")?,
                        onbicycle: row.get("onbicycle")?,
                        invehicle: row.get("invehicle")?,
                        unknown: row.get("unknown")?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Log entries overlapping `[from, to]`, ordered by start
    pub fn get_activity_log(
        &self,
        from: i64,
        to: i64,
        ascending: bool,
    ) -> Result<Vec<ActivityLogEntry>> {
        let sql = format!(
            "SELECT * FROM activitylog WHERE start <= ?2 AND finish >= ?1{}",
            order_by("start", ascending)
        );
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![from, to], |row| {
                    Ok(ActivityLogEntry {
                        id: row.get("ID")?,
                        start: row.get("start")?,
                        finish: row.get("finish")?,
                        activity: ActivityKind::from_code(row.get("activity")?),
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // ============================================
    // Step operations
    // ============================================

    /// Add `delta` steps to the bucket for `time`'s day.
    ///
    /// Negative deltas count as zero so a day's count never goes down.
    pub fn update_steps(&self, time: i64, delta: i64) -> Result<StepUpdate> {
        let day = day_start(time);
        let delta = delta.max(0);

        let update = self.write(|tx| {
            let existing: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT ID, count FROM step WHERE time = ?1",
                    [day],
                    |r| Ok((r.get(0)?, r.get(1)?)),
                )
                .optional()?;

            match existing {
                Some((id, count)) => {
                    let total = count.saturating_add(delta);
                    let affected = tx.execute(
                        "UPDATE step SET count = ?1 WHERE ID = ?2",
                        params![total, id],
                    )?;
                    check_rows("update_steps", 1, affected)?;
                    Ok(StepUpdate {
                        day,
                        count: total,
                        created: false,
                    })
                }
                None => {
                    let affected = tx.execute(
                        "INSERT INTO step (time, count) VALUES (?1, ?2)",
                        params![day, delta],
                    )?;
                    check_rows("update_steps", 1, affected)?;
                    tracing::info!(day, "Step bucket created");
                    Ok(StepUpdate {
                        day,
                        count: delta,
                        created: true,
                    })
                }
            }
        })?;

        let event = if update.created {
            StepEvent::Added {
                day,
                count: update.count,
            }
        } else {
            StepEvent::Updated {
                day,
                count: update.count,
            }
        };
        self.bus.steps().publish(&event);
        Ok(update)
    }

    /// All step buckets ordered by day
    pub fn get_steps(&self, ascending: bool) -> Result<Vec<StepBucket>> {
        let sql = format!("SELECT * FROM step{}", order_by("time", ascending));
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(StepBucket {
                        id: row.get("ID")?,
                        day: row.get("time")?,
                        count: row.get("count")?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Step count of the day containing `time`, 0 if there is no bucket
    pub fn get_steps_on(&self, time: i64) -> Result<i64> {
        let day = day_start(time);
        self.read(|conn| {
            let count = conn
                .query_row("SELECT count FROM step WHERE time = ?1", [day], |r| {
                    r.get::<_, i64>(0)
                })
                .optional()?;
            Ok(count.unwrap_or(0))
        })
    }

    // ============================================
    // Weather operations
    // ============================================

    /// Store a weather observation seen from `observer`.
    ///
    /// Returns false, without writing or notifying, if an observation for
    /// the same time and station is already stored.
    pub fn insert_weather(
        &self,
        observation: &WeatherObservation,
        observer: Coordinates,
    ) -> Result<bool> {
        let inserted = self.write(|tx| {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM weather WHERE time = ?1 AND station_id = ?2",
                    params![observation.time, observation.station_id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                return Ok(false);
            }

            let affected = tx.execute(
                r#"
                INSERT INTO weather (time, station_id, station_type, station_name,
                                     station_latitude, station_longitude, latitude, longitude,
                                     temperature, humidity, pressure, wind_speed,
                                     wind_direction, created)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
                "#,
                params![
                    observation.time,
                    observation.station_id,
                    observation.station_type,
                    observation.station_name,
                    finite(Some(observation.station_location.latitude)),
                    finite(Some(observation.station_location.longitude)),
                    finite(Some(observer.latitude)),
                    finite(Some(observer.longitude)),
                    finite(observation.temperature),
                    finite(observation.humidity),
                    finite(observation.pressure),
                    finite(observation.wind_speed),
                    finite(observation.wind_direction),
                    now_ms(),
                ],
            )?;
            check_rows("insert_weather", 1, affected)?;
            Ok(true)
        })?;

        if inserted {
            tracing::debug!(
                time = observation.time,
                station_id = observation.station_id,
                "Weather added"
            );
            self.bus.weather().publish(&WeatherEvent::Added {
                time: observation.time,
                station_id: observation.station_id,
            });
        }
        Ok(inserted)
    }

    /// All weather observations ordered by observation time
    pub fn get_weather(&self, ascending: bool) -> Result<Vec<WeatherRecord>> {
        let sql = format!("SELECT * FROM weather{}", order_by("time", ascending));
        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map([], Self::row_to_weather)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    fn row_to_weather(row: &Row) -> rusqlite::Result<WeatherRecord> {
        let coordinates = |lat: &str, lon: &str| -> rusqlite::Result<Option<Coordinates>> {
            let lat: Option<f64> = row.get(lat)?;
            let lon: Option<f64> = row.get(lon)?;
            Ok(lat.zip(lon).map(|(lat, lon)| Coordinates::new(lat, lon)))
        };

        Ok(WeatherRecord {
            id: row.get("ID")?,
            time: row.get("time")?,
            station_id: row.get("station_id")?,
            station_type: row.get("station_type")?,
            station_name: row.get("station_name")?,
            station_location: coordinates("station_latitude", "station_longitude")?,
            observer_location: coordinates("latitude", "longitude")?,
            temperature: row.get("temperature")?,
            humidity: row.get("humidity")?,
            pressure: row.get("pressure")?,
            wind_speed: row.get("wind_speed")?,
            wind_direction: row.get("wind_direction")?,
            created: row.get("created")?,
        })
    }

    // ============================================
    // Maintenance
    // ============================================

    /// Rebuild the store file, reclaiming free pages.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_writer()?;
        let before = Self::size_of(&conn)?;
        conn.execute_batch("VACUUM")?;
        let after = Self::size_of(&conn)?;
        tracing::info!(before, after, "Store vacuumed");
        Ok(())
    }

    /// Store size in bytes
    pub fn get_database_size(&self) -> Result<u64> {
        self.read(Self::size_of)
    }

    fn size_of(conn: &Connection) -> Result<u64> {
        let page_count: u64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: u64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        Ok(page_count * page_size)
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let (schema_version, rows, size_bytes) = self.read(|conn| {
            let mut rows = BTreeMap::new();
            for table in Table::ALL {
                let count: i64 = conn.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table.name()),
                    [],
                    |r| r.get(0),
                )?;
                rows.insert(table.name().to_string(), count);
            }
            Ok((get_schema_version(conn)?, rows, Self::size_of(conn)?))
        })?;

        Ok(StoreStatus {
            path: self.path.clone(),
            schema_version,
            rows,
            size_bytes,
            listener_failures: self.bus.failures(),
        })
    }
}

fn check_rows(operation: &'static str, expected: usize, affected: usize) -> Result<()> {
    if affected == expected {
        return Ok(());
    }
    tracing::warn!(operation, expected, affected, "Unexpected row count");
    Err(Error::WriteFailure {
        operation,
        expected,
        affected,
    })
}

fn order_by(column: &'static str, ascending: bool) -> String {
    let direction = if ascending { "ASC" } else { "DESC" };
    format!(" ORDER BY {column} {direction}, ID {direction}")
}

/// `provider` has INTEGER affinity, so a numeric name reads back as a number
fn provider_name(row: &Row) -> rusqlite::Result<String> {
    match row.get_ref("provider")? {
        ValueRef::Text(text) => Ok(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Integer(i) => Ok(i.to_string()),
        ValueRef::Real(r) => Ok(r.to_string()),
        other => Err(rusqlite::Error::InvalidColumnType(
            0,
            "provider".to_string(),
            other.data_type(),
        )),
    }
}

/// NaN and infinities are not measurements
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn finite32(value: Option<f32>) -> Option<f32> {
    value.filter(|v| v.is_finite())
}
