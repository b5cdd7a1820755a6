//! Table and index definitions
//!
//! Each table is created together with its indexes. Creation refuses to
//! touch an existing table or index ([`Error::SchemaConflict`]); callers
//! decide from the schema version whether a table should exist.

use crate::error::{Error, Result};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeMap;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 12;

/// Tables of the current schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Location,
    ActivityType,
    ActivityDuration,
    ActivityLog,
    Step,
    Weather,
}

impl Table {
    pub const ALL: [Table; 6] = [
        Table::Location,
        Table::ActivityType,
        Table::ActivityDuration,
        Table::ActivityLog,
        Table::Step,
        Table::Weather,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Table::Location => "location",
            Table::ActivityType => "activitytype",
            Table::ActivityDuration => "activityduration",
            Table::ActivityLog => "activitylog",
            Table::Step => "step",
            Table::Weather => "weather",
        }
    }

    fn ddl(&self) -> &'static str {
        match self {
            Table::Location => {
                r#"
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
                    name TEXT,
                    activity_type INTEGER NULL,
                    activity_confidence INTEGER NULL,
                    stepcount INTEGER NULL
                )
                "#
            }
            Table::ActivityType => {
                r#"
                CREATE TABLE activitytype (
                    ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    time INTEGER NOT NULL,
                    activity INTEGER NOT NULL,
                    confidence INTEGER NOT NULL
                )
                "#
            }
            Table::ActivityDuration => {
                r#"
                CREATE TABLE activityduration (
                    ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    time INTEGER NOT NULL,
                    still INTEGER NOT NULL,
                    walking INTEGER NOT NULL,
                    running INTEGER NOT NULL,
                    onbicycle INTEGER NOT NULL,
                    invehicle INTEGER NOT NULL,
                    unknown INTEGER NOT NULL
                )
                "#
            }
            Table::ActivityLog => {
                r#"
                CREATE TABLE activitylog (
                    ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    start INTEGER NOT NULL,
                    finish INTEGER NOT NULL,
                    activity INTEGER NOT NULL
                )
                "#
            }
            Table::Step => {
                r#"
                CREATE TABLE step (
                    ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    time INTEGER NOT NULL,
                    count INTEGER NOT NULL
                )
                "#
            }
            Table::Weather => {
                r#"
                CREATE TABLE weather (
                    ID INTEGER PRIMARY KEY AUTOINCREMENT,
                    time INTEGER NOT NULL,
                    station_id INTEGER NOT NULL,
                    station_type INTEGER NOT NULL,
                    station_name TEXT NULL,
                    station_latitude REAL NULL,
                    station_longitude REAL NULL,
                    latitude REAL NULL,
                    longitude REAL NULL,
                    temperature REAL NULL,
                    humidity REAL NULL,
                    pressure REAL NULL,
                    wind_speed REAL NULL,
                    wind_direction REAL NULL,
                    created INTEGER NULL
                )
                "#
            }
        }
    }

    /// `(index name, CREATE INDEX statement)` pairs
    fn indexes(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Table::Location => &[
                ("idx_location_time", "CREATE INDEX idx_location_time ON location(time)"),
                ("idx_location_name", "CREATE INDEX idx_location_name ON location(name)"),
            ],
            Table::ActivityType => &[(
                "idx_activitytype_time",
                "CREATE INDEX idx_activitytype_time ON activitytype(time)",
            )],
            Table::ActivityDuration => &[(
                "idx_activityduration_time",
                "CREATE INDEX idx_activityduration_time ON activityduration(time)",
            )],
            Table::ActivityLog => &[
                (
                    "idx_activitylog_start",
                    "CREATE INDEX idx_activitylog_start ON activitylog(start)",
                ),
                (
                    "idx_activitylog_finish",
                    "CREATE INDEX idx_activitylog_finish ON activitylog(finish)",
                ),
                (
                    "idx_activitylog_activity",
                    "CREATE INDEX idx_activitylog_activity ON activitylog(activity)",
                ),
            ],
            Table::Step => &[("idx_step_time", "CREATE INDEX idx_step_time ON step(time)")],
            Table::Weather => &[
                ("idx_weather_time", "CREATE INDEX idx_weather_time ON weather(time)"),
                (
                    "idx_weather_station_id",
                    "CREATE INDEX idx_weather_station_id ON weather(station_id)",
                ),
            ],
        }
    }

    /// Names of this table's indexes
    pub fn index_names(&self) -> impl Iterator<Item = &'static str> {
        self.indexes().iter().map(|(name, _)| *name)
    }
}

/// Create `table` and its indexes.
pub fn create_table(conn: &Connection, table: Table) -> Result<()> {
    ensure_absent(conn, "table", table.name())?;
    for name in table.index_names() {
        ensure_absent(conn, "index", name)?;
    }

    tracing::info!(table = table.name(), "Creating table");
    conn.execute_batch(table.ddl())?;
    for (_, sql) in table.indexes() {
        conn.execute_batch(sql)?;
    }
    Ok(())
}

/// Create every table of the current schema.
pub fn create_all(conn: &Connection) -> Result<()> {
    for table in Table::ALL {
        create_table(conn, table)?;
    }
    Ok(())
}

/// Run a legacy `CREATE TABLE`/`CREATE INDEX` batch under the same
/// conflict rules as [`create_table`].
pub(crate) fn create_raw(
    conn: &Connection,
    table: &'static str,
    indexes: &[&'static str],
    sql: &str,
) -> Result<()> {
    ensure_absent(conn, "table", table)?;
    for name in indexes {
        ensure_absent(conn, "index", name)?;
    }
    conn.execute_batch(sql)?;
    Ok(())
}

/// Whether a schema object of `kind` ("table", "index") named `name` exists
pub fn object_exists(conn: &Connection, kind: &str, name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = ?1 AND name = ?2",
            [kind, name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

fn ensure_absent(conn: &Connection, kind: &'static str, name: &str) -> Result<()> {
    if object_exists(conn, kind, name)? {
        return Err(Error::SchemaConflict {
            kind,
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

pub(crate) fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
    Ok(())
}

// ============================================
// Structural description
// ============================================

/// One column as SQLite reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnShape {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    pub primary_key: bool,
}

/// Columns and indexes of one table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TableShape {
    pub columns: Vec<ColumnShape>,
    /// Index name to indexed columns, in key order
    pub indexes: BTreeMap<String, Vec<String>>,
}

/// Structure of every user table, keyed by table name.
pub type SchemaShape = BTreeMap<String, TableShape>;

/// Describe tables, columns and indexes, independent of DDL formatting.
///
/// Two stores with equal descriptions have the same schema, no matter
/// whether it was created at once or built up by upgrades.
pub fn describe(conn: &Connection) -> Result<SchemaShape> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mut shape = SchemaShape::new();
    for table in tables {
        let mut columns_stmt = conn.prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")?;
        let columns = columns_stmt
            .query_map([&table], |row| {
                Ok(ColumnShape {
                    name: row.get(0)?,
                    declared_type: row.get(1)?,
                    not_null: row.get::<_, i64>(2)? != 0,
                    primary_key: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut index_stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = ?1 AND sql IS NOT NULL ORDER BY name",
        )?;
        let index_names = index_stmt
            .query_map([&table], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut indexes = BTreeMap::new();
        for index in index_names {
            let mut info_stmt =
                conn.prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")?;
            let indexed = info_stmt
                .query_map([&index], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            indexes.insert(index, indexed);
        }

        shape.insert(table, TableShape { columns, indexes });
    }

    Ok(shape)
}
