//! Error types for backpack-core

use thiserror::Error;

/// Main error type for the backpack-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A table or index was created when one of the same name already exists
    #[error("schema conflict: {kind} {name} already exists")]
    SchemaConflict { kind: &'static str, name: String },

    /// An upgrade step failed; the whole upgrade was rolled back
    #[error("migration from version {from} failed at step {to} ({step}): {source}")]
    MigrationFailure {
        from: i32,
        to: i32,
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    /// The store was written by a newer release
    #[error("store schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i32, supported: i32 },

    /// An insert, update or delete touched an unexpected number of rows
    #[error("{operation}: expected {expected} row(s) affected, got {affected}")]
    WriteFailure {
        operation: &'static str,
        expected: usize,
        affected: usize,
    },

    /// A thread panicked while holding a store lock
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl Error {
    /// True for row-count mismatches, which callers usually log and skip.
    pub fn is_write_failure(&self) -> bool {
        matches!(self, Error::WriteFailure { .. })
    }
}

/// Result type alias for backpack-core
pub type Result<T> = std::result::Result<T, Error>;
