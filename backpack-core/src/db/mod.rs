//! Database layer for backpacktrack
//!
//! This module provides the storage layer using SQLite with:
//! - Table definitions and structural description
//! - Versioned schema upgrades
//! - Repository pattern for queries and day-bucket aggregation

pub mod migrate;
pub mod repo;
pub mod schema;

pub use migrate::MigrationReport;
pub use repo::{Database, LocationFilter, StoreStatus};

use crate::error::Result;
use std::path::Path;

/// Companion files SQLite keeps next to a store
const COMPANION_SUFFIXES: [&str; 2] = ["-journal", "-wal"];

/// Rename a store file left under its old name, with its journal and WAL
/// files, to `current` in `dir`.
///
/// Returns true if the store was moved. Nothing is moved when a store
/// under the current name already exists.
pub fn relocate_legacy(dir: &Path, legacy: &str, current: &str) -> Result<bool> {
    let legacy_path = dir.join(legacy);
    let current_path = dir.join(current);

    if !legacy_path.is_file() {
        return Ok(false);
    }
    if current_path.exists() {
        tracing::warn!(
            legacy = %legacy_path.display(),
            current = %current_path.display(),
            "Legacy store found next to current store, leaving it in place"
        );
        return Ok(false);
    }

    std::fs::rename(&legacy_path, &current_path)?;
    for suffix in COMPANION_SUFFIXES {
        let from = dir.join(format!("{legacy}{suffix}"));
        if from.is_file() {
            std::fs::rename(&from, dir.join(format!("{current}{suffix}")))?;
        }
    }

    tracing::info!(
        from = %legacy_path.display(),
        to = %current_path.display(),
        "Relocated legacy store"
    );
    Ok(true)
}
