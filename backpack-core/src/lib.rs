//! # backpack-core
//!
//! Core library for backpacktrack - a personal location and activity tracker.
//!
//! This library provides:
//! - Domain types for location fixes, activity samples, steps and weather
//! - A versioned SQLite store with in-place schema upgrades
//! - Change notification for code that mirrors the store
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Writes flow through one path:
//! - **Record access:** [`Database`] serializes writers and commits each
//!   operation in its own transaction
//! - **Aggregation:** activity durations and step counts accrue into one
//!   bucket per local day; contiguous activity samples merge into intervals
//! - **Notification:** after commit, the store's [`ChangeBus`] tells the
//!   listeners of the entity kind that changed
//!
//! ## Example
//!
//! ```rust,no_run
//! use backpack_core::{ActivityKind, Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open (and if needed upgrade) the store
//! let db = Database::open_with(&config).expect("failed to open store");
//!
//! db.update_steps(backpack_core::now_ms(), 120).expect("failed to count steps");
//! db.update_activity(backpack_core::now_ms(), ActivityKind::Walking, 60_000)
//!     .expect("failed to record activity");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, LocationFilter, MigrationReport, StoreStatus};
pub use error::{Error, Result};
pub use notify::{ChangeBus, Listener, ListenerError, ListenerId, ListenerResult};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod notify;
pub mod types;
