//! passgate core library.
//!
//! This crate provides the building blocks for quality-gated revision
//! tracking: configuration, snapshot storage, violation detection, pass
//! delta computation with its revert policy, and the pass tracker that ties
//! them together.

pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod models;
pub mod rules;
pub mod snapshot;
pub mod tracker;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::ConflictDetector;
pub use db::Database;
pub use rules::{PatternRuleSet, ViolationDetector};
pub use snapshot::{MemorySnapshotStore, SnapshotStore, SqliteSnapshotStore};
pub use tracker::PassTracker;
