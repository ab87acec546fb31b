//! Pass conflict detection and revert policy.
//!
//! The conflict subsystem is responsible for:
//! 1. **Classification** -- diffing before/after snapshots into fixed,
//!    regressed and unchanged rules.
//! 2. **Policy** -- deciding whether a pass must be reverted and explaining why.

pub mod detector;

pub use detector::ConflictDetector;
