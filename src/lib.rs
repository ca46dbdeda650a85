//! trafficwatch
//!
//! Continuous collection pipeline for a fleet of remote traffic cameras:
//! fetch frames, score them with a vehicle-detection backend, persist the
//! counts, and keep running through flaky upstream hosts.
//!
//! # Module Structure
//!
//! - `retry`: retry-with-backoff execution with independent request pacing
//! - `validate`: placeholder/error payload detection
//! - `audit`: sequential two-phase camera reliability audit
//! - `collector`: bounded-concurrency batch collection
//! - `scheduler`: non-overlapping periodic driver with fault boundary
//! - `targets`, `fetch`, `detect`, `storage`, `alert`, `config`: the
//!   collaborator boundaries and their default implementations

use std::time::{SystemTime, UNIX_EPOCH};

pub mod alert;
pub mod audit;
pub mod collector;
pub mod config;
pub mod detect;
pub mod fetch;
pub mod retry;
pub mod scheduler;
pub mod storage;
pub mod targets;
pub mod validate;

pub use collector::{BatchCollector, BatchSettings, BatchSummary};
pub use config::CollectorConfig;
pub use retry::{Attempt, RetryExecutor, RetryPolicy};
pub use scheduler::Scheduler;
pub use storage::{BatchRecord, BatchStatus, DetectionRecord, SqliteStore};
pub use targets::{load_targets, CameraTarget, TargetSnapshot};

/// Current time as epoch seconds.
pub fn now_s() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Local time formatted the way historical rows store it.
pub fn timestamp_string() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Local time formatted for file names.
pub fn file_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}
