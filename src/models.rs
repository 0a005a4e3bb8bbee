//! Wire-facing status and event types
//!
//! Everything the control surface serializes to clients lives here. The
//! engine fills these from atomically loaded counters, so a snapshot is
//! eventually consistent rather than transactional.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One active per-(node, share) scan+copy pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncTaskStatus {
    pub node: String,
    pub share: String,
    pub status: String,
    pub last_activity: DateTime<Utc>,
    pub total_files: u32,
    pub copied_files: u32,
    pub failed_files: u32,
    pub total_bytes: u64,
    pub copied_bytes: u64,
    /// Byte progress in percent, 0 when totals are not yet published.
    pub progress: f64,
}

/// Overall engine status snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_running: bool,
    pub project: String,
    pub destination: String,
    pub completed_captures: u32,
    pub completed_test_captures: u32,
    pub last_capture_number: String,
    pub last_test_capture_number: String,
    pub active_tasks: Vec<SyncTaskStatus>,
}

/// A project directory discovered on at least one mounted share.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectInfo {
    pub name: String,
    /// First `node/share` the project was seen on.
    pub source: String,
}

/// System performance sample for the monitoring UI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub memory_percent: f64,
    pub disk_bytes_per_sec: f64,
    pub disk_mbps: f64,
    pub disk_percent: f64,
    pub network_bytes_per_sec: f64,
    pub network_mbps: f64,
    pub network_percent: f64,
    pub free_disk_bytes: u64,
    pub free_disk_gb: f64,
}

/// One log record forwarded to push-channel subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogMessage {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}
