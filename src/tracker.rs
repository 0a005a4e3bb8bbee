//! Capture completion tracking
//!
//! Every finished file copy reports `(basename, node)` here. The tracker
//! folds those arrivals into per-capture token sets and commits a capture
//! exactly once when it reaches quorum: 13 distinct worker raw fragments,
//! plus the control unit metadata for production captures. Test captures
//! ship no metadata, so their quorum is the raw fragments alone.

use crate::capture::{self, FileKind};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info};

/// One raw fragment per worker node; the cluster has exactly 13 of them.
pub const RAW_QUORUM: usize = 13;

/// A deduplicated contribution to a capture. The two shares of a worker
/// are independent paths to the same fragment, so arrivals are keyed by
/// node, not by share, and a fragment seen on both shares inserts once.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Arrival {
    Raw { node: String },
    /// Metadata is published by the control unit only; the arriving node
    /// is ignored for it.
    Metadata,
}

/// Production requires metadata; Test does not. The class is fixed by raw
/// arrivals and Test is sticky so a stray production-looking fragment can
/// never flip an already-test capture back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Classification {
    Unknown,
    Production,
    Test,
}

#[derive(Debug)]
struct CaptureEntry {
    arrivals: HashSet<Arrival>,
    class: Classification,
}

impl CaptureEntry {
    fn new() -> Self {
        Self {
            arrivals: HashSet::new(),
            class: Classification::Unknown,
        }
    }
}

struct TrackerState {
    entries: HashMap<String, CaptureEntry>,
    last_capture: String,
    last_test_capture: String,
}

/// A capture that just reached quorum.
#[derive(Debug, Clone)]
pub struct CompletedCapture {
    pub capture_number: String,
    pub project_name: String,
    pub data_type: String,
    pub verified: bool,
    pub sensor_code: String,
    pub session_id: String,
    pub is_test: bool,
    /// Value of the class counter after this completion.
    pub class_total: u32,
}

pub struct CaptureTracker {
    state: Mutex<TrackerState>,
    completed: AtomicU32,
    completed_test: AtomicU32,
}

impl Default for CaptureTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureTracker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                entries: HashMap::new(),
                last_capture: String::new(),
                last_test_capture: String::new(),
            }),
            completed: AtomicU32::new(0),
            completed_test: AtomicU32::new(0),
        }
    }

    /// Record one copied file. Non-capture names and repeated arrivals are
    /// no-ops. Returns the completion when this arrival closes the quorum.
    pub fn record(&self, filename: &str, node: &str) -> Option<CompletedCapture> {
        let file = capture::parse(filename)?;

        let arrival = match file.kind {
            FileKind::Raw => Arrival::Raw {
                node: node.to_string(),
            },
            FileKind::Metadata => Arrival::Metadata,
        };

        let mut state = self.state.lock();
        let entry = state
            .entries
            .entry(file.capture_number.clone())
            .or_insert_with(CaptureEntry::new);

        if file.kind == FileKind::Raw {
            entry.class = match (entry.class, file.is_test) {
                (_, true) => Classification::Test,
                (Classification::Unknown, false) => Classification::Production,
                (class, false) => class,
            };
        }

        if !entry.arrivals.insert(arrival) {
            return None;
        }

        let raw_count = entry
            .arrivals
            .iter()
            .filter(|a| matches!(a, Arrival::Raw { .. }))
            .count();
        let has_metadata = entry.arrivals.contains(&Arrival::Metadata);
        let is_test = entry.class == Classification::Test;

        debug!(
            capture = %file.capture_number,
            node,
            raw_fragments = raw_count,
            has_metadata,
            is_test,
            "capture progress"
        );

        let complete = if is_test {
            raw_count == RAW_QUORUM
        } else {
            raw_count == RAW_QUORUM && has_metadata
        };
        if !complete {
            return None;
        }

        state.entries.remove(&file.capture_number);
        let class_total = if is_test {
            state.last_test_capture = file.capture_number.clone();
            self.completed_test.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            state.last_capture = file.capture_number.clone();
            self.completed.fetch_add(1, Ordering::SeqCst) + 1
        };
        drop(state);

        let verified = file.is_verified();
        let done = CompletedCapture {
            capture_number: file.capture_number,
            project_name: file.project_name,
            data_type: file.data_type,
            verified,
            sensor_code: file.sensor_code,
            session_id: file.session_id,
            is_test,
            class_total,
        };

        info!(
            capture = %done.capture_number,
            project = %done.project_name,
            data_type = %done.data_type,
            verified = done.verified,
            sensor = %done.sensor_code,
            session = %done.session_id,
            test = done.is_test,
            completed = done.class_total,
            "capture completed"
        );

        Some(done)
    }

    /// Drop all in-flight capture entries. Called on engine start so a new
    /// run never inherits partial quorums from a previous project; the
    /// completion counters and last-capture markers survive.
    pub fn reset_entries(&self) {
        self.state.lock().entries.clear();
    }

    pub fn completed_captures(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn completed_test_captures(&self) -> u32 {
        self.completed_test.load(Ordering::SeqCst)
    }

    pub fn last_capture_number(&self) -> String {
        self.state.lock().last_capture.clone()
    }

    pub fn last_test_capture_number(&self) -> String {
        self.state.lock().last_test_capture.clone()
    }

    /// Number of captures currently mid-quorum.
    pub fn pending(&self) -> usize {
        self.state.lock().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SESSION: &str = "BD11EBB0_BE00_4BE7_BC66_9DED8D740C2E";

    fn raw(num: &str) -> String {
        format!("Lvl00-{num}-Proj-06-00-{SESSION}.raw")
    }

    fn test_raw(num: &str) -> String {
        format!("Lvl0X-{num}-T-Proj-06-00-{SESSION}.raw")
    }

    fn xml(num: &str) -> String {
        format!("EAD-{num}-Proj-{SESSION}.xml")
    }

    fn worker(i: usize) -> String {
        format!("WU{i:02}")
    }

    #[test]
    fn single_fragment_does_not_complete() {
        let t = CaptureTracker::new();
        assert!(t.record(&raw("00001"), "WU01").is_none());
        assert_eq!(t.completed_captures(), 0);
        assert_eq!(t.pending(), 1);
    }

    #[test]
    fn production_capture_needs_all_workers_and_metadata() {
        let t = CaptureTracker::new();
        for i in 1..=13 {
            assert!(t.record(&raw("00042"), &worker(i)).is_none());
        }
        // All 13 fragments present but no metadata yet.
        assert_eq!(t.completed_captures(), 0);

        let done = t.record(&xml("00042"), "CU").unwrap();
        assert!(!done.is_test);
        assert_eq!(done.capture_number, "00042");
        assert_eq!(done.class_total, 1);
        assert_eq!(t.completed_captures(), 1);
        assert_eq!(t.last_capture_number(), "00042");
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn metadata_first_then_fragments() {
        let t = CaptureTracker::new();
        assert!(t.record(&xml("00005"), "CU").is_none());
        for i in 1..=12 {
            assert!(t.record(&raw("00005"), &worker(i)).is_none());
        }
        let done = t.record(&raw("00005"), &worker(13)).unwrap();
        assert!(!done.is_test);
        assert_eq!(t.completed_captures(), 1);
    }

    #[test]
    fn test_capture_completes_without_metadata() {
        let t = CaptureTracker::new();
        for i in 1..=12 {
            assert!(t.record(&test_raw("00007"), &worker(i)).is_none());
        }
        let done = t.record(&test_raw("00007"), &worker(13)).unwrap();
        assert!(done.is_test);
        assert!(!done.verified);
        assert_eq!(t.completed_test_captures(), 1);
        assert_eq!(t.completed_captures(), 0);
        assert_eq!(t.last_test_capture_number(), "00007");
        assert_eq!(t.last_capture_number(), "");
    }

    #[test]
    fn duplicate_fragment_from_second_share_is_idempotent() {
        let t = CaptureTracker::new();
        assert!(t.record(&raw("00009"), "WU05").is_none());
        // Same fragment surfacing on the worker's other share.
        assert!(t.record(&raw("00009"), "WU05").is_none());

        for i in 1..=12 {
            t.record(&raw("00009"), &worker(i));
        }
        // Only 12 distinct workers so far; WU13 is still missing.
        assert_eq!(t.completed_captures(), 0);
        t.record(&xml("00009"), "CU");
        assert_eq!(t.completed_captures(), 0);

        t.record(&raw("00009"), &worker(13));
        assert_eq!(t.completed_captures(), 1);
    }

    #[test]
    fn test_classification_is_sticky() {
        let t = CaptureTracker::new();
        assert!(t.record(&test_raw("00011"), "WU01").is_none());
        // A production-looking fragment cannot reclassify the capture.
        for i in 2..=12 {
            assert!(t.record(&raw("00011"), &worker(i)).is_none());
        }
        let done = t.record(&raw("00011"), &worker(13)).unwrap();
        assert!(done.is_test);
        assert_eq!(t.completed_test_captures(), 1);
        assert_eq!(t.completed_captures(), 0);
    }

    #[test]
    fn non_capture_names_are_ignored() {
        let t = CaptureTracker::new();
        assert!(t.record("README.txt", "WU01").is_none());
        assert_eq!(t.pending(), 0);
    }

    #[test]
    fn completion_commits_exactly_once() {
        let t = CaptureTracker::new();
        for i in 1..=13 {
            t.record(&raw("00002"), &worker(i));
        }
        assert!(t.record(&xml("00002"), "CU").is_some());
        // Late duplicates after the commit re-open nothing at quorum.
        assert!(t.record(&xml("00002"), "CU").is_none());
        assert!(t.record(&raw("00002"), "WU01").is_none());
        assert_eq!(t.completed_captures(), 1);
    }

    #[test]
    fn reset_drops_pending_but_keeps_counters() {
        let t = CaptureTracker::new();
        for i in 1..=13 {
            t.record(&raw("00001"), &worker(i));
        }
        t.record(&xml("00001"), "CU");
        t.record(&raw("00002"), "WU01");
        assert_eq!(t.pending(), 1);

        t.reset_entries();
        assert_eq!(t.pending(), 0);
        assert_eq!(t.completed_captures(), 1);
        assert_eq!(t.last_capture_number(), "00001");
    }
}
