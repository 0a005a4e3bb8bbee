//! Synchronization engine
//!
//! Owns the run lifecycle: a singleton Start/Stop pair around a periodic
//! sync loop that dispatches one scan+copy task per (node, share) holding
//! the active project. All file copies across all tasks share one
//! semaphore, so `max_parallelism` bounds the whole engine, not each task.

use crate::copy::{self, CopyError};
use crate::disk;
use crate::fs_scan;
use crate::models::{ProjectInfo, SyncStatus, SyncTaskStatus};
use crate::mount;
use crate::tracker::CaptureTracker;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

/// Directory names that are never projects, matched lowercased.
const INVALID_PROJECT_NAMES: &[&str] = &[
    "system volume information",
    "recycler",
    "recycled",
    "$recycle.bin",
    "logs",
    "log",
    "temp",
    "tmp",
    "windows",
    "program files",
];

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("synchronization already running")]
    AlreadyRunning,
    #[error("failed to create destination {path}: {source}")]
    DestinationCreate { path: PathBuf, source: io::Error },
}

/// Tunables the sync loop reads each iteration.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub loop_interval: Duration,
    pub min_free_disk_space: u64,
    pub disk_space_safety_margin: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            loop_interval: Duration::from_secs(10),
            min_free_disk_space: 50 * 1024 * 1024,
            disk_space_safety_margin: 100 * 1024 * 1024,
        }
    }
}

impl From<&crate::config::SyncSettings> for EngineOptions {
    fn from(sync: &crate::config::SyncSettings) -> Self {
        Self {
            loop_interval: sync.service_loop_interval(),
            min_free_disk_space: sync.min_free_disk_space,
            disk_space_safety_margin: sync.disk_space_safety_margin,
        }
    }
}

/// Live counters of one per-(node, share) pass. Written lock-free by the
/// copy tasks, read by status snapshots.
struct TaskProgress {
    node: String,
    share: String,
    total_files: AtomicU32,
    copied_files: AtomicU32,
    failed_files: AtomicU32,
    total_bytes: AtomicU64,
    copied_bytes: AtomicU64,
    last_activity_ms: AtomicI64,
}

impl TaskProgress {
    fn new(node: String, share: String) -> Self {
        Self {
            node,
            share,
            total_files: AtomicU32::new(0),
            copied_files: AtomicU32::new(0),
            failed_files: AtomicU32::new(0),
            total_bytes: AtomicU64::new(0),
            copied_bytes: AtomicU64::new(0),
            last_activity_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    fn publish_totals(&self, files: u32, bytes: u64) {
        self.total_files.store(files, Ordering::SeqCst);
        self.total_bytes.store(bytes, Ordering::SeqCst);
    }

    fn record_copied(&self, written: u64) {
        self.copied_files.fetch_add(1, Ordering::SeqCst);
        self.copied_bytes.fetch_add(written, Ordering::SeqCst);
        self.last_activity_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
    }

    fn record_failed(&self) {
        self.failed_files.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> SyncTaskStatus {
        let total_bytes = self.total_bytes.load(Ordering::SeqCst);
        let copied_bytes = self.copied_bytes.load(Ordering::SeqCst);
        let progress = if total_bytes > 0 {
            copied_bytes as f64 / total_bytes as f64 * 100.0
        } else {
            0.0
        };

        SyncTaskStatus {
            node: self.node.clone(),
            share: self.share.clone(),
            status: "running".to_string(),
            last_activity: DateTime::from_timestamp_millis(
                self.last_activity_ms.load(Ordering::SeqCst),
            )
            .unwrap_or_else(Utc::now),
            total_files: self.total_files.load(Ordering::SeqCst),
            copied_files: self.copied_files.load(Ordering::SeqCst),
            failed_files: self.failed_files.load(Ordering::SeqCst),
            total_bytes,
            copied_bytes,
            progress,
        }
    }
}

struct RunState {
    token: CancellationToken,
    tasks: TaskTracker,
}

#[derive(Default)]
struct EngineState {
    run: Option<RunState>,
    project: String,
    destination: String,
    active: HashMap<String, Arc<TaskProgress>>,
}

struct EngineInner {
    nodes: Vec<String>,
    shares: Vec<String>,
    base_mount_dir: PathBuf,
    options: EngineOptions,
    tracker: CaptureTracker,
    state: RwLock<EngineState>,
}

/// Handle to the sync service. Clones share one engine.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

impl SyncEngine {
    pub fn new(
        nodes: Vec<String>,
        shares: Vec<String>,
        base_mount_dir: impl Into<PathBuf>,
        options: EngineOptions,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                nodes,
                shares,
                base_mount_dir: base_mount_dir.into(),
                options,
                tracker: CaptureTracker::new(),
                state: RwLock::new(EngineState::default()),
            }),
        }
    }

    /// Begin synchronizing `project` into `destination`.
    ///
    /// Creates `<destination>/<project>` and launches the sync loop.
    /// Rejects when a run is already active.
    pub fn start(
        &self,
        project: &str,
        destination: &str,
        max_parallelism: usize,
    ) -> Result<(), EngineError> {
        let mut state = self.inner.state.write();
        if state.run.is_some() {
            return Err(EngineError::AlreadyRunning);
        }

        let dest_dir = Path::new(destination).join(project);
        std::fs::create_dir_all(&dest_dir).map_err(|source| EngineError::DestinationCreate {
            path: dest_dir.clone(),
            source,
        })?;

        info!(
            project,
            destination = %dest_dir.display(),
            parallelism = max_parallelism,
            "starting synchronization"
        );

        self.inner.tracker.reset_entries();

        let token = CancellationToken::new();
        let tasks = TaskTracker::new();
        let semaphore = Arc::new(Semaphore::new(max_parallelism.max(1)));

        tasks.spawn(EngineInner::sync_loop(
            Arc::clone(&self.inner),
            token.clone(),
            tasks.clone(),
            semaphore,
            project.to_string(),
            dest_dir,
        ));

        state.project = project.to_string();
        state.destination = destination.to_string();
        state.run = Some(RunState { token, tasks });
        Ok(())
    }

    /// Cancel the run and wait for the loop and every task to drain.
    /// A no-op when idle.
    pub async fn stop(&self) {
        let (token, tasks) = {
            let state = self.inner.state.read();
            match &state.run {
                Some(run) => (run.token.clone(), run.tasks.clone()),
                None => return,
            }
        };

        info!("stopping synchronization");
        token.cancel();
        tasks.close();
        tasks.wait().await;

        let mut state = self.inner.state.write();
        state.run = None;
        state.active.clear();
        info!("synchronization stopped");
    }

    /// Consistent snapshot of the run and every active task.
    pub fn status(&self) -> SyncStatus {
        let state = self.inner.state.read();
        let mut active_tasks: Vec<SyncTaskStatus> =
            state.active.values().map(|t| t.snapshot()).collect();
        active_tasks.sort_by(|a, b| (&a.node, &a.share).cmp(&(&b.node, &b.share)));

        SyncStatus {
            is_running: state.run.is_some(),
            project: state.project.clone(),
            destination: state.destination.clone(),
            completed_captures: self.inner.tracker.completed_captures(),
            completed_test_captures: self.inner.tracker.completed_test_captures(),
            last_capture_number: self.inner.tracker.last_capture_number(),
            last_test_capture_number: self.inner.tracker.last_test_capture_number(),
            active_tasks,
        }
    }

    /// Scan the top level of every mounted (node, share) for candidate
    /// project directories. Unreadable mounts contribute nothing; result
    /// order is unspecified.
    pub async fn find_projects(&self, token: &CancellationToken) -> Vec<ProjectInfo> {
        let mut jobs = JoinSet::new();
        for node in &self.inner.nodes {
            for share in &self.inner.shares {
                let root = mount::mount_point(&self.inner.base_mount_dir, node, share);
                let node = node.clone();
                let share = share.clone();
                jobs.spawn_blocking(move || {
                    let mut names = Vec::new();
                    match std::fs::read_dir(&root) {
                        Ok(entries) => {
                            for entry in entries.flatten() {
                                if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                                    continue;
                                }
                                if let Some(name) = entry.file_name().to_str() {
                                    if is_valid_project_name(name) {
                                        names.push(name.to_string());
                                    }
                                }
                            }
                        }
                        Err(err) => {
                            debug!(
                                node = %node,
                                share = %share,
                                path = %root.display(),
                                error = %err,
                                "cannot read share"
                            );
                        }
                    }
                    (node, share, names)
                });
            }
        }

        let mut found: HashMap<String, String> = HashMap::new();
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    jobs.abort_all();
                    break;
                }
                joined = jobs.join_next() => match joined {
                    None => break,
                    Some(Ok((node, share, names))) => {
                        for name in names {
                            found
                                .entry(name)
                                .or_insert_with(|| format!("{node}/{share}"));
                        }
                    }
                    Some(Err(_)) => {}
                }
            }
        }

        found
            .into_iter()
            .map(|(name, source)| ProjectInfo { name, source })
            .collect()
    }
}

impl EngineInner {
    async fn sync_loop(
        self: Arc<Self>,
        token: CancellationToken,
        tasks: TaskTracker,
        semaphore: Arc<Semaphore>,
        project: String,
        dest_dir: PathBuf,
    ) {
        let mut ticker = tokio::time::interval(self.options.loop_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {}
            }
            sync_iteration(&self, &token, &tasks, &semaphore, &project, &dest_dir);
        }
    }
}

/// One pass over all (node, share) pairs, spawning a task wherever the
/// project is present, no task is in flight and the destination has room.
/// Best-effort: a bad pair never blocks the others.
fn sync_iteration(
    inner: &Arc<EngineInner>,
    token: &CancellationToken,
    tasks: &TaskTracker,
    semaphore: &Arc<Semaphore>,
    project: &str,
    dest_dir: &Path,
) {
    // The free-space probe is per iteration, not per pair.
    let mut room: Option<bool> = None;

    for node in &inner.nodes {
        for share in &inner.shares {
            if token.is_cancelled() {
                return;
            }

            let key = format!("{node}-{share}");
            let source = mount::mount_point(&inner.base_mount_dir, node, share).join(project);

            // Absent source just means this pair holds nothing for the
            // current project.
            if !source.is_dir() {
                continue;
            }

            if inner.state.read().active.contains_key(&key) {
                continue;
            }

            let has_room = *room.get_or_insert_with(|| {
                disk::has_room(
                    dest_dir,
                    inner.options.min_free_disk_space,
                    inner.options.disk_space_safety_margin,
                )
            });
            if !has_room {
                debug!(node = %node, share = %share, "destination low on space, deferring");
                continue;
            }

            let progress = Arc::new(TaskProgress::new(node.clone(), share.clone()));
            inner
                .state
                .write()
                .active
                .insert(key.clone(), Arc::clone(&progress));
            debug!(node = %node, share = %share, "starting sync task");

            tasks.spawn(run_source_task(
                Arc::clone(inner),
                key,
                source,
                dest_dir.to_path_buf(),
                token.clone(),
                Arc::clone(semaphore),
                progress,
            ));
        }
    }
}

async fn run_source_task(
    inner: Arc<EngineInner>,
    key: String,
    source: PathBuf,
    dest: PathBuf,
    token: CancellationToken,
    semaphore: Arc<Semaphore>,
    progress: Arc<TaskProgress>,
) {
    if let Err(err) = sync_source(&inner, &source, &dest, &token, &semaphore, &progress).await {
        if !token.is_cancelled() {
            error!(
                node = %progress.node,
                share = %progress.share,
                error = %err,
                "sync task failed"
            );
        }
    }
    inner.state.write().active.remove(&key);
}

/// One scan+copy pass: enumerate, keep the stale files, publish the
/// totals, then copy under the global parallelism budget.
async fn sync_source(
    inner: &Arc<EngineInner>,
    source: &Path,
    dest: &Path,
    token: &CancellationToken,
    semaphore: &Arc<Semaphore>,
    progress: &Arc<TaskProgress>,
) -> anyhow::Result<()> {
    let (files_to_copy, total_bytes) = {
        let source = source.to_path_buf();
        let dest = dest.to_path_buf();
        let token = token.clone();
        tokio::task::spawn_blocking(move || -> io::Result<(Vec<PathBuf>, u64)> {
            let files = fs_scan::scan_files(&source, &token)?;
            let mut stale = Vec::new();
            let mut bytes = 0u64;
            for file in files {
                if token.is_cancelled() {
                    break;
                }
                if copy::needs_copy(&file, &source, &dest) {
                    // A failed stat counts zero bytes; the copy itself
                    // will fail and be retried next pass.
                    bytes += std::fs::metadata(&file).map(|m| m.len()).unwrap_or(0);
                    stale.push(file);
                }
            }
            Ok((stale, bytes))
        })
        .await??
    };

    progress.publish_totals(files_to_copy.len() as u32, total_bytes);

    let mut copies = JoinSet::new();
    for file in files_to_copy {
        let permit = tokio::select! {
            _ = token.cancelled() => break,
            permit = Arc::clone(semaphore).acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            }
        };

        let inner = Arc::clone(inner);
        let token = token.clone();
        let progress = Arc::clone(progress);
        let source_root = source.to_path_buf();
        let dest_root = dest.to_path_buf();
        copies.spawn(async move {
            let _permit = permit;
            match copy::copy_file(&file, &source_root, &dest_root, &token).await {
                Ok(written) => {
                    progress.record_copied(written);
                    if let Some(name) = file.file_name().and_then(|n| n.to_str()) {
                        inner.tracker.record(name, &progress.node);
                    }
                }
                // A cancelled copy is neither a success nor a failure;
                // the next pass retries it via the size mismatch.
                Err(CopyError::Cancelled) => {}
                Err(err) => {
                    progress.record_failed();
                    error!(file = %file.display(), error = %err, "failed to copy file");
                }
            }
        });
    }

    while copies.join_next().await.is_some() {}
    Ok(())
}

fn is_valid_project_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    for excluded in INVALID_PROJECT_NAMES {
        if lower == *excluded || lower.starts_with(&format!("{excluded} ")) {
            return false;
        }
    }
    !(name.starts_with('$') || name.starts_with('.') || name.len() <= 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_name_filter() {
        assert!(is_valid_project_name("Arh2k_mezen_200725"));
        assert!(is_valid_project_name("Alpha"));

        assert!(!is_valid_project_name("System Volume Information"));
        assert!(!is_valid_project_name("RECYCLER"));
        assert!(!is_valid_project_name("$RECYCLE.BIN"));
        assert!(!is_valid_project_name("$anything"));
        assert!(!is_valid_project_name(".hidden"));
        assert!(!is_valid_project_name("x"));
        assert!(!is_valid_project_name("logs"));
        assert!(!is_valid_project_name("Temp"));
        assert!(!is_valid_project_name("program files (x86)"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn start_is_a_singleton() {
        let dest = tempfile::tempdir().unwrap();
        let mounts = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(
            vec!["WU01".into()],
            vec!["E$".into()],
            mounts.path(),
            EngineOptions::default(),
        );

        engine
            .start("Alpha", dest.path().to_str().unwrap(), 2)
            .unwrap();
        let err = engine
            .start("Alpha", dest.path().to_str().unwrap(), 2)
            .unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRunning));

        engine.stop().await;
        assert!(!engine.status().is_running);

        // Start/stop may cycle on the same engine value.
        engine
            .start("Alpha", dest.path().to_str().unwrap(), 2)
            .unwrap();
        engine.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_without_start_is_a_noop() {
        let mounts = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(
            vec!["WU01".into()],
            vec!["E$".into()],
            mounts.path(),
            EngineOptions::default(),
        );
        engine.stop().await;
        assert!(!engine.status().is_running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unwritable_destination_fails_start() {
        let mounts = tempfile::tempdir().unwrap();
        let engine = SyncEngine::new(
            vec!["WU01".into()],
            vec!["E$".into()],
            mounts.path(),
            EngineOptions::default(),
        );

        let err = engine
            .start("Alpha", "/proc/definitely-not-writable", 2)
            .unwrap_err();
        assert!(matches!(err, EngineError::DestinationCreate { .. }));
        assert!(!engine.status().is_running);
    }
}
