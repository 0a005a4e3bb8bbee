//! End-to-end engine tests over tempdir-backed mounts.
//!
//! The mount layout mirrors what the CIFS provider produces:
//! `<base>/<node>/<share-without-$>/<project>/<files>`.

use std::fs;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use ucxsync::engine::{EngineOptions, SyncEngine};

const SESSION: &str = "BD11EBB0_BE00_4BE7_BC66_9DED8D740C2E";

fn cluster_nodes() -> Vec<String> {
    (1..=13)
        .map(|i| format!("WU{i:02}"))
        .chain(std::iter::once("CU".to_string()))
        .collect()
}

fn cluster_shares() -> Vec<String> {
    vec!["E$".to_string(), "F$".to_string()]
}

fn fast_options() -> EngineOptions {
    EngineOptions {
        loop_interval: Duration::from_millis(100),
        min_free_disk_space: 0,
        disk_space_safety_margin: 0,
    }
}

fn raw_name(num: &str, project: &str, sensor: &str) -> String {
    format!("Lvl00-{num}-{project}-{sensor}-{SESSION}.raw")
}

fn test_raw_name(num: &str, project: &str, sensor: &str) -> String {
    format!("Lvl0X-{num}-T-{project}-{sensor}-{SESSION}.raw")
}

fn xml_name(num: &str, project: &str) -> String {
    format!("EAD-{num}-{project}-{SESSION}.xml")
}

fn seed(base: &Path, node: &str, share_dir: &str, project: &str, file: &str, len: usize) {
    let dir = base.join(node).join(share_dir).join(project);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join(file), vec![0xA5; len]).unwrap();
}

/// Seed one complete production capture, fragments spread over both shares.
fn seed_production_capture(base: &Path, project: &str, num: &str) {
    for i in 1..=13usize {
        let node = format!("WU{i:02}");
        let share_dir = if i % 2 == 0 { "F" } else { "E" };
        let sensor = format!("{i:02}-00");
        seed(
            base,
            &node,
            share_dir,
            project,
            &raw_name(num, project, &sensor),
            16 * 1024,
        );
    }
    seed(base, "CU", "E", project, &xml_name(num, project), 2 * 1024);
}

async fn wait_for(mut cond: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    cond()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn production_capture_completes_end_to_end() {
    let mounts = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    seed_production_capture(mounts.path(), "Alpha", "00001");

    let engine = SyncEngine::new(
        cluster_nodes(),
        cluster_shares(),
        mounts.path(),
        fast_options(),
    );
    engine
        .start("Alpha", dest.path().to_str().unwrap(), 4)
        .unwrap();

    let done = wait_for(
        || engine.status().completed_captures == 1,
        Duration::from_secs(15),
    )
    .await;
    assert!(done, "capture never completed: {:?}", engine.status());

    let status = engine.status();
    assert!(status.is_running);
    assert_eq!(status.project, "Alpha");
    assert_eq!(status.last_capture_number, "00001");
    assert_eq!(status.completed_test_captures, 0);

    engine.stop().await;
    let status = engine.status();
    assert!(!status.is_running);
    assert!(status.active_tasks.is_empty());

    // All 14 files mirrored flat under <dest>/Alpha with source mtimes.
    let dest_project = dest.path().join("Alpha");
    let copied: Vec<_> = fs::read_dir(&dest_project).unwrap().flatten().collect();
    assert_eq!(copied.len(), 14);

    let src = mounts
        .path()
        .join("WU01/E/Alpha")
        .join(raw_name("00001", "Alpha", "01-00"));
    let dst = dest_project.join(raw_name("00001", "Alpha", "01-00"));
    let src_mtime = filetime_secs(&src);
    let dst_mtime = filetime_secs(&dst);
    assert_eq!(src_mtime, dst_mtime);
}

fn filetime_secs(path: &Path) -> i64 {
    let meta = fs::metadata(path).unwrap();
    meta.modified()
        .unwrap()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_capture_completes_without_metadata() {
    let mounts = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();
    seed_production_capture(mounts.path(), "Alpha", "00001");
    for i in 1..=13usize {
        let node = format!("WU{i:02}");
        let sensor = format!("{i:02}-00");
        seed(
            mounts.path(),
            &node,
            "E",
            "Alpha",
            &test_raw_name("00002", "Alpha", &sensor),
            8 * 1024,
        );
    }

    let engine = SyncEngine::new(
        cluster_nodes(),
        cluster_shares(),
        mounts.path(),
        fast_options(),
    );
    engine
        .start("Alpha", dest.path().to_str().unwrap(), 4)
        .unwrap();

    let done = wait_for(
        || {
            let s = engine.status();
            s.completed_captures == 1 && s.completed_test_captures == 1
        },
        Duration::from_secs(15),
    )
    .await;
    assert!(done, "captures never completed: {:?}", engine.status());

    let status = engine.status();
    assert_eq!(status.last_capture_number, "00001");
    assert_eq!(status.last_test_capture_number, "00002");

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_worker_blocks_completion_without_errors() {
    let mounts = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();

    // WU07 never produced its fragment (mount subdirectory absent).
    for i in (1..=13usize).filter(|i| *i != 7) {
        let node = format!("WU{i:02}");
        let sensor = format!("{i:02}-00");
        seed(
            mounts.path(),
            &node,
            "E",
            "Alpha",
            &raw_name("00001", "Alpha", &sensor),
            4 * 1024,
        );
    }
    seed(
        mounts.path(),
        "CU",
        "E",
        "Alpha",
        &xml_name("00001", "Alpha"),
        1024,
    );

    let engine = SyncEngine::new(
        cluster_nodes(),
        cluster_shares(),
        mounts.path(),
        fast_options(),
    );
    engine
        .start("Alpha", dest.path().to_str().unwrap(), 4)
        .unwrap();

    // Let several loop iterations pass.
    tokio::time::sleep(Duration::from_millis(600)).await;

    let status = engine.status();
    assert!(status.is_running);
    assert_eq!(status.completed_captures, 0);
    assert!(status.active_tasks.iter().all(|t| t.node != "WU07"));

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stale_destination_is_overwritten_on_the_next_pass() {
    let mounts = tempfile::tempdir().unwrap();
    let dest = tempfile::tempdir().unwrap();

    let name = raw_name("00099", "Alpha", "01-00");
    seed(mounts.path(), "WU01", "E", "Alpha", &name, 200 * 1024);

    // Partial leftover from an interrupted run.
    let dest_project = dest.path().join("Alpha");
    fs::create_dir_all(&dest_project).unwrap();
    fs::write(dest_project.join(&name), vec![0u8; 100]).unwrap();

    let engine = SyncEngine::new(
        cluster_nodes(),
        cluster_shares(),
        mounts.path(),
        fast_options(),
    );
    engine
        .start("Alpha", dest.path().to_str().unwrap(), 2)
        .unwrap();

    let repaired = wait_for(
        || {
            fs::metadata(dest_project.join(&name))
                .map(|m| m.len() == 200 * 1024)
                .unwrap_or(false)
        },
        Duration::from_secs(15),
    )
    .await;
    assert!(repaired);

    engine.stop().await;

    // Stopped and restarted, the engine picks the project back up.
    engine
        .start("Alpha", dest.path().to_str().unwrap(), 2)
        .unwrap();
    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn discovers_projects_across_mounts() {
    let mounts = tempfile::tempdir().unwrap();
    let base = mounts.path();

    for dir in [
        "WU01/E/Alpha",
        "WU02/F/Alpha",
        "WU02/F/Beta",
        "WU01/E/System Volume Information",
        "WU01/E/$RECYCLE.BIN",
        "WU01/E/x",
        "CU/E/.config",
        "CU/E/logs",
    ] {
        fs::create_dir_all(base.join(dir)).unwrap();
    }
    // A plain file at share top level is not a project.
    fs::write(base.join("WU01/E/readme.txt"), b"hi").unwrap();

    let engine = SyncEngine::new(cluster_nodes(), cluster_shares(), base, fast_options());
    let mut projects = engine.find_projects(&CancellationToken::new()).await;
    projects.sort_by(|a, b| a.name.cmp(&b.name));

    let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);

    let alpha = &projects[0];
    assert!(
        alpha.source == "WU01/E$" || alpha.source == "WU02/F$",
        "unexpected source hint {}",
        alpha.source
    );
    assert_eq!(projects[1].source, "WU02/F$");
}
