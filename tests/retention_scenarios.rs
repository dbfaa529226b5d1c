//! End-to-end retention behaviour against real directory trees.

use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use common::testing::TestConfigBuilder;
use retention::{
    DeleteOutcome, DeletionCause, RetentionEngine, RetentionMetrics, compute_size, select_victim,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("retention=debug,info")
        .with_test_writer()
        .try_init();
}

fn write_with_mtime(path: &Path, len: usize, secs: u64) {
    fs::write(path, vec![0u8; len]).unwrap();
    fs::File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

#[tokio::test]
async fn scenario_oldest_file_is_evicted_first() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("A");
    let b = dir.path().join("B");
    write_with_mtime(&a, 100, 1);
    write_with_mtime(&b, 100, 2);

    let config = TestConfigBuilder::new(dir.path()).with_ceiling(150).build();
    let mut engine = RetentionEngine::new(&config, RetentionMetrics::new());

    let report = engine.run_size_check().await.unwrap();

    assert!(!a.exists());
    assert!(b.exists());
    assert_eq!(report.final_bytes, 100);
    assert_eq!(compute_size(dir.path()).unwrap(), 100);
}

#[tokio::test]
async fn scenario_only_excluded_files_left() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let c = dir.path().join("C.keep");
    write_with_mtime(&c, 1000, 1);

    let config = TestConfigBuilder::new(dir.path())
        .with_ceiling(10)
        .with_exclusions(&[".keep"])
        .build();
    let mut engine = RetentionEngine::new(&config, RetentionMetrics::new());

    assert!(select_victim(dir.path(), engine.rules()).unwrap().is_none());

    let report = engine.run_size_check().await.unwrap();
    assert!(report.policy_exhausted);
    assert!(c.exists());

    // a later trigger reports the same thing and still keeps C
    let report = engine.run_size_check().await.unwrap();
    assert!(report.policy_exhausted);
    assert!(c.exists());
    assert_eq!(engine.metrics().policy_exhausted(), 2);
}

#[tokio::test]
async fn scenario_new_file_expires_under_ceiling() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let d = dir.path().join("D");
    fs::write(&d, vec![0u8; 10]).unwrap();

    let config = TestConfigBuilder::new(dir.path()).watching(7).build();
    let mut engine = RetentionEngine::new(&config, RetentionMetrics::new());

    let created_at = Utc::now();
    let outcome = engine.handle_created(&d).await.unwrap().unwrap();
    let deadline = outcome.deadline.unwrap();
    assert!(deadline >= created_at + chrono::Duration::days(7));
    assert!(deadline <= Utc::now() + chrono::Duration::days(7));
    assert!(outcome.size_check.evicted.is_empty());

    let fired = engine.fire_due_expirations(deadline).await;
    assert_eq!(fired.len(), 1);
    assert!(!d.exists());
}

#[tokio::test]
async fn scenario_deadline_after_eviction_is_noop() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let e = dir.path().join("E");
    let f = dir.path().join("F");

    let config = TestConfigBuilder::new(dir.path())
        .with_ceiling(150)
        .watching(7)
        .build();
    let mut engine = RetentionEngine::new(&config, RetentionMetrics::new());

    write_with_mtime(&e, 100, 1);
    let e_deadline = engine
        .handle_created(&e)
        .await
        .unwrap()
        .unwrap()
        .deadline
        .unwrap();

    // a newer file pushes the tree over the ceiling and E goes first
    write_with_mtime(&f, 100, 2);
    let outcome = engine.handle_created(&f).await.unwrap().unwrap();
    assert_eq!(outcome.size_check.evicted.len(), 1);
    assert!(!e.exists());
    assert!(f.exists());

    let fired = engine.fire_due_expirations(e_deadline).await;
    assert!(fired.iter().all(|(path, _)| path != &e));

    let outcome = engine.on_deadline(&e).await;
    assert!(matches!(outcome, DeleteOutcome::AlreadyAbsent));
    assert!(f.exists());
    assert_eq!(compute_size(dir.path()).unwrap(), 100);
}

#[tokio::test]
async fn excluded_paths_are_never_selected_or_scheduled() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("index")).unwrap();
    let keep = dir.path().join("index/segments.idx");
    let data = dir.path().join("data.bin");
    write_with_mtime(&keep, 100, 1);
    write_with_mtime(&data, 100, 2);

    let config = TestConfigBuilder::new(dir.path())
        .with_ceiling(0)
        .with_exclusions(&[".idx"])
        .watching(7)
        .build();
    let mut engine = RetentionEngine::new(&config, RetentionMetrics::new());

    assert_eq!(engine.reconcile_expirations().await.unwrap(), 1);
    assert!(!engine.is_scheduled(&keep));
    assert!(engine.is_scheduled(&data));

    let report = engine.run_size_check().await.unwrap();
    assert!(report.policy_exhausted);
    assert!(keep.exists());
    assert!(!data.exists());

    assert!(matches!(
        engine.delete(&keep, DeletionCause::Expiration).await,
        DeleteOutcome::Excluded
    ));
}

#[tokio::test]
async fn find_unscheduled_is_empty_the_second_time() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    for name in ["a", "b", "c"] {
        fs::write(dir.path().join(name), b"x").unwrap();
    }

    let config = TestConfigBuilder::new(dir.path()).watching(7).build();
    let mut engine = RetentionEngine::new(&config, RetentionMetrics::new());

    assert_eq!(engine.reconcile_expirations().await.unwrap(), 3);
    assert_eq!(engine.reconcile_expirations().await.unwrap(), 0);

    fs::write(dir.path().join("d"), b"x").unwrap();
    assert_eq!(engine.reconcile_expirations().await.unwrap(), 1);
}

#[tokio::test]
async fn full_walk_and_incremental_agree_after_activity() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    write_with_mtime(&dir.path().join("seed"), 50, 1);

    let config = TestConfigBuilder::new(dir.path())
        .with_ceiling(120)
        .watching(7)
        .incremental()
        .build();
    let mut engine = RetentionEngine::new(&config, RetentionMetrics::new());
    engine.run_size_check().await.unwrap();

    for (i, name) in ["one", "two", "three"].iter().enumerate() {
        let path = dir.path().join(name);
        write_with_mtime(&path, 40, 10 + i as u64);
        engine.handle_created(&path).await.unwrap();
    }

    let on_disk = compute_size(dir.path()).unwrap();
    assert!(on_disk <= 120);
    assert_eq!(engine.tracked_size(), Some(on_disk));
    assert!(!dir.path().join("seed").exists());
}
