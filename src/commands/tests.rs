//! Tests for command helpers that run against a real database.

use super::enqueue::enqueue_job;
use super::fetch::fetch_job;
use super::resolve_options;
use sqlite_jobs::error::StorageError;
use sqlite_jobs::locks::{LockRegistry, list_locks};
use sqlite_jobs::signal::CancellationToken;
use sqlite_jobs::storage::SqliteStorage;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

fn open_storage(temp_dir: &TempDir) -> SqliteStorage {
    let database = temp_dir.path().join("jobs.db");
    let options = resolve_options(None, Some(database.as_path())).unwrap();
    SqliteStorage::open(options).unwrap()
}

#[test]
fn test_resolve_options_reads_config_and_applies_override() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("jobs.yaml");
    fs::write(
        &config,
        "database_path: from-config.db\nqueue_poll_interval_ms: 250\n",
    )
    .unwrap();

    let options = resolve_options(Some(config.as_path()), None).unwrap();
    assert_eq!(options.database_path.to_str(), Some("from-config.db"));
    assert_eq!(options.queue_poll_interval_ms, 250);

    let override_path = temp_dir.path().join("override.db");
    let options = resolve_options(Some(config.as_path()), Some(override_path.as_path())).unwrap();
    assert_eq!(options.database_path, override_path);
}

#[test]
fn test_resolve_options_rejects_invalid_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = temp_dir.path().join("jobs.yaml");
    fs::write(&config, "expiration_batch_size: 0\n").unwrap();

    let err = resolve_options(Some(config.as_path()), None).unwrap_err();
    assert!(matches!(err, StorageError::Config(_)));
}

#[test]
fn test_enqueued_job_can_be_fetched_and_acknowledged() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(&temp_dir);

    let job_id = enqueue_job(&storage, "default", r#"{"Type":"Demo"}"#).unwrap();
    let job = storage.get_job_data(&job_id).unwrap().unwrap();
    assert_eq!(job.state_name.as_deref(), Some("Enqueued"));
    assert!(job.expire_at.is_none());

    let queues = vec!["default".to_string()];
    let (leased, lease_held) =
        fetch_job(&storage, &queues, &CancellationToken::new(), false).unwrap();
    assert_eq!(leased.job_id.to_string(), job_id);
    assert!(lease_held);

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(matches!(
        fetch_job(&storage, &queues, &cancel, false),
        Err(StorageError::Canceled)
    ));
}

#[test]
fn test_requeued_job_is_fetched_again() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(&temp_dir);
    let job_id = enqueue_job(&storage, "default", "{}").unwrap();

    let queues = vec!["default".to_string()];
    let (first, _) = fetch_job(&storage, &queues, &CancellationToken::new(), true).unwrap();
    let (second, _) = fetch_job(&storage, &queues, &CancellationToken::new(), false).unwrap();

    assert_eq!(first.job_id.to_string(), job_id);
    assert_eq!(second.id, first.id);
}

#[test]
fn test_lock_files_are_listed_as_held_or_free() {
    let temp_dir = TempDir::new().unwrap();
    let storage = open_storage(&temp_dir);

    let held = storage
        .acquire_distributed_lock("recurring-jobs", Duration::from_secs(1))
        .unwrap();
    let other_process = LockRegistry::new(storage.locks().directory());
    other_process
        .acquire("released", Duration::from_secs(1))
        .unwrap()
        .release();

    let locks = list_locks(storage.locks().directory()).unwrap();
    let names: Vec<_> = locks.iter().map(|l| l.resource.as_str()).collect();
    assert_eq!(names, vec!["recurring-jobs", "released"]);
    assert!(locks[0].held);
    assert!(!locks[1].held);

    held.release();
}
