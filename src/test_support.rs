use crate::config::StorageOptions;
use crate::db::{NoParams, Session};
use crate::storage::SqliteStorage;
use std::time::Duration;
use tempfile::TempDir;

/// Options for a storage inside `temp_dir` with short waits, so tests that
/// poll or lock finish quickly.
pub(crate) fn test_options(temp_dir: &TempDir) -> StorageOptions {
    let mut options = StorageOptions::for_database(temp_dir.path().join("jobs.db"));
    options.queue_poll_interval_ms = 50;
    options.lock_timeout_secs = 5;
    options.command_timeout_ms = 10_000;
    options.expiration_lock_timeout_secs = 5;
    options
}

pub(crate) fn create_test_storage() -> (TempDir, SqliteStorage) {
    create_test_storage_with(|_| {})
}

pub(crate) fn create_test_storage_with(
    configure: impl FnOnce(&mut StorageOptions),
) -> (TempDir, SqliteStorage) {
    let temp_dir = TempDir::new().unwrap();
    let mut options = test_options(&temp_dir);
    configure(&mut options);
    let storage = SqliteStorage::open(options).unwrap();
    (temp_dir, storage)
}

/// Create a job that expires in an hour and return its id.
pub(crate) fn create_job(storage: &SqliteStorage) -> String {
    storage
        .create_expired_job(
            r#"{"Type":"Demo","Method":"Run"}"#,
            "[]",
            &Default::default(),
            chrono::Utc::now(),
            Duration::from_secs(3600),
        )
        .unwrap()
}

/// Row count of `table`.
pub(crate) fn count_rows(storage: &SqliteStorage, table: &str) -> i64 {
    let conn = storage.connect().unwrap();
    Session::new(&conn)
        .execute_scalar::<i64>(&format!("SELECT COUNT(*) FROM [{}]", table), &NoParams)
        .unwrap()
        .unwrap_or(0)
}
