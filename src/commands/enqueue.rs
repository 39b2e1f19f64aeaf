//! Implementation of the `sqlite-jobs enqueue` command.

use crate::cli::EnqueueArgs;
use chrono::Utc;
use sqlite_jobs::config::StorageOptions;
use sqlite_jobs::error::Result;
use sqlite_jobs::storage::{JobState, SqliteStorage};
use std::collections::BTreeMap;
use std::time::Duration;

/// Lifetime of a created job until its enqueue commits.
const CREATION_EXPIRY: Duration = Duration::from_secs(60 * 60);

/// Execute the `sqlite-jobs enqueue` command.
pub fn cmd_enqueue(options: StorageOptions, args: EnqueueArgs) -> Result<()> {
    let storage = SqliteStorage::open(options)?;
    let job_id = enqueue_job(&storage, &args.queue, &args.payload)?;

    println!("Enqueued job {} on queue '{}'.", job_id, args.queue);

    storage.shutdown();
    Ok(())
}

/// Create a job and enqueue it on `queue`, returning the job id.
///
/// The job is created with a one hour expiration; the write transaction
/// that enqueues it also records the Enqueued state and clears the
/// expiration, so a crash in between leaves only a job that expires.
pub(crate) fn enqueue_job(storage: &SqliteStorage, queue: &str, payload: &str) -> Result<String> {
    let job_id = storage.create_expired_job(
        payload,
        "[]",
        &BTreeMap::new(),
        Utc::now(),
        CREATION_EXPIRY,
    )?;

    let state = JobState::new("Enqueued")
        .with_reason("Enqueued from the command line")
        .with_data("Queue", queue)
        .with_data("EnqueuedAt", Utc::now().to_rfc3339());

    let mut transaction = storage.create_write_transaction();
    transaction.set_job_state(&job_id, &state)?;
    transaction.add_to_queue(queue, &job_id)?;
    transaction.persist_job(&job_id)?;
    transaction.commit()?;

    Ok(job_id)
}
