//! Implementation of the `sqlite-jobs fetch` command.

use crate::cli::FetchArgs;
use sqlite_jobs::config::StorageOptions;
use sqlite_jobs::error::{Result, StorageError};
use sqlite_jobs::queues::LeasedJob;
use sqlite_jobs::signal::CancellationToken;
use sqlite_jobs::storage::SqliteStorage;
use std::thread;
use std::time::Duration;

/// Execute the `sqlite-jobs fetch` command.
///
/// Blocks until a job is available on one of the queues, or until
/// `--wait-ms` elapses (exit code for a canceled operation).
pub fn cmd_fetch(options: StorageOptions, args: FetchArgs) -> Result<()> {
    let storage = SqliteStorage::open(options)?;

    let cancel = CancellationToken::new();
    if let Some(wait_ms) = args.wait_ms {
        let deadline = cancel.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(wait_ms));
            deadline.cancel();
        });
    }

    let (job, lease_held) = match fetch_job(&storage, &args.queues, &cancel, args.requeue) {
        Ok(fetched) => fetched,
        Err(StorageError::Canceled) => {
            println!("No job became available.");
            return Err(StorageError::Canceled);
        }
        Err(e) => return Err(e),
    };

    println!("Leased job {} from queue '{}'.", job.job_id, job.queue);
    println!("  Table:      {}", job.table());
    println!("  Locked by:  {}", job.locked_by);
    println!("  Fetched at: {}", job.fetched_at.to_rfc3339());
    if !lease_held {
        println!("Lease expired and was taken over by another worker; queue row left as is.");
    } else if args.requeue {
        println!("Job returned to the queue.");
    } else {
        println!("Job removed from the queue.");
    }

    storage.shutdown();
    Ok(())
}

/// Lease one job, then acknowledge it (or put it back).
///
/// The flag is `false` when the lease was lost before the acknowledgement.
pub(crate) fn fetch_job(
    storage: &SqliteStorage,
    queues: &[String],
    cancel: &CancellationToken,
    requeue: bool,
) -> Result<(LeasedJob, bool)> {
    let job = storage.fetch_next_job(queues, cancel)?;

    let conn = storage.connect()?;
    let session = sqlite_jobs::db::Session::new(&conn);
    let lease_held = if requeue {
        job.requeue(&session)?
    } else {
        job.remove_from_queue(&session)?
    };
    Ok((job, lease_held))
}
