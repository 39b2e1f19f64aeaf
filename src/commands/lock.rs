//! Implementation of the `sqlite-jobs lock` command.

use crate::cli::LockArgs;
use sqlite_jobs::config::StorageOptions;
use sqlite_jobs::error::Result;
use sqlite_jobs::storage::SqliteStorage;
use std::thread;
use std::time::{Duration, Instant};

/// Execute the `sqlite-jobs lock` command.
///
/// Acquires the lock, holds it for `--hold-ms`, then releases it. Another
/// invocation started meanwhile waits for the release or times out.
pub fn cmd_lock(options: StorageOptions, args: LockArgs) -> Result<()> {
    let storage = SqliteStorage::open(options)?;

    let started = Instant::now();
    let token =
        storage.acquire_distributed_lock(&args.resource, Duration::from_millis(args.timeout_ms))?;
    println!(
        "Acquired lock '{}' after {}ms.",
        token.resource(),
        started.elapsed().as_millis()
    );

    if args.hold_ms > 0 {
        thread::sleep(Duration::from_millis(args.hold_ms));
    }
    token.release();
    println!("Released lock '{}'.", args.resource);

    storage.shutdown();
    Ok(())
}
