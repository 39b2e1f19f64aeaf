//! Implementation of the `sqlite-jobs sweep` command.

use sqlite_jobs::config::StorageOptions;
use sqlite_jobs::error::Result;
use sqlite_jobs::signal::CancellationToken;
use sqlite_jobs::storage::SqliteStorage;

/// Execute the `sqlite-jobs sweep` command.
///
/// Runs a single pass over every configured table. The first table failure,
/// if any, becomes the command's error after the full report is printed.
pub fn cmd_sweep(options: StorageOptions) -> Result<()> {
    let storage = SqliteStorage::open(options)?;
    let report = storage
        .expiration_manager()
        .execute(&CancellationToken::new());

    println!("Expiration sweep");
    println!("================");
    println!();
    print!("{}", report);
    println!();
    println!("Total removed: {}", report.total_deleted());

    storage.shutdown();
    match report.failures.into_iter().next() {
        Some((_, error)) => Err(error),
        None => Ok(()),
    }
}
