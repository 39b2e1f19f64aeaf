//! Implementation of the `sqlite-jobs locks` command.

use sqlite_jobs::config::StorageOptions;
use sqlite_jobs::error::Result;
use sqlite_jobs::locks::list_locks;

/// Execute the `sqlite-jobs locks` command.
///
/// Reads the lock directory directly; no database connection is opened.
pub fn cmd_locks(options: StorageOptions) -> Result<()> {
    let directory = options.resolved_lock_directory();
    let locks = list_locks(&directory)?;

    println!("Locks in {}", directory.display());
    println!();
    if locks.is_empty() {
        println!("No lock files.");
        return Ok(());
    }

    let held = locks.iter().filter(|l| l.held).count();
    for lock in &locks {
        println!("  {}", lock);
    }
    println!();
    println!("{} lock file(s), {} held.", locks.len(), held);
    Ok(())
}
