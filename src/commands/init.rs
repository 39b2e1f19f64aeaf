//! Implementation of the `sqlite-jobs init` command.

use sqlite_jobs::config::StorageOptions;
use sqlite_jobs::error::Result;
use sqlite_jobs::storage::SqliteStorage;

/// Execute the `sqlite-jobs init` command.
///
/// This command is **idempotent**: tables that already exist are left
/// untouched, so it can be run against a live database.
pub fn cmd_init(mut options: StorageOptions) -> Result<()> {
    // Installing is the point of this command, whatever the config says.
    options.prepare_schema_if_necessary = true;
    let storage = SqliteStorage::open(options)?;

    println!("Initialized job storage.");
    println!();
    println!(
        "Database:        {}",
        storage.options().database_path.display()
    );
    println!("Lock directory:  {}", storage.locks().directory().display());
    println!();
    println!("Queue tables:");
    for table in storage.queue_providers().tables() {
        println!("  {}", table);
    }

    storage.shutdown();
    Ok(())
}
