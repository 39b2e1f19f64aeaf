//! Command implementations for sqlite-jobs.
//!
//! This module resolves the storage options shared by every command and
//! routes CLI commands to their implementations.

mod enqueue;
mod fetch;
mod init;
mod lock;
mod locks;
mod sweep;

#[cfg(test)]
mod tests;

use crate::cli::{Cli, Command};
use sqlite_jobs::config::StorageOptions;
use sqlite_jobs::error::Result;
use std::path::Path;

/// Dispatch a command to its implementation.
///
/// This is the main entry point for command execution. Options are loaded
/// once here so every command sees the same database and lock directory.
pub fn dispatch(cli: Cli) -> Result<()> {
    let options = resolve_options(cli.config.as_deref(), cli.database.as_deref())?;

    match cli.command {
        Command::Init => init::cmd_init(options),
        Command::Enqueue(args) => enqueue::cmd_enqueue(options, args),
        Command::Fetch(args) => fetch::cmd_fetch(options, args),
        Command::Sweep => sweep::cmd_sweep(options),
        Command::Lock(args) => lock::cmd_lock(options, args),
        Command::Locks => locks::cmd_locks(options),
    }
}

/// Load options from `config` (defaults when absent), then apply the
/// `--database` override and validate the result.
pub(crate) fn resolve_options(
    config: Option<&Path>,
    database: Option<&Path>,
) -> Result<StorageOptions> {
    let mut options = match config {
        Some(path) => StorageOptions::load(path)?,
        None => StorageOptions::default(),
    };
    if let Some(database) = database {
        options.database_path = database.to_path_buf();
    }
    options.validate()?;
    Ok(options)
}
