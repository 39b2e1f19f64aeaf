//! CLI argument parsing for sqlite-jobs.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sqlite-jobs: background job storage shared by many processes through
/// one SQLite database file.
///
/// Every command opens the database named by the configuration (or
/// `--database`), so several invocations running at once exercise the
/// same locks and queues as cooperating worker processes would.
#[derive(Parser, Debug)]
#[command(name = "sqlite-jobs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// YAML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database file, overriding the configured one.
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Emit logs as JSON lines instead of the compact format.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for sqlite-jobs.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Install the schema, including dedicated queue tables.
    ///
    /// Idempotent: running it against an installed database changes nothing.
    Init,

    /// Create a job and enqueue it.
    ///
    /// The job is created, moved to the Enqueued state and added to the
    /// queue in one write transaction.
    Enqueue(EnqueueArgs),

    /// Lease the next job from one or more queues.
    ///
    /// The leased job is removed from the queue, or put back with
    /// `--requeue`.
    Fetch(FetchArgs),

    /// Run one expiration sweep and print what it removed.
    Sweep,

    /// Hold a distributed lock for a while.
    Lock(LockArgs),

    /// List lock files and whether each one is currently held.
    Locks,
}

/// Arguments for the `enqueue` command.
#[derive(Parser, Debug)]
pub struct EnqueueArgs {
    /// Queue to add the job to.
    #[arg(short, long, default_value = "default")]
    pub queue: String,

    /// Invocation data stored with the job.
    #[arg(short, long, default_value = "{}")]
    pub payload: String,
}

/// Arguments for the `fetch` command.
#[derive(Parser, Debug)]
pub struct FetchArgs {
    /// Queues to fetch from, all served by the same queue table.
    #[arg(short, long, value_delimiter = ',', default_value = "default")]
    pub queues: Vec<String>,

    /// Give up after this many milliseconds (wait forever when omitted).
    #[arg(long)]
    pub wait_ms: Option<u64>,

    /// Put the job back instead of removing it.
    #[arg(long)]
    pub requeue: bool,
}

/// Arguments for the `lock` command.
#[derive(Parser, Debug)]
pub struct LockArgs {
    /// Resource name to lock.
    pub resource: String,

    /// How long to wait for the lock.
    #[arg(long, default_value_t = 15_000)]
    pub timeout_ms: u64,

    /// How long to hold the lock once acquired.
    #[arg(long, default_value_t = 0)]
    pub hold_ms: u64,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
