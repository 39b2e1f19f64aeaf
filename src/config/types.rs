//! Configuration types and defaults for sqlite-jobs.
//!
//! This module defines enums, constants, and default value functions
//! used by the StorageOptions struct.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tables holding rows with an `ExpireAt` column that the expiration
/// sweeper is allowed to reclaim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExpirableTable {
    AggregatedCounter,
    Job,
    List,
    Set,
    Hash,
}

impl ExpirableTable {
    /// All expirable tables, in the order they are swept by default.
    pub const ALL: [ExpirableTable; 5] = [
        ExpirableTable::AggregatedCounter,
        ExpirableTable::Job,
        ExpirableTable::List,
        ExpirableTable::Set,
        ExpirableTable::Hash,
    ];

    /// The SQL table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirableTable::AggregatedCounter => "AggregatedCounter",
            ExpirableTable::Job => "Job",
            ExpirableTable::List => "List",
            ExpirableTable::Set => "Set",
            ExpirableTable::Hash => "Hash",
        }
    }
}

impl std::fmt::Display for ExpirableTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Maximum stored length of a state transition reason.
pub const STATE_REASON_MAX_LENGTH: usize = 100;

// ============================================================================
// Default value functions
// ============================================================================

pub(crate) fn default_database_path() -> PathBuf {
    PathBuf::from("jobs.db")
}

pub(crate) fn default_queue_poll_interval_ms() -> u64 {
    15_000
}

pub(crate) fn default_invisibility_timeout_secs() -> u64 {
    30 * 60
}

pub(crate) fn default_lock_timeout_secs() -> u64 {
    15
}

pub(crate) fn default_command_timeout_ms() -> u64 {
    5_000
}

pub(crate) fn default_expiration_check_interval_secs() -> u64 {
    30 * 60
}

pub(crate) fn default_expiration_batch_size() -> u32 {
    1_000
}

pub(crate) fn default_expiration_lock_timeout_secs() -> u64 {
    5 * 60
}

pub fn default_expiration_tables() -> Vec<ExpirableTable> {
    ExpirableTable::ALL.to_vec()
}

pub(crate) fn default_true() -> bool {
    true
}
