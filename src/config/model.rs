//! StorageOptions struct definition and default implementation.

use super::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Configuration for a SQLite job storage.
///
/// Loaded from YAML. Unknown fields are ignored for forward compatibility
/// and every field falls back to its default when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    // =========================================================================
    // Database settings
    // =========================================================================
    /// Path to the SQLite database file shared by every process.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Directory holding one lock file per resource name.
    /// Defaults to `<database_path>.locks` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_directory: Option<PathBuf>,

    /// Whether the schema is installed when the storage is opened.
    #[serde(default = "default_true")]
    pub prepare_schema_if_necessary: bool,

    /// SQLite busy timeout applied to every connection.
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    // =========================================================================
    // Queue settings
    // =========================================================================
    /// Upper bound between two claim attempts of a waiting fetch.
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,

    /// Age after which a claimed but unacknowledged row may be claimed again.
    #[serde(default = "default_invisibility_timeout_secs")]
    pub invisibility_timeout_secs: u64,

    /// Queue tables other than `JobQueue`, keyed by table name, with the
    /// queue names each one serves.
    #[serde(default)]
    pub dedicated_queues: BTreeMap<String, Vec<String>>,

    // =========================================================================
    // Lock settings
    // =========================================================================
    /// Deadline for the locks a write transaction declares.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    // =========================================================================
    // Expiration settings
    // =========================================================================
    /// Pause between two expiration sweeps.
    #[serde(default = "default_expiration_check_interval_secs")]
    pub expiration_check_interval_secs: u64,

    /// Maximum rows deleted by one pass.
    #[serde(default = "default_expiration_batch_size")]
    pub expiration_batch_size: u32,

    /// Deadline for the expiration lock.
    #[serde(default = "default_expiration_lock_timeout_secs")]
    pub expiration_lock_timeout_secs: u64,

    /// Tables swept, in order.
    #[serde(default = "default_expiration_tables")]
    pub expiration_tables: Vec<ExpirableTable>,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            lock_directory: None,
            prepare_schema_if_necessary: default_true(),
            command_timeout_ms: default_command_timeout_ms(),
            queue_poll_interval_ms: default_queue_poll_interval_ms(),
            invisibility_timeout_secs: default_invisibility_timeout_secs(),
            dedicated_queues: BTreeMap::new(),
            lock_timeout_secs: default_lock_timeout_secs(),
            expiration_check_interval_secs: default_expiration_check_interval_secs(),
            expiration_batch_size: default_expiration_batch_size(),
            expiration_lock_timeout_secs: default_expiration_lock_timeout_secs(),
            expiration_tables: default_expiration_tables(),
        }
    }
}
