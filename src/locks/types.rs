//! Resource names and lock listing structures.

use super::metadata::LockMetadata;
use std::path::PathBuf;
use std::time::Duration;

/// Resource guarding mutations of the `Set` table.
pub const SET_LOCK: &str = "Set:Lock";

/// Resource guarding mutations of the `List` table.
pub const LIST_LOCK: &str = "List:Lock";

/// Resource guarding mutations of the `Hash` table.
pub const HASH_LOCK: &str = "Hash:Lock";

/// Resource serializing expiration sweeps across processes.
pub const EXPIRATION_LOCK: &str = "locks:expirationmanager";

/// Default deadline of the collection locks.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(15);

/// Resource guarding state transitions of one job.
pub fn job_state_lock(job_id: i64) -> String {
    format!("Job:{}:State", job_id)
}

/// A lock file found in the lock directory.
#[derive(Debug, Clone)]
pub struct LockInfo {
    /// The lock file path.
    pub path: PathBuf,

    /// The decoded resource name.
    pub resource: String,

    /// Whether some process currently holds the lock.
    pub held: bool,

    /// Metadata written by the current (or last) holder, if any.
    pub metadata: Option<LockMetadata>,
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.metadata, self.held) {
            (Some(meta), true) => write!(
                f,
                "{} (HELD by {}{}, age: {})",
                self.resource,
                meta.owner,
                meta.pid.map(|p| format!(" pid {}", p)).unwrap_or_default(),
                meta.age_string()
            ),
            (None, true) => write!(f, "{} (HELD)", self.resource),
            (_, false) => write!(f, "{} (free)", self.resource),
        }
    }
}
