//! Lock registry for sqlite-jobs.
//!
//! SQLite gives no advisory locking across processes, so named resources
//! are locked through the filesystem:
//! - `Set:Lock`, `List:Lock`, `Hash:Lock` guard the shared collections
//! - `Job:<id>:State` guards one job's state transitions
//! - `locks:expirationmanager` serializes expiration sweeps
//! - any other non-blank name is available to callers as a distributed lock
//!
//! # Lock Files
//!
//! Each resource has a file in the lock directory (by default
//! `<database>.locks/`). Owning a resource means holding an exclusive OS
//! lock on that file. The OS drops the lock when the handle closes, so a
//! crashed process never leaves a resource locked.
//!
//! # Lock Metadata
//!
//! While held, a lock file contains JSON metadata:
//! - `owner`: The owner of the lock (e.g., `user@HOST`)
//! - `pid`: The process ID
//! - `resource`: The resource name
//! - `created_at`: RFC3339 timestamp
//!
//! # Reentrancy
//!
//! The thread holding a resource may acquire it again without blocking.
//! Each acquisition returns a [`ReleaseToken`]; the OS lock is released when
//! the last outstanding token for the resource is dropped.

mod guard;
mod metadata;
mod operations;
mod registry;
mod system;
mod types;


// Re-export public API
pub use guard::{LockBundle, ReleaseToken};
pub use metadata::LockMetadata;
pub use operations::list_locks;
pub use registry::LockRegistry;
pub use types::{
    DEFAULT_LOCK_TIMEOUT, EXPIRATION_LOCK, HASH_LOCK, LIST_LOCK, LockInfo, SET_LOCK,
    job_state_lock,
};
