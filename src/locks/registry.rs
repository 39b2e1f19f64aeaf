//! The per-process lock registry.

use super::guard::{LockBundle, ReleaseToken};
use super::system::SystemLock;
use super::types::{DEFAULT_LOCK_TIMEOUT, HASH_LOCK, LIST_LOCK, SET_LOCK};
use crate::error::{Result, StorageError, require_non_blank};
use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};
use uuid::Uuid;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(25);

/// A resource owned by this process.
#[derive(Debug)]
struct LockEntry {
    /// Thread whose acquisitions are reentrant.
    owner: ThreadId,
    system: SystemLock,
    pending_holders: HashSet<Uuid>,
}

/// State shared between a registry and the tokens it issued.
#[derive(Debug)]
pub(crate) struct Inner {
    directory: PathBuf,
    /// `None` once the registry has been shut down.
    entries: RwLock<Option<HashMap<String, LockEntry>>>,
}

impl Inner {
    pub(super) fn release(&self, resource: &str, holder: Uuid) {
        let mut entries = self.entries.write();
        let Some(map) = entries.as_mut() else {
            return;
        };
        let Some(entry) = map.get_mut(resource) else {
            return;
        };
        if !entry.pending_holders.remove(&holder) {
            return;
        }

        if entry.pending_holders.is_empty()
            && let Some(entry) = map.remove(resource)
        {
            debug!(resource, path = %entry.system.path().display(), "lock released");
        } else {
            trace!(resource, "reentrant holder released");
        }
    }
}

/// Cross-process, reference-counted locks over named resources.
///
/// Each resource maps to a lock file in the registry's directory. The
/// first acquisition in this process takes the OS lock on that file;
/// further acquisitions from the same thread only add a holder, and the OS
/// lock is dropped when the last holder releases. A different thread of
/// the same process waits as another process would.
///
/// Cloning the registry shares the same state.
#[derive(Debug, Clone)]
pub struct LockRegistry {
    inner: Arc<Inner>,
}

impl LockRegistry {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        Self {
            inner: Arc::new(Inner {
                directory: directory.as_ref().to_path_buf(),
                entries: RwLock::new(Some(HashMap::new())),
            }),
        }
    }

    /// Directory holding the lock files.
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Acquire `resource`, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - blank resource name
    /// * `LockTimeout` - another holder kept the resource past the deadline
    /// * `RegistryDisposed` - the registry was shut down
    pub fn acquire(&self, resource: &str, timeout: Duration) -> Result<ReleaseToken> {
        require_non_blank(resource, "resource")?;

        // A timeout too large to represent waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if let Some(token) = self.try_acquire(resource)? {
                return Ok(token);
            }

            let mut pause = backoff;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    debug!(resource, ?timeout, "lock acquisition timed out");
                    return Err(StorageError::LockTimeout {
                        resource: resource.to_string(),
                        timeout,
                    });
                }
                pause = pause.min(deadline - now);
            }
            thread::sleep(pause);
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Acquire every resource in the given order.
    ///
    /// Locks already taken are released before the error is returned when
    /// a later acquisition fails. Callers that need deadlock freedom pass a
    /// sorted sequence.
    pub fn lock_all<I, S>(&self, resources: I, timeout: Duration) -> Result<LockBundle>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bundle = LockBundle::default();
        for resource in resources {
            bundle.push(self.acquire(resource.as_ref(), timeout)?);
        }
        Ok(bundle)
    }

    pub fn acquire_set_lock(&self) -> Result<ReleaseToken> {
        self.acquire(SET_LOCK, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn acquire_list_lock(&self) -> Result<ReleaseToken> {
        self.acquire(LIST_LOCK, DEFAULT_LOCK_TIMEOUT)
    }

    pub fn acquire_hash_lock(&self) -> Result<ReleaseToken> {
        self.acquire(HASH_LOCK, DEFAULT_LOCK_TIMEOUT)
    }

    /// Number of outstanding tokens this process holds for `resource`.
    pub fn holder_count(&self, resource: &str) -> usize {
        self.inner
            .entries
            .read()
            .as_ref()
            .and_then(|map| map.get(resource))
            .map_or(0, |entry| entry.pending_holders.len())
    }

    /// Release every held OS lock and reject further use.
    ///
    /// Idempotent. Tokens still alive afterwards release as no-ops.
    pub fn shutdown(&self) {
        let entries = self.inner.entries.write().take();
        if let Some(map) = entries {
            info!(
                directory = %self.inner.directory.display(),
                held = map.len(),
                "lock registry shut down"
            );
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.entries.read().is_none()
    }

    /// One non-blocking attempt. `Ok(None)` means someone else holds it.
    fn try_acquire(&self, resource: &str) -> Result<Option<ReleaseToken>> {
        let entries = self.inner.entries.upgradable_read();
        let map = entries.as_ref().ok_or(StorageError::RegistryDisposed)?;
        let me = thread::current().id();

        let reentrant = match map.get(resource) {
            Some(entry) if entry.owner == me => true,
            Some(_) => return Ok(None),
            None => false,
        };

        let system = if reentrant {
            None
        } else {
            match SystemLock::try_acquire(&self.inner.directory, resource)? {
                Some(system) => Some(system),
                None => return Ok(None),
            }
        };

        let holder = Uuid::new_v4();
        let mut entries = RwLockUpgradableReadGuard::upgrade(entries);
        let map = entries.as_mut().ok_or(StorageError::RegistryDisposed)?;
        match system {
            Some(system) => {
                debug!(resource, path = %system.path().display(), "lock acquired");
                map.insert(
                    resource.to_string(),
                    LockEntry {
                        owner: me,
                        system,
                        pending_holders: HashSet::from([holder]),
                    },
                );
            }
            None => {
                if let Some(entry) = map.get_mut(resource) {
                    entry.pending_holders.insert(holder);
                }
                trace!(resource, "reentrant acquisition");
            }
        }

        Ok(Some(ReleaseToken::new(
            Arc::clone(&self.inner),
            resource.to_string(),
            holder,
        )))
    }
}
