//! Lock directory inspection.

use super::metadata::LockMetadata;
use super::system::{is_held, resource_from_file_name};
use super::types::LockInfo;
use crate::error::{Result, StorageError};
use std::fs;
use std::path::Path;
use tracing::debug;

/// List every lock file in `directory`, sorted by resource name.
///
/// A file is reported as held when probing it for an exclusive lock fails.
/// A missing directory yields an empty list.
///
/// # Arguments
///
/// * `directory` - The lock directory of a storage
///
/// # Returns
///
/// A vector of `LockInfo`, one per lock file.
pub fn list_locks(directory: &Path) -> Result<Vec<LockInfo>> {
    let mut locks = Vec::new();

    if !directory.exists() {
        return Ok(locks);
    }

    let entries = fs::read_dir(directory).map_err(|e| StorageError::io(directory, e))?;

    for entry in entries {
        let entry = entry.map_err(|e| StorageError::io(directory, e))?;
        let path = entry.path();

        let Some(resource) = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(resource_from_file_name)
        else {
            continue;
        };

        let held = is_held(&path)?;

        // Metadata of a free lock is normally empty; unreadable content is
        // reported as absent rather than failing the listing.
        let metadata = match LockMetadata::from_file(&path) {
            Ok(meta) => meta,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "skipping unreadable lock metadata");
                None
            }
        };

        locks.push(LockInfo {
            path,
            resource,
            held,
            metadata,
        });
    }

    locks.sort_by(|a, b| a.resource.cmp(&b.resource));
    Ok(locks)
}
