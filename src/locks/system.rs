//! OS-level named mutex backed by an exclusively locked file.
//!
//! One file per resource name lives in the lock directory. Holding the OS
//! lock on that file is what "owning the resource" means across processes;
//! the lock goes away when the handle is closed, including when the holding
//! process dies.

use super::metadata::LockMetadata;
use crate::error::{Result, StorageError};
use fs4::fs_std::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

const LOCK_EXTENSION: &str = "lock";

/// A held OS lock. Dropping it closes the file and releases the lock.
#[derive(Debug)]
pub(crate) struct SystemLock {
    file: File,
    path: PathBuf,
}

impl SystemLock {
    /// Try once to take the OS lock for `resource` without blocking.
    ///
    /// Returns `Ok(None)` when some other handle holds it.
    pub(crate) fn try_acquire(directory: &Path, resource: &str) -> Result<Option<Self>> {
        if !directory.exists() {
            fs::create_dir_all(directory).map_err(|e| StorageError::io(directory, e))?;
        }

        let path = directory.join(lock_file_name(resource));
        let file = open_lock_file(&path)?;

        let acquired = FileExt::try_lock_exclusive(&file).map_err(|e| StorageError::io(&path, e))?;
        if !acquired {
            return Ok(None);
        }

        let mut lock = SystemLock { file, path };
        if let Err(e) = lock.write_metadata(resource) {
            warn!(path = %lock.path.display(), error = %e, "failed to write lock metadata");
        }
        Ok(Some(lock))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    fn write_metadata(&mut self, resource: &str) -> Result<()> {
        let json = LockMetadata::new(resource).to_json()?;
        let io_err = |e| StorageError::io(&self.path, e);
        self.file.set_len(0).map_err(io_err)?;
        self.file.seek(SeekFrom::Start(0)).map_err(io_err)?;
        self.file.write_all(json.as_bytes()).map_err(io_err)?;
        self.file.flush().map_err(io_err)
    }
}

impl Drop for SystemLock {
    fn drop(&mut self) {
        // Leave the file in place: deleting it would let a waiter lock an
        // unlinked inode while a newcomer locks a fresh one.
        if let Err(e) = self.file.set_len(0) {
            warn!(path = %self.path.display(), error = %e, "failed to clear lock metadata");
        }
    }
}

/// Probe whether some handle currently holds the lock file at `path`.
pub(crate) fn is_held(path: &Path) -> Result<bool> {
    let file = open_lock_file(path)?;
    let acquired = FileExt::try_lock_exclusive(&file).map_err(|e| StorageError::io(path, e))?;
    // The probe's own lock is released when `file` is closed.
    Ok(!acquired)
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| StorageError::io(path, e))
}

/// Encode a resource name into a file name.
///
/// Bytes outside `[A-Za-z0-9._-]` become `~XX` (uppercase hex), so the
/// mapping is reversible and distinct names never share a file.
pub(crate) fn lock_file_name(resource: &str) -> String {
    let mut name = String::with_capacity(resource.len() + LOCK_EXTENSION.len() + 1);
    for byte in resource.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            name.push(byte as char);
        } else {
            name.push_str(&format!("~{:02X}", byte));
        }
    }
    name.push('.');
    name.push_str(LOCK_EXTENSION);
    name
}

/// Decode a file name produced by [`lock_file_name`].
pub(crate) fn resource_from_file_name(file_name: &str) -> Option<String> {
    let encoded = file_name.strip_suffix(LOCK_EXTENSION)?.strip_suffix('.')?;

    let mut bytes = Vec::with_capacity(encoded.len());
    let mut iter = encoded.bytes();
    while let Some(byte) = iter.next() {
        if byte == b'~' {
            let hi = iter.next()?;
            let lo = iter.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            bytes.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes).ok()
}
