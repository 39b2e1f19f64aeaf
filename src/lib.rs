//! sqlite-jobs: background job storage shared by many processes through one
//! SQLite database file.
//!
//! The crate provides the concurrency core of such a storage:
//!
//! - [`locks`]: named, reentrant, cross-process locks backed by lock files
//! - [`queues`]: lease-based job queues with wake-ups and polling
//! - [`transaction`]: buffered write transactions with ordered locking
//! - [`expiration`]: batched removal of expired rows
//!
//! [`storage::SqliteStorage`] ties them to one database.

pub mod config;
pub mod db;
pub mod error;
pub mod exit_codes;
pub mod expiration;
pub mod locks;
pub mod logging;
pub mod queues;
pub mod signal;
pub mod storage;
pub mod transaction;

#[cfg(test)]
mod test_support;
