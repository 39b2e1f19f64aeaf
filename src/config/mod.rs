//! Configuration model for sqlite-jobs.
//!
//! This module defines the `StorageOptions` struct loaded from a YAML file.
//! It supports forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for optional fields, and validation of option values.

mod model;
mod operations;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use model::StorageOptions;
pub use types::{ExpirableTable, STATE_REASON_MAX_LENGTH};
