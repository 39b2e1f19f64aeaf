//! Options loading, validation, and derived values.

use super::model::StorageOptions;
use crate::error::{Result, StorageError};
use std::path::{Path, PathBuf};
use std::time::Duration;

impl StorageOptions {
    /// Options pointing at the given database file, everything else default.
    pub fn for_database<P: AsRef<Path>>(path: P) -> Self {
        Self {
            database_path: path.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Load options from a YAML file.
    ///
    /// # Returns
    ///
    /// * `Ok(StorageOptions)` - Successfully loaded and validated options
    /// * `Err(StorageError::Config)` - Read error, parse error or validation failure
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            StorageError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse options from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a map.
        let options: StorageOptions = if yaml.trim().is_empty() {
            StorageOptions::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| StorageError::Config(format!("failed to parse config YAML: {}", e)))?
        };

        options.validate()?;
        Ok(options)
    }

    /// Serialize options to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| StorageError::Config(format!("failed to serialize config to YAML: {}", e)))
    }

    /// Validate option values.
    ///
    /// Validation rules:
    /// - poll interval, invisibility timeout and batch size must be positive
    /// - dedicated queue tables must be plain identifiers, must not shadow
    ///   built-in tables, and a queue may be served by only one table
    pub fn validate(&self) -> Result<()> {
        if self.queue_poll_interval_ms == 0 {
            return Err(StorageError::Config(
                "queue_poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.invisibility_timeout_secs == 0 {
            return Err(StorageError::Config(
                "invisibility_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.expiration_batch_size == 0 {
            return Err(StorageError::Config(
                "expiration_batch_size must be greater than 0".to_string(),
            ));
        }

        let mut seen_queues = std::collections::HashSet::new();
        for (table, queues) in &self.dedicated_queues {
            if !is_identifier(table) {
                return Err(StorageError::Config(format!(
                    "dedicated queue table '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                    table
                )));
            }
            if RESERVED_TABLES.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                return Err(StorageError::Config(format!(
                    "dedicated queue table '{}' collides with a built-in table",
                    table
                )));
            }
            for queue in queues {
                if queue.trim().is_empty() {
                    return Err(StorageError::Config(format!(
                        "dedicated queue table '{}' lists an empty queue name",
                        table
                    )));
                }
                if !seen_queues.insert(queue.to_lowercase()) {
                    return Err(StorageError::Config(format!(
                        "queue '{}' is assigned to more than one dedicated table",
                        queue
                    )));
                }
            }
        }

        Ok(())
    }

    /// Directory holding the per-resource lock files.
    pub fn resolved_lock_directory(&self) -> PathBuf {
        match &self.lock_directory {
            Some(dir) => dir.clone(),
            None => {
                let mut name = self
                    .database_path
                    .file_name()
                    .map(|n| n.to_os_string())
                    .unwrap_or_else(|| "jobs.db".into());
                name.push(".locks");
                self.database_path.with_file_name(name)
            }
        }
    }

    pub fn queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.queue_poll_interval_ms)
    }

    pub fn invisibility_timeout(&self) -> Duration {
        Duration::from_secs(self.invisibility_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn expiration_check_interval(&self) -> Duration {
        Duration::from_secs(self.expiration_check_interval_secs)
    }

    pub fn expiration_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.expiration_lock_timeout_secs)
    }
}

const RESERVED_TABLES: [&str; 11] = [
    "Job",
    "State",
    "JobParameter",
    "JobQueue",
    "Server",
    "Counter",
    "AggregatedCounter",
    "Set",
    "List",
    "Hash",
    "sqlite_master",
];

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
