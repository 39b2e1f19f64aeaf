//! Expiration sweeper.
//!
//! Deletes rows whose `ExpireAt` is in the past, one table at a time, in
//! passes of at most `expiration_batch_size` rows. Small passes keep each
//! statement's footprint bounded. Every table is swept under the
//! `locks:expirationmanager` lock in its own database transaction, so a
//! failure on one table neither undoes nor prevents the others.


use crate::config::ExpirableTable;
use crate::db::{Bind, IsolationLevel, Session, to_db_time};
use crate::error::{Result, StorageError};
use crate::locks::EXPIRATION_LOCK;
use crate::signal::CancellationToken;
use crate::storage::SqliteStorage;
use chrono::Utc;
use rusqlite::types::ToSql;
use std::fmt;
use tracing::{debug, info, trace, warn};

struct ExpiredBatch {
    now: String,
    limit: i64,
}

impl Bind for ExpiredBatch {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":now", &self.now), (":limit", &self.limit)]
    }
}

/// Outcome of sweeping one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSweep {
    pub table: ExpirableTable,
    pub deleted: usize,
    pub passes: usize,
}

/// Outcome of one sweep over every configured table.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub tables: Vec<TableSweep>,
    pub failures: Vec<(ExpirableTable, StorageError)>,
    /// Set when cancellation stopped the sweep before the last table.
    pub canceled: bool,
}

impl SweepReport {
    pub fn total_deleted(&self) -> usize {
        self.tables.iter().map(|t| t.deleted).sum()
    }

    pub fn deleted_from(&self, table: ExpirableTable) -> usize {
        self.tables
            .iter()
            .filter(|t| t.table == table)
            .map(|t| t.deleted)
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.canceled
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for sweep in &self.tables {
            writeln!(
                f,
                "{:<18} deleted {} row(s) in {} pass(es)",
                sweep.table, sweep.deleted, sweep.passes
            )?;
        }
        for (table, error) in &self.failures {
            writeln!(f, "{:<18} FAILED: {}", table, error)?;
        }
        if self.canceled {
            writeln!(f, "sweep canceled")?;
        }
        Ok(())
    }
}

/// Periodic cleanup of expired rows.
#[derive(Debug)]
pub struct ExpirationManager<'a> {
    storage: &'a SqliteStorage,
}

impl<'a> ExpirationManager<'a> {
    pub fn new(storage: &'a SqliteStorage) -> Self {
        Self { storage }
    }

    /// Sweep every configured table once.
    ///
    /// Per-table failures are logged and collected in the report; they do
    /// not stop the sweep. Cancellation is checked between tables.
    pub fn execute(&self, cancel: &CancellationToken) -> SweepReport {
        let options = self.storage.options();
        let now = to_db_time(Utc::now());
        let mut report = SweepReport::default();

        for &table in &options.expiration_tables {
            if cancel.is_cancelled() {
                report.canceled = true;
                break;
            }

            debug!(%table, "removing outdated records");
            match self.sweep_table(table, &now) {
                Ok(sweep) => {
                    trace!(%table, deleted = sweep.deleted, passes = sweep.passes, "outdated records removed");
                    report.tables.push(sweep);
                }
                Err(e) => {
                    warn!(%table, error = %e, "failed to remove outdated records");
                    report.failures.push((table, e));
                }
            }
        }

        let deleted = report.total_deleted();
        if deleted > 0 {
            info!(deleted, "expired records removed");
        }
        report
    }

    /// Sweep until cancelled, pausing for the check interval between runs.
    pub fn run(&self, cancel: &CancellationToken) {
        let interval = self.storage.options().expiration_check_interval();
        info!(?interval, "expiration manager started");
        loop {
            self.execute(cancel);
            if cancel.wait_timeout(interval) {
                break;
            }
        }
        info!("expiration manager stopped");
    }

    fn sweep_table(&self, table: ExpirableTable, now: &str) -> Result<TableSweep> {
        let options = self.storage.options();
        let batch_size = options.expiration_batch_size as usize;

        let _lock = self
            .storage
            .locks()
            .acquire(EXPIRATION_LOCK, options.expiration_lock_timeout())?;

        let conn = self.storage.connect()?;
        let session = Session::new(&conn);
        let transaction = session.begin_transaction(Some(IsolationLevel::ReadCommitted))?;

        let sql = format!(
            "DELETE FROM [{table}] WHERE Id IN \
             (SELECT Id FROM [{table}] WHERE ExpireAt < :now LIMIT :limit)",
            table = table.as_str()
        );
        let args = ExpiredBatch {
            now: now.to_string(),
            limit: i64::from(options.expiration_batch_size),
        };

        let mut sweep = TableSweep {
            table,
            deleted: 0,
            passes: 0,
        };
        loop {
            let affected = transaction.execute(&sql, &args)?;
            sweep.passes += 1;
            sweep.deleted += affected;
            if affected < batch_size {
                break;
            }
        }

        transaction.commit()?;
        Ok(sweep)
    }
}
