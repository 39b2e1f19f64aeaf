//! A claimed queue row.

use crate::db::{Bind, FromRow, Session, time_column};
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::ToSql;
use tracing::{debug, warn};

/// A queue row as stored.
#[derive(Debug, Clone)]
pub(crate) struct QueueRow {
    pub id: i64,
    pub job_id: i64,
    pub queue: String,
    pub fetched_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
}

impl FromRow for QueueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job_id: row.get(1)?,
            queue: row.get(2)?,
            fetched_at: time_column(row, 3)?,
            locked_by: row.get(4)?,
        })
    }
}

/// A job leased to this caller by a successful claim.
///
/// The lease stays in place until the row is removed or requeued; if
/// neither happens it becomes claimable again after the invisibility
/// timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedJob {
    /// Queue-local row id.
    pub id: i64,
    pub job_id: i64,
    pub queue: String,
    /// Correlation id stamped on the row by the claim.
    pub locked_by: String,
    pub fetched_at: DateTime<Utc>,
    table: String,
}

struct LeaseKey<'a> {
    id: i64,
    locked_by: &'a str,
}

impl Bind for LeaseKey<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":id", &self.id), (":locked_by", &self.locked_by)]
    }
}

impl LeasedJob {
    pub(crate) fn new(
        row: QueueRow,
        table: &str,
        locked_by: String,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            queue: row.queue,
            locked_by: row.locked_by.unwrap_or(locked_by),
            fetched_at: row.fetched_at.unwrap_or(fetched_at),
            table: table.to_string(),
        }
    }

    /// Queue table the row lives in.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Acknowledge the job: delete its queue row.
    ///
    /// Returns `false` when the lease was lost: the row went stale and
    /// another poller claimed it, or it is gone. The row is left alone then.
    pub fn remove_from_queue(&self, session: &Session<'_>) -> Result<bool> {
        let sql = format!(
            "DELETE FROM [{}] WHERE Id = :id AND LockedBy = :locked_by",
            self.table
        );
        let affected = session.execute(&sql, &self.lease_key())?;
        if affected == 0 {
            warn!(job_id = self.job_id, queue = %self.queue, "lease lost before removal");
            return Ok(false);
        }
        debug!(job_id = self.job_id, queue = %self.queue, "leased job removed from queue");
        Ok(true)
    }

    /// Give the job back: clear the lease so any poller can claim it.
    ///
    /// Returns `false` when the lease was lost, leaving the current
    /// holder's lease in place.
    pub fn requeue(&self, session: &Session<'_>) -> Result<bool> {
        let sql = format!(
            "UPDATE [{}] SET FetchedAt = NULL, LockedBy = NULL \
             WHERE Id = :id AND LockedBy = :locked_by",
            self.table
        );
        let affected = session.execute(&sql, &self.lease_key())?;
        if affected == 0 {
            warn!(job_id = self.job_id, queue = %self.queue, "lease lost before requeue");
            return Ok(false);
        }
        debug!(job_id = self.job_id, queue = %self.queue, "leased job requeued");
        Ok(true)
    }

    fn lease_key(&self) -> LeaseKey<'_> {
        LeaseKey {
            id: self.id,
            locked_by: &self.locked_by,
        }
    }
}
