//! Claim-and-fetch dequeue.

use super::fetched::{LeasedJob, QueueRow};
use super::{QueueContext, QueueProvider};
use crate::config::StorageOptions;
use crate::db::{Bind, Session, to_db_time};
use crate::error::{Result, StorageError, require_non_blank};
use crate::signal::CancellationToken;
use chrono::Utc;
use crossbeam_channel::select;
use rusqlite::Connection;
use rusqlite::types::ToSql;
use std::time::Duration;
use tracing::{debug, trace};
use uuid::Uuid;

/// One queue table seen through the lease protocol.
#[derive(Debug, Clone, Copy)]
pub struct LeaseQueue<'a> {
    table: &'a str,
    context: &'a QueueContext,
    poll_interval: Duration,
    invisibility_timeout: Duration,
}

struct EnqueueArgs<'a> {
    job_id: i64,
    queue: &'a str,
}

impl Bind for EnqueueArgs<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":job_id", &self.job_id), (":queue", &self.queue)]
    }
}

struct ClaimArgs {
    queues: String,
    locked_by: String,
    now: String,
    stale_cutoff: String,
}

impl Bind for ClaimArgs {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":queues", &self.queues),
            (":locked_by", &self.locked_by),
            (":now", &self.now),
            (":stale_cutoff", &self.stale_cutoff),
        ]
    }
}

struct ByLockedBy<'a> {
    locked_by: &'a str,
}

impl Bind for ByLockedBy<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":locked_by", &self.locked_by)]
    }
}

struct ByQueue<'a> {
    queue: &'a str,
}

impl Bind for ByQueue<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":queue", &self.queue)]
    }
}

impl<'a> LeaseQueue<'a> {
    pub fn new(
        provider: &'a QueueProvider,
        context: &'a QueueContext,
        options: &StorageOptions,
    ) -> Self {
        Self {
            table: provider.table(),
            context,
            poll_interval: options.queue_poll_interval(),
            invisibility_timeout: options.invisibility_timeout(),
        }
    }

    pub fn table(&self) -> &str {
        self.table
    }

    /// Insert a queue row for `job_id`.
    ///
    /// Waiting pollers are not woken here; the caller notifies the queue
    /// context once the surrounding transaction has committed.
    pub fn enqueue(&self, session: &Session<'_>, queue: &str, job_id: i64) -> Result<()> {
        require_non_blank(queue, "queue")?;
        let sql = format!(
            "INSERT INTO [{}](JobId, Queue) VALUES (:job_id, :queue)",
            self.table
        );
        session.execute(&sql, &EnqueueArgs { job_id, queue })?;
        trace!(job_id, queue, table = self.table, "job enqueued");
        Ok(())
    }

    /// One claim attempt. `Ok(None)` when no row is claimable right now.
    ///
    /// The update stamps at most one row, chosen by lowest id, with a fresh
    /// correlation id; the row is then read back by that id. Losing the
    /// race to another poller simply yields `None`.
    pub fn try_claim<S: AsRef<str>>(
        &self,
        session: &Session<'_>,
        queues: &[S],
    ) -> Result<Option<LeasedJob>> {
        let names: Vec<&str> = queues.iter().map(|q| q.as_ref()).collect();
        let now = Utc::now();
        let stale_cutoff = now
            - chrono::Duration::from_std(self.invisibility_timeout)
                .map_err(|e| StorageError::invalid(format!("invisibility timeout: {}", e)))?;
        let locked_by = Uuid::new_v4().to_string();

        let claim = format!(
            "UPDATE [{table}] SET LockedBy = :locked_by, FetchedAt = :now \
             WHERE Id = (SELECT Id FROM [{table}] \
                 WHERE Queue IN (SELECT value FROM json_each(:queues)) \
                 AND (LockedBy IS NULL OR FetchedAt IS NULL OR FetchedAt < :stale_cutoff) \
                 ORDER BY Id LIMIT 1)",
            table = self.table
        );
        let affected = session.execute(
            &claim,
            &ClaimArgs {
                queues: serde_json::to_string(&names)?,
                locked_by: locked_by.clone(),
                now: to_db_time(now),
                stale_cutoff: to_db_time(stale_cutoff),
            },
        )?;
        if affected == 0 {
            return Ok(None);
        }

        let select = format!(
            "SELECT Id, JobId, Queue, FetchedAt, LockedBy FROM [{}] WHERE LockedBy = :locked_by",
            self.table
        );
        let row = session
            .query::<QueueRow>(&select, &ByLockedBy {
                locked_by: &locked_by,
            })?
            .into_iter()
            .next();

        // The row can vanish between the two statements only if someone
        // acknowledged it meanwhile; treat that as a lost race.
        let Some(row) = row else {
            return Ok(None);
        };

        debug!(
            job_id = row.job_id,
            queue = %row.queue,
            table = self.table,
            %locked_by,
            "queue row claimed"
        );
        Ok(Some(LeasedJob::new(row, self.table, locked_by, now)))
    }

    /// Block until a row of `queues` is claimed or `cancel` fires.
    ///
    /// Each attempt opens its own connection through `connect`. Between
    /// attempts the caller waits for the poll interval, a wake from the
    /// queue context, or cancellation, whichever comes first.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - `queues` is empty
    /// * `Canceled` - `cancel` fired or the queue context was shut down
    pub fn dequeue<F, S>(
        &self,
        connect: F,
        queues: &[S],
        cancel: &CancellationToken,
    ) -> Result<LeasedJob>
    where
        F: Fn() -> Result<Connection>,
        S: AsRef<str>,
    {
        if queues.is_empty() {
            return Err(StorageError::invalid("queue list must not be empty"));
        }

        // Subscribe before the first attempt so an enqueue committed in
        // between is not missed.
        let wake = self.context.subscribe();

        loop {
            if cancel.is_cancelled() || self.context.is_shut_down() {
                return Err(StorageError::Canceled);
            }

            {
                let conn = connect()?;
                if let Some(job) = self.try_claim(&Session::new(&conn), queues)? {
                    return Ok(job);
                }
            }

            select! {
                recv(cancel.receiver()) -> _ => return Err(StorageError::Canceled),
                recv(wake.receiver()) -> msg => {
                    if msg.is_err() {
                        return Err(StorageError::Canceled);
                    }
                    trace!(table = self.table, "woken by new item");
                }
                default(self.poll_interval) => {}
            }
        }
    }

    /// Distinct queue names present in the table.
    pub fn queue_names(&self, session: &Session<'_>) -> Result<Vec<String>> {
        let sql = format!("SELECT DISTINCT Queue FROM [{}] ORDER BY Queue", self.table);
        session.query(&sql, &crate::db::NoParams)
    }

    /// Rows of `queue` waiting to be claimed and rows currently leased.
    pub fn enqueued_and_fetched_count(
        &self,
        session: &Session<'_>,
        queue: &str,
    ) -> Result<(i64, i64)> {
        let enqueued = format!(
            "SELECT COUNT(*) FROM [{}] WHERE Queue = :queue AND LockedBy IS NULL",
            self.table
        );
        let fetched = format!(
            "SELECT COUNT(*) FROM [{}] WHERE Queue = :queue AND LockedBy IS NOT NULL",
            self.table
        );
        let args = ByQueue { queue };
        let enqueued = session.execute_scalar::<i64>(&enqueued, &args)?.unwrap_or(0);
        let fetched = session.execute_scalar::<i64>(&fetched, &args)?.unwrap_or(0);
        Ok((enqueued, fetched))
    }
}
