//! Data access used by the job framework: jobs, parameters, states,
//! servers, and reads of the keyed collections.

use super::SqliteStorage;
use super::model::{JobData, JobState, ServerData};
use crate::db::{Bind, FromRow, NoParams, Session, time_column, to_db_time};
use crate::error::{Result, StorageError, require_non_blank};
use crate::transaction::parse_job_id;
use chrono::{DateTime, Utc};
use rusqlite::Row;
use rusqlite::types::ToSql;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use tracing::debug;

struct NewJob<'a> {
    invocation_data: &'a str,
    arguments: &'a str,
    created_at: String,
    expire_at: String,
}

impl Bind for NewJob<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":invocation_data", &self.invocation_data),
            (":arguments", &self.arguments),
            (":created_at", &self.created_at),
            (":expire_at", &self.expire_at),
        ]
    }
}

struct JobParameter<'a> {
    job_id: i64,
    name: &'a str,
    value: Option<&'a str>,
}

impl Bind for JobParameter<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":job_id", &self.job_id),
            (":name", &self.name),
            (":value", &self.value),
        ]
    }
}

struct ParameterName<'a> {
    job_id: i64,
    name: &'a str,
}

impl Bind for ParameterName<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":job_id", &self.job_id), (":name", &self.name)]
    }
}

struct ById {
    id: i64,
}

impl Bind for ById {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":id", &self.id)]
    }
}

struct ServerRow<'a> {
    id: &'a str,
    data: String,
    heartbeat: String,
}

impl Bind for ServerRow<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":id", &self.id),
            (":data", &self.data),
            (":heartbeat", &self.heartbeat),
        ]
    }
}

struct Heartbeat<'a> {
    id: &'a str,
    heartbeat: String,
}

impl Bind for Heartbeat<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":id", &self.id), (":heartbeat", &self.heartbeat)]
    }
}

struct ServerId<'a> {
    id: &'a str,
}

impl Bind for ServerId<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":id", &self.id)]
    }
}

struct Before {
    cutoff: String,
}

impl Bind for Before {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":cutoff", &self.cutoff)]
    }
}

struct ByKey<'a> {
    key: &'a str,
}

impl Bind for ByKey<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":key", &self.key)]
    }
}

struct ScoreRange<'a> {
    key: &'a str,
    from: f64,
    to: f64,
}

impl Bind for ScoreRange<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":key", &self.key), (":from", &self.from), (":to", &self.to)]
    }
}

impl FromRow for JobData {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            invocation_data: row.get(0)?,
            arguments: row.get(1)?,
            state_name: row.get(2)?,
            created_at: time_column(row, 3)?.unwrap_or_default(),
            expire_at: time_column(row, 4)?,
        })
    }
}

struct StoredState {
    name: String,
    reason: Option<String>,
    data: Option<String>,
}

impl FromRow for StoredState {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            reason: row.get(1)?,
            data: row.get(2)?,
        })
    }
}

struct HashEntry {
    field: String,
    value: Option<String>,
}

impl FromRow for HashEntry {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            field: row.get(0)?,
            value: row.get(1)?,
        })
    }
}

fn to_chrono(duration: Duration, name: &str) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|e| StorageError::invalid(format!("`{}` out of range: {}", name, e)))
}

impl SqliteStorage {
    // =========================================================================
    // Jobs
    // =========================================================================

    /// Insert a job that expires `expire_in` after `created_at`, with its
    /// parameters, in one transaction. Returns the new job id.
    ///
    /// Invocation data and arguments are stored verbatim.
    pub fn create_expired_job(
        &self,
        invocation_data: &str,
        arguments: &str,
        parameters: &BTreeMap<String, String>,
        created_at: DateTime<Utc>,
        expire_in: Duration,
    ) -> Result<String> {
        let expire_at = created_at + to_chrono(expire_in, "expire_in")?;

        let conn = self.connect()?;
        let session = Session::new(&conn);
        let transaction = session.begin_transaction(None)?;

        transaction.execute(
            "INSERT INTO [Job](InvocationData, Arguments, CreatedAt, ExpireAt) \
             VALUES (:invocation_data, :arguments, :created_at, :expire_at)",
            &NewJob {
                invocation_data,
                arguments,
                created_at: to_db_time(created_at),
                expire_at: to_db_time(expire_at),
            },
        )?;
        let job_id = transaction.last_insert_id();

        for (name, value) in parameters {
            transaction.execute(
                "INSERT INTO [JobParameter](JobId, Name, Value) VALUES (:job_id, :name, :value)",
                &JobParameter {
                    job_id,
                    name: name.as_str(),
                    value: Some(value.as_str()),
                },
            )?;
        }

        transaction.commit()?;
        debug!(job_id, parameters = parameters.len(), "job created");
        Ok(job_id.to_string())
    }

    pub fn set_job_parameter(&self, job_id: &str, name: &str, value: Option<&str>) -> Result<()> {
        let job_id = parse_job_id(job_id)?;
        require_non_blank(name, "name")?;

        let conn = self.connect()?;
        Session::new(&conn).execute(
            "INSERT INTO [JobParameter](JobId, Name, Value) VALUES (:job_id, :name, :value) \
             ON CONFLICT(JobId, Name) DO UPDATE SET Value = excluded.Value",
            &JobParameter {
                job_id,
                name,
                value,
            },
        )?;
        Ok(())
    }

    pub fn get_job_parameter(&self, job_id: &str, name: &str) -> Result<Option<String>> {
        let job_id = parse_job_id(job_id)?;
        require_non_blank(name, "name")?;

        let conn = self.connect()?;
        Session::new(&conn).execute_scalar(
            "SELECT Value FROM [JobParameter] WHERE JobId = :job_id AND Name = :name LIMIT 1",
            &ParameterName { job_id, name },
        )
    }

    /// The stored job, or `None` when it does not exist.
    pub fn get_job_data(&self, job_id: &str) -> Result<Option<JobData>> {
        let id = parse_job_id(job_id)?;

        let conn = self.connect()?;
        let rows: Vec<JobData> = Session::new(&conn).query(
            "SELECT InvocationData, Arguments, StateName, CreatedAt, ExpireAt \
             FROM [Job] WHERE Id = :id",
            &ById { id },
        )?;
        Ok(rows.into_iter().next())
    }

    /// The job's current state, or `None` when the job has none.
    pub fn get_state_data(&self, job_id: &str) -> Result<Option<JobState>> {
        let id = parse_job_id(job_id)?;

        let conn = self.connect()?;
        let rows: Vec<StoredState> = Session::new(&conn).query(
            "SELECT s.Name, s.Reason, s.Data FROM [State] s \
             INNER JOIN [Job] j ON j.StateId = s.Id WHERE j.Id = :id",
            &ById { id },
        )?;

        let Some(stored) = rows.into_iter().next() else {
            return Ok(None);
        };
        let data = match stored.data.as_deref() {
            Some(json) if !json.trim().is_empty() => serde_json::from_str(json)?,
            _ => BTreeMap::new(),
        };
        Ok(Some(JobState {
            name: stored.name,
            reason: stored.reason,
            data,
        }))
    }

    // =========================================================================
    // Servers
    // =========================================================================

    /// Register (or re-register) a server with a fresh heartbeat.
    pub fn announce_server(&self, server_id: &str, data: &ServerData) -> Result<()> {
        require_non_blank(server_id, "server_id")?;

        let conn = self.connect()?;
        Session::new(&conn).execute(
            "INSERT INTO [Server](Id, Data, LastHeartbeat) VALUES (:id, :data, :heartbeat) \
             ON CONFLICT(Id) DO UPDATE SET Data = excluded.Data, LastHeartbeat = excluded.LastHeartbeat",
            &ServerRow {
                id: server_id,
                data: serde_json::to_string(data)?,
                heartbeat: to_db_time(Utc::now()),
            },
        )?;
        debug!(server_id, "server announced");
        Ok(())
    }

    pub fn heartbeat(&self, server_id: &str) -> Result<()> {
        require_non_blank(server_id, "server_id")?;

        let conn = self.connect()?;
        Session::new(&conn).execute(
            "UPDATE [Server] SET LastHeartbeat = :heartbeat WHERE Id = :id",
            &Heartbeat {
                id: server_id,
                heartbeat: to_db_time(Utc::now()),
            },
        )?;
        Ok(())
    }

    pub fn remove_server(&self, server_id: &str) -> Result<()> {
        require_non_blank(server_id, "server_id")?;

        let conn = self.connect()?;
        Session::new(&conn).execute(
            "DELETE FROM [Server] WHERE Id = :id",
            &ServerId { id: server_id },
        )?;
        Ok(())
    }

    /// Delete servers whose last heartbeat is older than `timeout`.
    /// Returns how many were removed.
    pub fn remove_timed_out_servers(&self, timeout: Duration) -> Result<usize> {
        let cutoff = Utc::now() - to_chrono(timeout, "timeout")?;

        let conn = self.connect()?;
        let removed = Session::new(&conn).execute(
            "DELETE FROM [Server] WHERE LastHeartbeat < :cutoff",
            &Before {
                cutoff: to_db_time(cutoff),
            },
        )?;
        if removed > 0 {
            debug!(removed, "timed out servers removed");
        }
        Ok(removed)
    }

    /// Ids of every registered server.
    pub fn server_ids(&self) -> Result<Vec<String>> {
        let conn = self.connect()?;
        Session::new(&conn).query("SELECT Id FROM [Server] ORDER BY Id", &NoParams)
    }

    // =========================================================================
    // Collections
    // =========================================================================

    pub fn get_all_items_from_set(&self, key: &str) -> Result<BTreeSet<String>> {
        require_non_blank(key, "key")?;

        let conn = self.connect()?;
        let values: Vec<String> = Session::new(&conn)
            .query("SELECT Value FROM [Set] WHERE [Key] = :key", &ByKey { key })?;
        Ok(values.into_iter().collect())
    }

    /// The member with the lowest score within `from_score..=to_score`.
    pub fn get_first_by_lowest_score_from_set(
        &self,
        key: &str,
        from_score: f64,
        to_score: f64,
    ) -> Result<Option<String>> {
        require_non_blank(key, "key")?;
        if to_score < from_score {
            return Err(StorageError::invalid(
                "`to_score` must be greater than or equal to `from_score`",
            ));
        }

        let conn = self.connect()?;
        Session::new(&conn).execute_scalar(
            "SELECT Value FROM [Set] WHERE [Key] = :key AND Score BETWEEN :from AND :to \
             ORDER BY Score LIMIT 1",
            &ScoreRange {
                key,
                from: from_score,
                to: to_score,
            },
        )
    }

    pub fn get_all_entries_from_hash(&self, key: &str) -> Result<BTreeMap<String, String>> {
        require_non_blank(key, "key")?;

        let conn = self.connect()?;
        let entries: Vec<HashEntry> = Session::new(&conn).query(
            "SELECT Field, Value FROM [Hash] WHERE [Key] = :key",
            &ByKey { key },
        )?;
        Ok(entries
            .into_iter()
            .map(|e| (e.field, e.value.unwrap_or_default()))
            .collect())
    }

    /// Every list item, newest first.
    pub fn get_all_items_from_list(&self, key: &str) -> Result<Vec<String>> {
        require_non_blank(key, "key")?;

        let conn = self.connect()?;
        let items: Vec<Option<String>> = Session::new(&conn).query(
            "SELECT Value FROM [List] WHERE [Key] = :key ORDER BY Id DESC",
            &ByKey { key },
        )?;
        Ok(items.into_iter().map(Option::unwrap_or_default).collect())
    }

    /// Sum of the raw and aggregated values of a counter.
    pub fn get_counter(&self, key: &str) -> Result<i64> {
        require_non_blank(key, "key")?;

        let conn = self.connect()?;
        let value: Option<i64> = Session::new(&conn).execute_scalar(
            "SELECT SUM(Value) FROM (\
                 SELECT Value FROM [Counter] WHERE [Key] = :key \
                 UNION ALL \
                 SELECT Value FROM [AggregatedCounter] WHERE [Key] = :key)",
            &ByKey { key },
        )?;
        Ok(value.unwrap_or(0))
    }
}
