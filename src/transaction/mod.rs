//! Buffered write transactions.
//!
//! A [`WriteTransaction`] records mutations without touching the database.
//! Each mutation may declare resources it needs locked. [`WriteTransaction::commit`]
//! then:
//!
//! 1. locks the declared resources in sorted order (two transactions with
//!    overlapping resources always contend in the same order, so they
//!    cannot wait on each other in a cycle)
//! 2. opens one database transaction and replays the buffered mutations in
//!    the order they were recorded
//! 3. commits, releases the locks, and only then runs post-commit actions
//!    such as waking queue pollers
//!
//! A failure at any step leaves the database untouched and skips the
//! post-commit actions.


use crate::config::STATE_REASON_MAX_LENGTH;
use crate::db::{Bind, Session, to_db_time};
use crate::error::{Result, StorageError, require_non_blank};
use crate::locks::{HASH_LOCK, LIST_LOCK, SET_LOCK, job_state_lock};
use crate::storage::{JobState, SqliteStorage};
use chrono::Utc;
use rusqlite::types::ToSql;
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::debug;

type Command<'a> = Box<dyn FnOnce(&Session<'_>) -> Result<()> + 'a>;
type AfterCommit<'a> = Box<dyn FnOnce() + 'a>;

/// Mutations buffered for one atomic commit.
///
/// Dropping the transaction without committing discards everything.
pub struct WriteTransaction<'a> {
    storage: &'a SqliteStorage,
    commands: Vec<Command<'a>>,
    after_commit: Vec<AfterCommit<'a>>,
    locked_resources: BTreeSet<String>,
}

impl std::fmt::Debug for WriteTransaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteTransaction")
            .field("commands", &self.commands.len())
            .field("after_commit", &self.after_commit.len())
            .field("locked_resources", &self.locked_resources)
            .finish()
    }
}

// =============================================================================
// Parameter shapes
// =============================================================================

struct JobExpiry {
    id: i64,
    expire_at: Option<String>,
}

impl Bind for JobExpiry {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":id", &self.id), (":expire_at", &self.expire_at)]
    }
}

struct StateRow {
    job_id: i64,
    name: String,
    reason: Option<String>,
    created_at: String,
    data: String,
}

impl Bind for StateRow {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":job_id", &self.job_id),
            (":name", &self.name),
            (":reason", &self.reason),
            (":created_at", &self.created_at),
            (":data", &self.data),
        ]
    }
}

struct CurrentState {
    job_id: i64,
    state_id: i64,
    name: String,
}

impl Bind for CurrentState {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":job_id", &self.job_id),
            (":state_id", &self.state_id),
            (":name", &self.name),
        ]
    }
}

struct CounterRow {
    key: String,
    value: i64,
    expire_at: Option<String>,
}

impl Bind for CounterRow {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":key", &self.key),
            (":value", &self.value),
            (":expire_at", &self.expire_at),
        ]
    }
}

struct SetMember {
    key: String,
    value: String,
    score: f64,
}

impl Bind for SetMember {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":key", &self.key),
            (":value", &self.value),
            (":score", &self.score),
        ]
    }
}

struct KeyValue {
    key: String,
    value: String,
}

impl Bind for KeyValue {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":key", &self.key), (":value", &self.value)]
    }
}

struct HashField {
    key: String,
    field: String,
    value: String,
}

impl Bind for HashField {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":key", &self.key),
            (":field", &self.field),
            (":value", &self.value),
        ]
    }
}

struct KeyOnly {
    key: String,
}

impl Bind for KeyOnly {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":key", &self.key)]
    }
}

struct KeyExpiry {
    key: String,
    expire_at: Option<String>,
}

impl Bind for KeyExpiry {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":key", &self.key), (":expire_at", &self.expire_at)]
    }
}

struct ListWindow {
    key: String,
    offset: i64,
    count: i64,
}

impl Bind for ListWindow {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![
            (":key", &self.key),
            (":offset", &self.offset),
            (":count", &self.count),
        ]
    }
}

// =============================================================================
// Statements
// =============================================================================

const UPDATE_JOB_EXPIRY_SQL: &str = "UPDATE [Job] SET ExpireAt = :expire_at WHERE Id = :id";

const INSERT_STATE_SQL: &str = "INSERT INTO [State](JobId, Name, Reason, CreatedAt, Data) \
     VALUES (:job_id, :name, :reason, :created_at, :data)";

const SET_CURRENT_STATE_SQL: &str =
    "UPDATE [Job] SET StateId = :state_id, StateName = :name WHERE Id = :job_id";

const INSERT_COUNTER_SQL: &str =
    "INSERT INTO [Counter]([Key], Value, ExpireAt) VALUES (:key, :value, :expire_at)";

const UPSERT_SET_SQL: &str = "INSERT INTO [Set]([Key], Value, Score) VALUES (:key, :value, :score) \
     ON CONFLICT([Key], Value) DO UPDATE SET Score = excluded.Score";

const INSERT_SET_IF_MISSING_SQL: &str =
    "INSERT OR IGNORE INTO [Set]([Key], Value, Score) VALUES (:key, :value, :score)";

const DELETE_SET_MEMBER_SQL: &str = "DELETE FROM [Set] WHERE [Key] = :key AND Value = :value";

const INSERT_LIST_SQL: &str = "INSERT INTO [List]([Key], Value) VALUES (:key, :value)";

const DELETE_LIST_VALUE_SQL: &str = "DELETE FROM [List] WHERE [Key] = :key AND Value = :value";

// Lists read newest first; the window is counted in that order.
const TRIM_LIST_SQL: &str = "DELETE FROM [List] WHERE [Key] = :key AND Id NOT IN \
     (SELECT Id FROM [List] WHERE [Key] = :key ORDER BY Id DESC LIMIT :count OFFSET :offset)";

const UPSERT_HASH_SQL: &str = "INSERT INTO [Hash]([Key], Field, Value) VALUES (:key, :field, :value) \
     ON CONFLICT([Key], Field) DO UPDATE SET Value = excluded.Value";

/// Tables whose rows are addressed by key, with the lock guarding them.
#[derive(Debug, Clone, Copy)]
enum KeyedTable {
    Set,
    List,
    Hash,
}

impl KeyedTable {
    fn table(&self) -> &'static str {
        match self {
            KeyedTable::Set => "Set",
            KeyedTable::List => "List",
            KeyedTable::Hash => "Hash",
        }
    }

    fn lock(&self) -> &'static str {
        match self {
            KeyedTable::Set => SET_LOCK,
            KeyedTable::List => LIST_LOCK,
            KeyedTable::Hash => HASH_LOCK,
        }
    }
}

/// Parse a textual job id.
pub(crate) fn parse_job_id(job_id: &str) -> Result<i64> {
    require_non_blank(job_id, "job_id")?;
    job_id
        .trim()
        .parse::<i64>()
        .map_err(|_| StorageError::invalid(format!("job id '{}' is not numeric", job_id)))
}

/// Cut a state reason down to the stored maximum, on a character boundary.
pub(crate) fn truncate_reason(reason: &str) -> String {
    reason.chars().take(STATE_REASON_MAX_LENGTH).collect()
}

fn expire_at(expire_in: Duration) -> Result<String> {
    let expire_in = chrono::Duration::from_std(expire_in)
        .map_err(|e| StorageError::invalid(format!("expiration out of range: {}", e)))?;
    Ok(to_db_time(Utc::now() + expire_in))
}

impl<'a> WriteTransaction<'a> {
    pub(crate) fn new(storage: &'a SqliteStorage) -> Self {
        Self {
            storage,
            commands: Vec::new(),
            after_commit: Vec::new(),
            locked_resources: BTreeSet::new(),
        }
    }

    /// Number of buffered mutations.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Resources that `commit` will lock, in acquisition order.
    pub fn locked_resources(&self) -> impl Iterator<Item = &str> {
        self.locked_resources.iter().map(String::as_str)
    }

    fn enqueue_command<F>(&mut self, command: F)
    where
        F: FnOnce(&Session<'_>) -> Result<()> + 'a,
    {
        self.commands.push(Box::new(command));
    }

    fn declare_lock(&mut self, resource: impl Into<String>) {
        self.locked_resources.insert(resource.into());
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    /// Schedule the job for deletion after `expire_in`.
    pub fn expire_job(&mut self, job_id: &str, expire_in: Duration) -> Result<()> {
        let id = parse_job_id(job_id)?;
        let expire_at = expire_at(expire_in)?;
        self.enqueue_command(move |session| {
            session.execute(
                UPDATE_JOB_EXPIRY_SQL,
                &JobExpiry {
                    id,
                    expire_at: Some(expire_at),
                },
            )?;
            Ok(())
        });
        Ok(())
    }

    /// Clear the job's expiration.
    pub fn persist_job(&mut self, job_id: &str) -> Result<()> {
        let id = parse_job_id(job_id)?;
        self.enqueue_command(move |session| {
            session.execute(UPDATE_JOB_EXPIRY_SQL, &JobExpiry { id, expire_at: None })?;
            Ok(())
        });
        Ok(())
    }

    /// Record `state` and make it the job's current state.
    pub fn set_job_state(&mut self, job_id: &str, state: &JobState) -> Result<()> {
        let row = self.state_row(job_id, state)?;
        self.declare_lock(job_state_lock(row.job_id));
        self.enqueue_command(move |session| {
            session.execute(INSERT_STATE_SQL, &row)?;
            let state_id = session.last_insert_id();
            session.execute(
                SET_CURRENT_STATE_SQL,
                &CurrentState {
                    job_id: row.job_id,
                    state_id,
                    name: row.name,
                },
            )?;
            Ok(())
        });
        Ok(())
    }

    /// Append `state` to the job's history without changing its current state.
    pub fn add_job_state(&mut self, job_id: &str, state: &JobState) -> Result<()> {
        let row = self.state_row(job_id, state)?;
        self.declare_lock(job_state_lock(row.job_id));
        self.enqueue_command(move |session| {
            session.execute(INSERT_STATE_SQL, &row)?;
            Ok(())
        });
        Ok(())
    }

    fn state_row(&self, job_id: &str, state: &JobState) -> Result<StateRow> {
        let job_id = parse_job_id(job_id)?;
        require_non_blank(&state.name, "state.name")?;
        Ok(StateRow {
            job_id,
            name: state.name.clone(),
            reason: state.reason.as_deref().map(truncate_reason),
            created_at: to_db_time(Utc::now()),
            data: serde_json::to_string(&state.data)?,
        })
    }

    // =========================================================================
    // Queues
    // =========================================================================

    /// Enqueue the job on `queue`; pollers in this process are woken after
    /// the commit succeeds.
    pub fn add_to_queue(&mut self, queue: &str, job_id: &str) -> Result<()> {
        require_non_blank(queue, "queue")?;
        let id = parse_job_id(job_id)?;
        let storage = self.storage;
        let queue = queue.to_string();
        self.enqueue_command(move |session| storage.queue_for(&queue).enqueue(session, &queue, id));
        self.after_commit
            .push(Box::new(move || storage.queue_context().notify_new_item()));
        Ok(())
    }

    // =========================================================================
    // Counters
    // =========================================================================

    pub fn increment_counter(&mut self, key: &str, expire_in: Option<Duration>) -> Result<()> {
        self.add_counter(key, 1, expire_in)
    }

    pub fn decrement_counter(&mut self, key: &str, expire_in: Option<Duration>) -> Result<()> {
        self.add_counter(key, -1, expire_in)
    }

    fn add_counter(&mut self, key: &str, value: i64, expire_in: Option<Duration>) -> Result<()> {
        require_non_blank(key, "key")?;
        let row = CounterRow {
            key: key.to_string(),
            value,
            expire_at: expire_in.map(expire_at).transpose()?,
        };
        self.enqueue_command(move |session| {
            session.execute(INSERT_COUNTER_SQL, &row)?;
            Ok(())
        });
        Ok(())
    }

    // =========================================================================
    // Sets
    // =========================================================================

    pub fn add_to_set(&mut self, key: &str, value: &str) -> Result<()> {
        self.add_to_set_with_score(key, value, 0.0)
    }

    /// Add `value` to the set, or update its score when already present.
    pub fn add_to_set_with_score(&mut self, key: &str, value: &str, score: f64) -> Result<()> {
        require_non_blank(key, "key")?;
        let member = SetMember {
            key: key.to_string(),
            value: value.to_string(),
            score,
        };
        self.declare_lock(SET_LOCK);
        self.enqueue_command(move |session| {
            session.execute(UPSERT_SET_SQL, &member)?;
            Ok(())
        });
        Ok(())
    }

    /// Add every value with score 0, keeping the score of existing members.
    pub fn add_range_to_set<I, S>(&mut self, key: &str, values: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        require_non_blank(key, "key")?;
        let key = key.to_string();
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        self.declare_lock(SET_LOCK);
        self.enqueue_command(move |session| {
            for value in values {
                session.execute(
                    INSERT_SET_IF_MISSING_SQL,
                    &SetMember {
                        key: key.clone(),
                        value,
                        score: 0.0,
                    },
                )?;
            }
            Ok(())
        });
        Ok(())
    }

    pub fn remove_from_set(&mut self, key: &str, value: &str) -> Result<()> {
        require_non_blank(key, "key")?;
        let member = KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.declare_lock(SET_LOCK);
        self.enqueue_command(move |session| {
            session.execute(DELETE_SET_MEMBER_SQL, &member)?;
            Ok(())
        });
        Ok(())
    }

    pub fn remove_set(&mut self, key: &str) -> Result<()> {
        self.remove_key(KeyedTable::Set, key)
    }

    // =========================================================================
    // Lists
    // =========================================================================

    pub fn insert_to_list(&mut self, key: &str, value: &str) -> Result<()> {
        require_non_blank(key, "key")?;
        let item = KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.declare_lock(LIST_LOCK);
        self.enqueue_command(move |session| {
            session.execute(INSERT_LIST_SQL, &item)?;
            Ok(())
        });
        Ok(())
    }

    /// Remove every occurrence of `value` from the list.
    pub fn remove_from_list(&mut self, key: &str, value: &str) -> Result<()> {
        require_non_blank(key, "key")?;
        let item = KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        self.declare_lock(LIST_LOCK);
        self.enqueue_command(move |session| {
            session.execute(DELETE_LIST_VALUE_SQL, &item)?;
            Ok(())
        });
        Ok(())
    }

    /// Keep only the items at positions `keep_starting_from..=keep_ending_at`,
    /// counted from the newest item.
    pub fn trim_list(
        &mut self,
        key: &str,
        keep_starting_from: i64,
        keep_ending_at: i64,
    ) -> Result<()> {
        require_non_blank(key, "key")?;
        if keep_starting_from < 0 {
            return Err(StorageError::invalid(
                "`keep_starting_from` must not be negative",
            ));
        }
        if keep_ending_at < keep_starting_from {
            return Err(StorageError::invalid(
                "`keep_ending_at` must be greater than or equal to `keep_starting_from`",
            ));
        }
        let window = ListWindow {
            key: key.to_string(),
            offset: keep_starting_from,
            count: keep_ending_at - keep_starting_from + 1,
        };
        self.declare_lock(LIST_LOCK);
        self.enqueue_command(move |session| {
            session.execute(TRIM_LIST_SQL, &window)?;
            Ok(())
        });
        Ok(())
    }

    // =========================================================================
    // Hashes
    // =========================================================================

    /// Set every field, inserting missing ones and overwriting existing ones.
    pub fn set_range_in_hash<I, K, V>(&mut self, key: &str, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        require_non_blank(key, "key")?;
        let key = key.to_string();
        let fields: Vec<(String, String)> = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if fields.iter().any(|(field, _)| field.trim().is_empty()) {
            return Err(StorageError::invalid("hash field names must not be empty"));
        }
        self.declare_lock(HASH_LOCK);
        self.enqueue_command(move |session| {
            for (field, value) in fields {
                session.execute(
                    UPSERT_HASH_SQL,
                    &HashField {
                        key: key.clone(),
                        field,
                        value,
                    },
                )?;
            }
            Ok(())
        });
        Ok(())
    }

    pub fn remove_hash(&mut self, key: &str) -> Result<()> {
        self.remove_key(KeyedTable::Hash, key)
    }

    // =========================================================================
    // Key expiration
    // =========================================================================

    pub fn expire_set(&mut self, key: &str, expire_in: Duration) -> Result<()> {
        self.set_key_expiry(KeyedTable::Set, key, Some(expire_in))
    }

    pub fn expire_list(&mut self, key: &str, expire_in: Duration) -> Result<()> {
        self.set_key_expiry(KeyedTable::List, key, Some(expire_in))
    }

    pub fn expire_hash(&mut self, key: &str, expire_in: Duration) -> Result<()> {
        self.set_key_expiry(KeyedTable::Hash, key, Some(expire_in))
    }

    pub fn persist_set(&mut self, key: &str) -> Result<()> {
        self.set_key_expiry(KeyedTable::Set, key, None)
    }

    pub fn persist_list(&mut self, key: &str) -> Result<()> {
        self.set_key_expiry(KeyedTable::List, key, None)
    }

    pub fn persist_hash(&mut self, key: &str) -> Result<()> {
        self.set_key_expiry(KeyedTable::Hash, key, None)
    }

    fn set_key_expiry(
        &mut self,
        table: KeyedTable,
        key: &str,
        expire_in: Option<Duration>,
    ) -> Result<()> {
        require_non_blank(key, "key")?;
        let args = KeyExpiry {
            key: key.to_string(),
            expire_at: expire_in.map(expire_at).transpose()?,
        };
        let sql = format!(
            "UPDATE [{}] SET ExpireAt = :expire_at WHERE [Key] = :key",
            table.table()
        );
        self.declare_lock(table.lock());
        self.enqueue_command(move |session| {
            session.execute(&sql, &args)?;
            Ok(())
        });
        Ok(())
    }

    fn remove_key(&mut self, table: KeyedTable, key: &str) -> Result<()> {
        require_non_blank(key, "key")?;
        let args = KeyOnly {
            key: key.to_string(),
        };
        let sql = format!("DELETE FROM [{}] WHERE [Key] = :key", table.table());
        self.declare_lock(table.lock());
        self.enqueue_command(move |session| {
            session.execute(&sql, &args)?;
            Ok(())
        });
        Ok(())
    }

    // =========================================================================
    // Commit
    // =========================================================================

    /// Apply every buffered mutation atomically.
    ///
    /// # Errors
    ///
    /// * `LockTimeout` - a declared resource stayed locked past the configured
    ///   lock timeout; nothing was written
    /// * `Database` - a mutation or the commit failed; the database
    ///   transaction was rolled back
    pub fn commit(self) -> Result<()> {
        let WriteTransaction {
            storage,
            commands,
            after_commit,
            locked_resources,
        } = self;

        let started = Instant::now();
        let command_count = commands.len();
        {
            let _locks = storage
                .locks()
                .lock_all(&locked_resources, storage.options().lock_timeout())?;

            let conn = storage.connect()?;
            let session = Session::new(&conn);
            let transaction = session.begin_transaction(None)?;
            let tx_session: &Session<'_> = &transaction;
            for command in commands {
                command(tx_session)?;
            }
            transaction.commit()?;
        }

        for action in after_commit {
            action();
        }

        debug!(
            commands = command_count,
            locks = locked_resources.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "write transaction committed"
        );
        Ok(())
    }
}
