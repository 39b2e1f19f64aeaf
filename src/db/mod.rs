//! Persistence session over a SQLite connection.
//!
//! Every unit of work (a write transaction commit, a claim attempt, a sweep
//! pass) opens its own connection with [`open_connection`] and wraps it in a
//! [`Session`]. Sessions run parameterized statements; a [`Transaction`] is a
//! session too, so transactions nest (the outermost issues `BEGIN`, inner
//! ones use savepoints).
//!
//! # Parameters
//!
//! Statements take their arguments through the [`Bind`] trait: each query
//! shape has its own small struct listing named parameters, which keeps the
//! binding contract checked at compile time.
//!
//! # Timestamps
//!
//! Timestamps are stored as fixed-width RFC 3339 UTC text with millisecond
//! precision (`2024-01-01T00:00:00.000Z`), so comparing the text compares
//! the instants.

mod schema;

#[cfg(test)]
mod tests;

pub use schema::install_schema;

use crate::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, ToSql, Type};
use rusqlite::{Connection, OptionalExtension, Row};
use std::ops::Deref;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Open a connection configured for multi-process use.
pub fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(conn)
}

/// Named parameters of one statement shape.
pub trait Bind {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)>;
}

/// Statements without parameters.
pub struct NoParams;

impl Bind for NoParams {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        Vec::new()
    }
}

/// Typed mapping of one result row.
pub trait FromRow: Sized {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

macro_rules! single_column_from_row {
    ($($ty:ty),*) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
                    row.get(0)
                }
            }
        )*
    };
}

single_column_from_row!(i64, f64, String, Option<String>);

/// Transaction isolation, mapped onto SQLite's `BEGIN` behaviors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// `BEGIN DEFERRED`: the write lock is taken on first write.
    ReadUncommitted,
    /// `BEGIN IMMEDIATE`: the write lock is taken up front.
    #[default]
    ReadCommitted,
    /// `BEGIN EXCLUSIVE`: readers outside WAL are blocked as well.
    Serializable,
}

impl IsolationLevel {
    fn begin_statement(&self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "BEGIN DEFERRED",
            IsolationLevel::ReadCommitted => "BEGIN IMMEDIATE",
            IsolationLevel::Serializable => "BEGIN EXCLUSIVE",
        }
    }
}

/// A session bound to one connection. Not shared across threads.
#[derive(Debug)]
pub struct Session<'c> {
    conn: &'c Connection,
    depth: usize,
}

impl<'c> Session<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn, depth: 0 }
    }

    /// Execute a statement, returning the number of affected rows.
    pub fn execute(&self, sql: &str, args: &dyn Bind) -> Result<usize> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let named = args.bind();
        Ok(stmt.execute(named.as_slice())?)
    }

    /// Run a query and map every row.
    pub fn query<T: FromRow>(&self, sql: &str, args: &dyn Bind) -> Result<Vec<T>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let named = args.bind();
        let rows = stmt.query_map(named.as_slice(), |row| T::from_row(row))?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// First column of the first row, `None` when there is no row or the
    /// value is NULL.
    pub fn execute_scalar<T: FromSql>(&self, sql: &str, args: &dyn Bind) -> Result<Option<T>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let named = args.bind();
        let value = stmt
            .query_row(named.as_slice(), |row| row.get::<_, Option<T>>(0))
            .optional()?;
        Ok(value.flatten())
    }

    /// Row id of the last insert made on this connection.
    pub fn last_insert_id(&self) -> i64 {
        self.conn.last_insert_rowid()
    }

    /// Begin a transaction, or a savepoint when one is already open.
    pub fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Result<Transaction<'c>> {
        let depth = self.depth + 1;
        let savepoint = if self.depth == 0 {
            let level = isolation.unwrap_or_default();
            self.conn.execute_batch(level.begin_statement())?;
            None
        } else {
            let name = format!("sp_{}", depth);
            self.conn.execute_batch(&format!("SAVEPOINT {}", name))?;
            Some(name)
        };

        Ok(Transaction {
            session: Session {
                conn: self.conn,
                depth,
            },
            savepoint,
            finished: false,
        })
    }
}

/// An open transaction. Rolled back when dropped without `commit`.
#[derive(Debug)]
pub struct Transaction<'c> {
    session: Session<'c>,
    savepoint: Option<String>,
    finished: bool,
}

impl Transaction<'_> {
    pub fn commit(mut self) -> Result<()> {
        let sql = match &self.savepoint {
            None => "COMMIT".to_string(),
            Some(name) => format!("RELEASE SAVEPOINT {}", name),
        };
        self.session.conn.execute_batch(&sql)?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.undo()
    }

    fn undo(&self) -> Result<()> {
        let sql = match &self.savepoint {
            None => "ROLLBACK".to_string(),
            Some(name) => format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"),
        };
        self.session.conn.execute_batch(&sql)?;
        Ok(())
    }
}

impl<'c> Deref for Transaction<'c> {
    type Target = Session<'c>;

    fn deref(&self) -> &Self::Target {
        &self.session
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished
            && let Err(e) = self.undo()
        {
            warn!(error = %e, "failed to roll back transaction");
        }
    }
}

/// Format an instant for storage.
pub fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Read an optional timestamp column.
pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
    })
    .transpose()
}
