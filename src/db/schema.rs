//! Schema installation.

use crate::error::Result;
use rusqlite::Connection;
use tracing::{info, warn};

const INSTALL_ATTEMPTS: usize = 3;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS [Job] (
    Id              INTEGER PRIMARY KEY AUTOINCREMENT,
    StateId         INTEGER NULL,
    StateName       TEXT NULL,
    InvocationData  TEXT NOT NULL,
    Arguments       TEXT NOT NULL,
    CreatedAt       TEXT NOT NULL,
    ExpireAt        TEXT NULL
);
CREATE INDEX IF NOT EXISTS [IX_Job_ExpireAt] ON [Job](ExpireAt);

CREATE TABLE IF NOT EXISTS [State] (
    Id          INTEGER PRIMARY KEY AUTOINCREMENT,
    JobId       INTEGER NOT NULL REFERENCES [Job](Id) ON DELETE CASCADE,
    Name        TEXT NOT NULL,
    Reason      TEXT NULL,
    CreatedAt   TEXT NOT NULL,
    Data        TEXT NULL
);
CREATE INDEX IF NOT EXISTS [IX_State_JobId] ON [State](JobId);

CREATE TABLE IF NOT EXISTS [JobParameter] (
    JobId   INTEGER NOT NULL REFERENCES [Job](Id) ON DELETE CASCADE,
    Name    TEXT NOT NULL,
    Value   TEXT NULL,
    PRIMARY KEY (JobId, Name)
);

CREATE TABLE IF NOT EXISTS [Server] (
    Id              TEXT PRIMARY KEY,
    Data            TEXT NULL,
    LastHeartbeat   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS [Counter] (
    Id          INTEGER PRIMARY KEY AUTOINCREMENT,
    [Key]       TEXT NOT NULL,
    Value       INTEGER NOT NULL,
    ExpireAt    TEXT NULL
);
CREATE INDEX IF NOT EXISTS [IX_Counter_Key] ON [Counter]([Key]);

CREATE TABLE IF NOT EXISTS [AggregatedCounter] (
    Id          INTEGER PRIMARY KEY AUTOINCREMENT,
    [Key]       TEXT NOT NULL UNIQUE,
    Value       INTEGER NOT NULL,
    ExpireAt    TEXT NULL
);
CREATE INDEX IF NOT EXISTS [IX_AggregatedCounter_ExpireAt] ON [AggregatedCounter](ExpireAt);

CREATE TABLE IF NOT EXISTS [Set] (
    Id          INTEGER PRIMARY KEY AUTOINCREMENT,
    [Key]       TEXT NOT NULL,
    Value       TEXT NOT NULL,
    Score       REAL NOT NULL,
    ExpireAt    TEXT NULL,
    UNIQUE ([Key], Value)
);
CREATE INDEX IF NOT EXISTS [IX_Set_ExpireAt] ON [Set](ExpireAt);

CREATE TABLE IF NOT EXISTS [List] (
    Id          INTEGER PRIMARY KEY AUTOINCREMENT,
    [Key]       TEXT NOT NULL,
    Value       TEXT NULL,
    ExpireAt    TEXT NULL
);
CREATE INDEX IF NOT EXISTS [IX_List_Key] ON [List]([Key]);
CREATE INDEX IF NOT EXISTS [IX_List_ExpireAt] ON [List](ExpireAt);

CREATE TABLE IF NOT EXISTS [Hash] (
    Id          INTEGER PRIMARY KEY AUTOINCREMENT,
    [Key]       TEXT NOT NULL,
    Field       TEXT NOT NULL,
    Value       TEXT NULL,
    ExpireAt    TEXT NULL,
    UNIQUE ([Key], Field)
);
CREATE INDEX IF NOT EXISTS [IX_Hash_ExpireAt] ON [Hash](ExpireAt);
"#;

fn queue_table_sql(table: &str) -> String {
    format!(
        r#"
CREATE TABLE IF NOT EXISTS [{table}] (
    Id          INTEGER PRIMARY KEY AUTOINCREMENT,
    JobId       INTEGER NOT NULL,
    Queue       TEXT NOT NULL,
    FetchedAt   TEXT NULL,
    LockedBy    TEXT NULL
);
CREATE INDEX IF NOT EXISTS [IX_{table}_Queue] ON [{table}](Queue, FetchedAt);
CREATE INDEX IF NOT EXISTS [IX_{table}_LockedBy] ON [{table}](LockedBy);
"#
    )
}

/// Create every table used by the storage, plus one table per queue table
/// name given. Idempotent; retried a few times because another process may
/// be installing concurrently.
///
/// Queue table names must already be validated identifiers.
pub fn install_schema<'a>(
    conn: &Connection,
    queue_tables: impl IntoIterator<Item = &'a str>,
) -> Result<()> {
    let mut script = SCHEMA.to_string();
    for table in queue_tables {
        script.push_str(&queue_table_sql(table));
    }

    info!("installing job storage schema");

    let mut last_error = None;
    for attempt in 1..=INSTALL_ATTEMPTS {
        match conn.execute_batch(&script) {
            Ok(()) => {
                info!("job storage schema installed");
                return Ok(());
            }
            Err(e) => {
                warn!(attempt, error = %e, "schema installation failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
