//! Tests for the persistence session.

use super::*;
use chrono::TimeZone;
use rusqlite::types::ToSql;
use std::time::Duration;
use tempfile::TempDir;

fn open_test_db() -> (TempDir, Connection) {
    let temp_dir = TempDir::new().unwrap();
    let conn = open_connection(&temp_dir.path().join("test.db"), Duration::from_secs(5)).unwrap();
    install_schema(&conn, ["JobQueue"]).unwrap();
    (temp_dir, conn)
}

struct ListItem<'a> {
    key: &'a str,
    value: &'a str,
}

impl Bind for ListItem<'_> {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":key", &self.key), (":value", &self.value)]
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

const INSERT_LIST: &str = "INSERT INTO [List]([Key], Value) VALUES (:key, :value)";
const SELECT_LIST: &str = "SELECT Value FROM [List] WHERE [Key] = :key ORDER BY Id";
const COUNT_LIST: &str = "SELECT COUNT(*) FROM [List] WHERE [Key] = :key";

fn count(session: &Session<'_>, key: &str) -> i64 {
    session
        .execute_scalar::<i64>(COUNT_LIST, &ByKey { key })
        .unwrap()
        .unwrap_or(0)
}

#[test]
fn test_execute_and_query() {
    let (_temp_dir, conn) = open_test_db();
    let session = Session::new(&conn);

    let affected = session
        .execute(INSERT_LIST, &ListItem { key: "k", value: "a" })
        .unwrap();
    assert_eq!(affected, 1);
    session
        .execute(INSERT_LIST, &ListItem { key: "k", value: "b" })
        .unwrap();

    let values: Vec<String> = session.query(SELECT_LIST, &ByKey { key: "k" }).unwrap();
    assert_eq!(values, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_execute_scalar_without_rows_is_none() {
    let (_temp_dir, conn) = open_test_db();
    let session = Session::new(&conn);

    let value: Option<String> = session
        .execute_scalar("SELECT Value FROM [List] WHERE [Key] = :key", &ByKey { key: "none" })
        .unwrap();
    assert!(value.is_none());
}

#[test]
fn test_dropped_transaction_rolls_back() {
    let (_temp_dir, conn) = open_test_db();
    let session = Session::new(&conn);

    {
        let tx = session.begin_transaction(None).unwrap();
        tx.execute(INSERT_LIST, &ListItem { key: "k", value: "a" })
            .unwrap();
        assert_eq!(count(&tx, "k"), 1);
    }

    assert_eq!(count(&session, "k"), 0);
}

#[test]
fn test_committed_transaction_is_visible() {
    let (_temp_dir, conn) = open_test_db();
    let session = Session::new(&conn);

    let tx = session
        .begin_transaction(Some(IsolationLevel::Serializable))
        .unwrap();
    tx.execute(INSERT_LIST, &ListItem { key: "k", value: "a" })
        .unwrap();
    tx.commit().unwrap();

    assert_eq!(count(&session, "k"), 1);
}

#[test]
fn test_nested_transaction_uses_savepoint() {
    let (_temp_dir, conn) = open_test_db();
    let session = Session::new(&conn);

    let outer = session.begin_transaction(None).unwrap();
    outer
        .execute(INSERT_LIST, &ListItem { key: "k", value: "outer" })
        .unwrap();

    let inner = outer.begin_transaction(None).unwrap();
    inner
        .execute(INSERT_LIST, &ListItem { key: "k", value: "inner" })
        .unwrap();
    inner.rollback().unwrap();

    let inner = outer.begin_transaction(None).unwrap();
    inner
        .execute(INSERT_LIST, &ListItem { key: "k", value: "kept" })
        .unwrap();
    inner.commit().unwrap();

    outer.commit().unwrap();

    let values: Vec<String> = session.query(SELECT_LIST, &ByKey { key: "k" }).unwrap();
    assert_eq!(values, vec!["outer".to_string(), "kept".to_string()]);
}

#[test]
fn test_db_time_is_fixed_width_and_ordered() {
    let early = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let later = early + chrono::Duration::milliseconds(1500);

    let a = to_db_time(early);
    let b = to_db_time(later);
    assert_eq!(a, "2024-01-01T00:00:00.000Z");
    assert_eq!(a.len(), b.len());
    assert!(a < b);
}

#[test]
fn test_install_schema_is_idempotent() {
    let (_temp_dir, conn) = open_test_db();
    install_schema(&conn, ["JobQueue", "CriticalQueue"]).unwrap();
    install_schema(&conn, ["JobQueue", "CriticalQueue"]).unwrap();

    let session = Session::new(&conn);
    let tables: Option<i64> = session
        .execute_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'CriticalQueue'",
            &NoParams,
        )
        .unwrap();
    assert_eq!(tables, Some(1));
}
