//! Tests for storage options.

use crate::config::{ExpirableTable, StorageOptions};
use std::path::PathBuf;
use std::time::Duration;

#[test]
fn test_default_options() {
    let options = StorageOptions::default();

    assert_eq!(options.database_path, PathBuf::from("jobs.db"));
    assert!(options.lock_directory.is_none());
    assert!(options.prepare_schema_if_necessary);
    assert_eq!(options.queue_poll_interval(), Duration::from_secs(15));
    assert_eq!(options.invisibility_timeout(), Duration::from_secs(1800));
    assert_eq!(options.lock_timeout(), Duration::from_secs(15));
    assert_eq!(options.command_timeout(), Duration::from_secs(5));
    assert_eq!(options.expiration_batch_size, 1000);
    assert_eq!(options.expiration_lock_timeout(), Duration::from_secs(300));
    assert_eq!(options.expiration_tables, ExpirableTable::ALL.to_vec());
    assert!(options.dedicated_queues.is_empty());
}

#[test]
fn test_parse_empty_yaml_uses_defaults() {
    let options = StorageOptions::from_yaml("").unwrap();
    assert_eq!(options.expiration_batch_size, 1000);
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
database_path: /var/lib/jobs/storage.db
queue_poll_interval_ms: 250
expiration_tables: [Job, Set]
dedicated_queues:
  CriticalQueue: [critical, alerts]
"#;
    let options = StorageOptions::from_yaml(yaml).unwrap();

    assert_eq!(options.database_path, PathBuf::from("/var/lib/jobs/storage.db"));
    assert_eq!(options.queue_poll_interval(), Duration::from_millis(250));
    assert_eq!(
        options.expiration_tables,
        vec![ExpirableTable::Job, ExpirableTable::Set]
    );
    assert_eq!(options.dedicated_queues["CriticalQueue"].len(), 2);

    // Unspecified values keep their defaults
    assert_eq!(options.lock_timeout_secs, 15);
}

#[test]
fn test_unknown_fields_are_ignored() {
    let yaml = "some_future_option: true\nexpiration_batch_size: 50\n";
    let options = StorageOptions::from_yaml(yaml).unwrap();
    assert_eq!(options.expiration_batch_size, 50);
}

#[test]
fn test_zero_poll_interval_rejected() {
    let err = StorageOptions::from_yaml("queue_poll_interval_ms: 0").unwrap_err();
    assert!(err.to_string().contains("queue_poll_interval_ms"));
}

#[test]
fn test_zero_batch_size_rejected() {
    assert!(StorageOptions::from_yaml("expiration_batch_size: 0").is_err());
}

#[test]
fn test_unknown_expiration_table_rejected() {
    assert!(StorageOptions::from_yaml("expiration_tables: [Server]").is_err());
}

#[test]
fn test_dedicated_queue_table_must_be_identifier() {
    let yaml = "dedicated_queues:\n  \"Bad Table\": [a]\n";
    assert!(StorageOptions::from_yaml(yaml).is_err());

    let yaml = "dedicated_queues:\n  jobqueue: [a]\n";
    assert!(StorageOptions::from_yaml(yaml).is_err());
}

#[test]
fn test_queue_assigned_twice_rejected() {
    let yaml = r#"
dedicated_queues:
  FirstQueue: [shared]
  SecondQueue: [SHARED]
"#;
    let err = StorageOptions::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("more than one"));
}

#[test]
fn test_lock_directory_defaults_next_to_database() {
    let options = StorageOptions::for_database("/data/app/jobs.sqlite");
    assert_eq!(
        options.resolved_lock_directory(),
        PathBuf::from("/data/app/jobs.sqlite.locks")
    );

    let options = StorageOptions {
        lock_directory: Some(PathBuf::from("/run/locks")),
        ..StorageOptions::default()
    };
    assert_eq!(options.resolved_lock_directory(), PathBuf::from("/run/locks"));
}

#[test]
fn test_yaml_roundtrip_preserves_values() {
    let mut options = StorageOptions::for_database("x.db");
    options.expiration_batch_size = 10;
    let yaml = options.to_yaml().unwrap();
    let parsed = StorageOptions::from_yaml(&yaml).unwrap();
    assert_eq!(parsed.expiration_batch_size, 10);
    assert_eq!(parsed.database_path, PathBuf::from("x.db"));
}
