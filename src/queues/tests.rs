//! Tests for the lease queue.

use super::*;
use crate::db::{Bind, Session, to_db_time};
use crate::error::StorageError;
use crate::signal::CancellationToken;
use crate::test_support::{create_test_storage, create_test_storage_with};
use chrono::Utc;
use rusqlite::types::ToSql;
use serial_test::serial;
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

fn enqueue(storage: &crate::storage::SqliteStorage, queue: &str, job_id: i64) {
    let conn = storage.connect().unwrap();
    storage
        .queue_for(queue)
        .enqueue(&Session::new(&conn), queue, job_id)
        .unwrap();
}

struct Backdate {
    id: i64,
    fetched_at: String,
}

impl Bind for Backdate {
    fn bind(&self) -> Vec<(&'static str, &dyn ToSql)> {
        vec![(":id", &self.id), (":fetched_at", &self.fetched_at)]
    }
}

#[test]
fn test_resolve_rejects_empty_queue_list() {
    let providers = QueueProviders::new();
    let queues: [&str; 0] = [];
    assert!(matches!(
        providers.resolve(&queues),
        Err(StorageError::InvalidArgument(_))
    ));
}

#[test]
fn test_resolve_is_case_insensitive() {
    let mut providers = QueueProviders::new();
    providers.add(
        QueueProvider::Dedicated {
            table: "CriticalQueue".to_string(),
        },
        ["critical"],
    );

    assert_eq!(providers.get("CRITICAL").table(), "CriticalQueue");
    assert_eq!(providers.get("default"), &QueueProvider::Default);
    assert_eq!(
        providers.resolve(&["Critical", "critical"]).unwrap().table(),
        "CriticalQueue"
    );
    assert_eq!(
        providers.tables().into_iter().collect::<Vec<_>>(),
        vec!["CriticalQueue", DEFAULT_QUEUE_TABLE]
    );
}

#[test]
fn test_resolve_rejects_mixed_providers() {
    let mut providers = QueueProviders::new();
    providers.add(
        QueueProvider::Dedicated {
            table: "CriticalQueue".to_string(),
        },
        ["critical"],
    );

    let err = providers.resolve(&["default", "critical"]).unwrap_err();
    match err {
        StorageError::DuplicateProviderConflict { queues } => {
            assert_eq!(queues, vec!["default", "critical"]);
        }
        other => panic!("expected DuplicateProviderConflict, got {:?}", other),
    }
}

#[test]
fn test_claim_marks_row_and_reads_it_back() {
    let (_temp_dir, storage) = create_test_storage();
    enqueue(&storage, "default", 7);

    let conn = storage.connect().unwrap();
    let session = Session::new(&conn);
    let queue = storage.queue_for("default");

    let job = queue.try_claim(&session, &["default"]).unwrap().unwrap();
    assert_eq!(job.job_id, 7);
    assert_eq!(job.queue, "default");
    assert_eq!(job.table(), DEFAULT_QUEUE_TABLE);
    assert!(!job.locked_by.is_empty());

    // Claimed rows are invisible to other claims.
    assert!(queue.try_claim(&session, &["default"]).unwrap().is_none());
    assert_eq!(
        queue.enqueued_and_fetched_count(&session, "default").unwrap(),
        (0, 1)
    );
}

#[test]
fn test_claim_ignores_other_queues_and_takes_lowest_id() {
    let (_temp_dir, storage) = create_test_storage();
    enqueue(&storage, "other", 1);
    enqueue(&storage, "default", 2);
    enqueue(&storage, "default", 3);

    let conn = storage.connect().unwrap();
    let session = Session::new(&conn);
    let queue = storage.queue_for("default");

    let job = queue.try_claim(&session, &["default"]).unwrap().unwrap();
    assert_eq!(job.job_id, 2);
    assert_eq!(
        queue.queue_names(&session).unwrap(),
        vec!["default".to_string(), "other".to_string()]
    );
}

#[test]
#[serial]
fn test_concurrent_claimers_get_single_row_once() {
    let (_temp_dir, storage) = create_test_storage();
    enqueue(&storage, "default", 42);

    const CLAIMERS: usize = 8;
    let barrier = Barrier::new(CLAIMERS);

    let claimed: Vec<Option<LeasedJob>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..CLAIMERS)
            .map(|_| {
                scope.spawn(|| {
                    let conn = storage.connect().unwrap();
                    let session = Session::new(&conn);
                    barrier.wait();
                    storage
                        .queue_for("default")
                        .try_claim(&session, &["default"])
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = claimed.into_iter().flatten().collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].job_id, 42);
}

#[test]
fn test_requeue_makes_row_claimable_again() {
    let (_temp_dir, storage) = create_test_storage();
    enqueue(&storage, "default", 5);

    let conn = storage.connect().unwrap();
    let session = Session::new(&conn);
    let queue = storage.queue_for("default");

    let first = queue.try_claim(&session, &["default"]).unwrap().unwrap();
    assert!(first.requeue(&session).unwrap());
    assert_eq!(
        queue.enqueued_and_fetched_count(&session, "default").unwrap(),
        (1, 0)
    );

    let second = queue.try_claim(&session, &["default"]).unwrap().unwrap();
    assert_eq!(second.id, first.id);
    assert_ne!(second.locked_by, first.locked_by);
}

#[test]
fn test_remove_from_queue_deletes_row() {
    let (_temp_dir, storage) = create_test_storage();
    enqueue(&storage, "default", 5);

    let conn = storage.connect().unwrap();
    let session = Session::new(&conn);
    let queue = storage.queue_for("default");

    let job = queue.try_claim(&session, &["default"]).unwrap().unwrap();
    assert!(job.remove_from_queue(&session).unwrap());

    assert_eq!(
        queue.enqueued_and_fetched_count(&session, "default").unwrap(),
        (0, 0)
    );
    assert!(queue.try_claim(&session, &["default"]).unwrap().is_none());
}

#[test]
fn test_stale_lease_is_reclaimed() {
    let (_temp_dir, storage) = create_test_storage_with(|options| {
        options.invisibility_timeout_secs = 60;
    });
    enqueue(&storage, "default", 9);

    let conn = storage.connect().unwrap();
    let session = Session::new(&conn);
    let queue = storage.queue_for("default");

    let abandoned = queue.try_claim(&session, &["default"]).unwrap().unwrap();
    assert!(queue.try_claim(&session, &["default"]).unwrap().is_none());

    // Pretend the claimant died two minutes ago.
    session
        .execute(
            "UPDATE [JobQueue] SET FetchedAt = :fetched_at WHERE Id = :id",
            &Backdate {
                id: abandoned.id,
                fetched_at: to_db_time(Utc::now() - chrono::Duration::minutes(2)),
            },
        )
        .unwrap();

    let reclaimed = queue.try_claim(&session, &["default"]).unwrap().unwrap();
    assert_eq!(reclaimed.id, abandoned.id);
    assert_ne!(reclaimed.locked_by, abandoned.locked_by);
}

/// Claim a row, backdate its lease past the invisibility timeout and let a
/// second claim take it over.
fn stale_and_reclaimed(
    storage: &crate::storage::SqliteStorage,
    session: &Session<'_>,
) -> (LeasedJob, LeasedJob) {
    let queue = storage.queue_for("default");
    let stale = queue.try_claim(session, &["default"]).unwrap().unwrap();
    session
        .execute(
            "UPDATE [JobQueue] SET FetchedAt = :fetched_at WHERE Id = :id",
            &Backdate {
                id: stale.id,
                fetched_at: to_db_time(Utc::now() - chrono::Duration::minutes(2)),
            },
        )
        .unwrap();
    let current = queue.try_claim(session, &["default"]).unwrap().unwrap();
    assert_eq!(current.id, stale.id);
    (stale, current)
}

#[test]
fn test_stale_requeue_leaves_new_lease_alone() {
    let (_temp_dir, storage) = create_test_storage_with(|options| {
        options.invisibility_timeout_secs = 60;
    });
    enqueue(&storage, "default", 13);

    let conn = storage.connect().unwrap();
    let session = Session::new(&conn);
    let (stale, current) = stale_and_reclaimed(&storage, &session);

    assert!(!stale.requeue(&session).unwrap());

    // The current holder still owns the row, so nobody else can claim it.
    let queue = storage.queue_for("default");
    assert!(queue.try_claim(&session, &["default"]).unwrap().is_none());
    assert_eq!(
        queue.enqueued_and_fetched_count(&session, "default").unwrap(),
        (0, 1)
    );
    assert!(current.remove_from_queue(&session).unwrap());
    assert_eq!(
        queue.enqueued_and_fetched_count(&session, "default").unwrap(),
        (0, 0)
    );
}

#[test]
fn test_stale_ack_keeps_reclaimed_row() {
    let (_temp_dir, storage) = create_test_storage_with(|options| {
        options.invisibility_timeout_secs = 60;
    });
    enqueue(&storage, "default", 17);

    let conn = storage.connect().unwrap();
    let session = Session::new(&conn);
    let (stale, current) = stale_and_reclaimed(&storage, &session);

    assert!(!stale.remove_from_queue(&session).unwrap());

    let queue = storage.queue_for("default");
    assert_eq!(
        queue.enqueued_and_fetched_count(&session, "default").unwrap(),
        (0, 1)
    );
    assert!(current.requeue(&session).unwrap());
    let again = queue.try_claim(&session, &["default"]).unwrap().unwrap();
    assert_eq!(again.job_id, 17);
}

#[test]
fn test_fetch_returns_available_job() {
    let (_temp_dir, storage) = create_test_storage();
    enqueue(&storage, "default", 11);

    let job = storage
        .fetch_next_job(&["default"], &CancellationToken::new())
        .unwrap();
    assert_eq!(job.job_id, 11);
}

#[test]
fn test_fetch_routes_dedicated_queue_to_its_table() {
    let (_temp_dir, storage) = create_test_storage_with(|options| {
        options
            .dedicated_queues
            .insert("CriticalQueue".to_string(), vec!["critical".to_string()]);
    });
    enqueue(&storage, "critical", 3);

    let job = storage
        .fetch_next_job(&["critical"], &CancellationToken::new())
        .unwrap();
    assert_eq!(job.job_id, 3);
    assert_eq!(job.table(), "CriticalQueue");

    let err = storage
        .fetch_next_job(&["default", "critical"], &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateProviderConflict { .. }));
}

#[test]
fn test_fetch_rejects_empty_queue_list() {
    let (_temp_dir, storage) = create_test_storage();
    let queues: Vec<String> = Vec::new();
    let err = storage
        .fetch_next_job(&queues, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)));
}

#[test]
#[serial]
fn test_fetch_is_canceled() {
    let (_temp_dir, storage) = create_test_storage_with(|options| {
        options.queue_poll_interval_ms = 10_000;
    });
    let cancel = CancellationToken::new();

    let (result, elapsed) = thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            let start = Instant::now();
            let result = storage.fetch_next_job(&["default"], &cancel);
            (result, start.elapsed())
        });
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
        waiter.join().unwrap()
    });

    assert!(matches!(result, Err(StorageError::Canceled)));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn test_fetch_polls_for_rows_enqueued_elsewhere() {
    let (_temp_dir, storage) = create_test_storage();

    let job = thread::scope(|scope| {
        let waiter = scope.spawn(|| storage.fetch_next_job(&["default"], &CancellationToken::new()));
        thread::sleep(Duration::from_millis(120));
        // A direct insert raises no wake; the poll interval picks it up.
        enqueue(&storage, "default", 21);
        waiter.join().unwrap()
    })
    .unwrap();

    assert_eq!(job.job_id, 21);
}

#[test]
#[serial]
fn test_wake_cuts_poll_latency() {
    let (_temp_dir, storage) = create_test_storage_with(|options| {
        options.queue_poll_interval_ms = 30_000;
    });
    let job_id = crate::test_support::create_job(&storage);

    let (job, elapsed) = thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            let start = Instant::now();
            let job = storage
                .fetch_next_job(&["default"], &CancellationToken::new())
                .unwrap();
            (job, start.elapsed())
        });
        thread::sleep(Duration::from_millis(100));

        let mut transaction = storage.create_write_transaction();
        transaction.add_to_queue("default", &job_id).unwrap();
        transaction.commit().unwrap();

        waiter.join().unwrap()
    });

    assert_eq!(job.job_id.to_string(), job_id);
    assert!(elapsed < Duration::from_secs(10), "waited {:?}", elapsed);
}

#[test]
fn test_shutdown_cancels_waiting_fetch() {
    let (_temp_dir, storage) = create_test_storage_with(|options| {
        options.queue_poll_interval_ms = 30_000;
    });

    let result = thread::scope(|scope| {
        let waiter = scope.spawn(|| storage.fetch_next_job(&["default"], &CancellationToken::new()));
        thread::sleep(Duration::from_millis(100));
        storage.queue_context().shutdown();
        waiter.join().unwrap()
    });

    assert!(matches!(result, Err(StorageError::Canceled)));
}

#[test]
fn test_finished_fetches_leave_no_waiting_pollers() {
    let (_temp_dir, storage) = create_test_storage_with(|options| {
        options.queue_poll_interval_ms = 20;
    });
    for job_id in 1..=200 {
        enqueue(&storage, "default", job_id);
    }

    for _ in 0..200 {
        storage
            .fetch_next_job(&["default"], &CancellationToken::new())
            .unwrap();
    }
    assert_eq!(storage.queue_context().waiting_pollers(), 0);

    // A fetch that only ever wakes on the poll interval unregisters too.
    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            storage
                .fetch_next_job(&["default"], &CancellationToken::new())
                .unwrap()
        });
        thread::sleep(Duration::from_millis(100));
        assert_eq!(storage.queue_context().waiting_pollers(), 1);
        enqueue(&storage, "default", 201);
        assert_eq!(waiter.join().unwrap().job_id, 201);
    });
    assert_eq!(storage.queue_context().waiting_pollers(), 0);
}
