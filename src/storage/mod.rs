//! The job storage facade.
//!
//! [`SqliteStorage`] ties the pieces together for one database file: it
//! installs the schema, owns this process's lock registry and queue
//! context, resolves queue providers, and hands out write transactions,
//! leases and the expiration sweeper. Data-access operations used by the
//! job framework live in `connection.rs`.

mod connection;
mod model;


pub use model::{JobData, JobState, ServerData};

use crate::config::StorageOptions;
use crate::db::{install_schema, open_connection};
use crate::error::{Result, require_non_blank};
use crate::expiration::ExpirationManager;
use crate::locks::{LockRegistry, ReleaseToken};
use crate::queues::{LeaseQueue, LeasedJob, QueueContext, QueueProvider, QueueProviders};
use crate::signal::CancellationToken;
use crate::transaction::WriteTransaction;
use rusqlite::Connection;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::info;

/// Job storage over one shared SQLite database.
///
/// Share it between threads by reference (or in an `Arc`); every unit of
/// work opens its own connection.
#[derive(Debug)]
pub struct SqliteStorage {
    options: StorageOptions,
    locks: LockRegistry,
    providers: QueueProviders,
    queue_context: QueueContext,
    shut_down: AtomicBool,
}

impl SqliteStorage {
    /// Open the storage described by `options`.
    ///
    /// Validates the options, creates the lock directory lazily on first
    /// lock, and installs the schema (including dedicated queue tables)
    /// when `prepare_schema_if_necessary` is set.
    pub fn open(options: StorageOptions) -> Result<Self> {
        options.validate()?;

        let providers = QueueProviders::from_options(&options);
        let storage = Self {
            locks: LockRegistry::new(options.resolved_lock_directory()),
            providers,
            queue_context: QueueContext::new(),
            shut_down: AtomicBool::new(false),
            options,
        };

        if storage.options.prepare_schema_if_necessary {
            storage.install_schema()?;
        }

        info!(
            database = %storage.options.database_path.display(),
            locks = %storage.locks.directory().display(),
            "job storage opened"
        );
        Ok(storage)
    }

    /// Create every table, dedicated queue tables included. Idempotent.
    pub fn install_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        install_schema(&conn, self.providers.tables())
    }

    pub fn options(&self) -> &StorageOptions {
        &self.options
    }

    /// Open a new connection to the database.
    pub fn connect(&self) -> Result<Connection> {
        open_connection(&self.options.database_path, self.options.command_timeout())
    }

    /// This process's lock registry.
    pub fn locks(&self) -> &LockRegistry {
        &self.locks
    }

    pub fn queue_providers(&self) -> &QueueProviders {
        &self.providers
    }

    pub fn queue_context(&self) -> &QueueContext {
        &self.queue_context
    }

    /// The lease queue behind `provider`.
    pub fn queue<'a>(&'a self, provider: &'a QueueProvider) -> LeaseQueue<'a> {
        LeaseQueue::new(provider, &self.queue_context, &self.options)
    }

    /// The lease queue serving the queue named `queue`.
    pub fn queue_for(&self, queue: &str) -> LeaseQueue<'_> {
        self.queue(self.providers.get(queue))
    }

    /// Lock an arbitrary resource across every process sharing the
    /// database.
    pub fn acquire_distributed_lock(&self, resource: &str, timeout: Duration) -> Result<ReleaseToken> {
        require_non_blank(resource, "resource")?;
        self.locks.acquire(resource, timeout)
    }

    /// Lease the next job from any of `queues`, blocking until one is
    /// available or `cancel` fires.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - `queues` is empty
    /// * `DuplicateProviderConflict` - `queues` span several queue providers
    /// * `Canceled` - cancellation or storage shutdown
    pub fn fetch_next_job<S: AsRef<str>>(
        &self,
        queues: &[S],
        cancel: &CancellationToken,
    ) -> Result<LeasedJob> {
        let provider = self.providers.resolve(queues)?;
        self.queue(provider)
            .dequeue(|| self.connect(), queues, cancel)
    }

    /// Start buffering mutations for one atomic commit.
    pub fn create_write_transaction(&self) -> WriteTransaction<'_> {
        WriteTransaction::new(self)
    }

    pub fn expiration_manager(&self) -> ExpirationManager<'_> {
        ExpirationManager::new(self)
    }

    /// Release every lock held by this process and wake every waiting
    /// poller. Idempotent; later lock acquisitions fail.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.queue_context.shutdown();
        self.locks.shutdown();
        info!("job storage shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

impl Drop for SqliteStorage {
    fn drop(&mut self) {
        self.shutdown();
    }
}
