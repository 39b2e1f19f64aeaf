//! Lease queue for sqlite-jobs.
//!
//! Queue rows live in a queue table (`JobQueue` by default, or a dedicated
//! table configured for some queue names). Many pollers in many processes
//! race for the same rows; a row goes to exactly one of them through an
//! atomic claim that stamps it with a fresh correlation id.
//!
//! # Lease lifecycle
//!
//! - Enqueued: `LockedBy` is NULL
//! - Claimed: `LockedBy` holds the claimant's correlation id and
//!   `FetchedAt` the claim time
//! - Acknowledged: the row is deleted ([`LeasedJob::remove_from_queue`])
//! - Requeued: both lease columns are cleared ([`LeasedJob::requeue`])
//!
//! A claim older than the invisibility timeout is considered abandoned and
//! may be claimed again, so delivery is at-least-once.

mod fetched;
mod lease;

#[cfg(test)]
mod tests;

pub use fetched::LeasedJob;
pub use lease::LeaseQueue;

use crate::config::StorageOptions;
use crate::error::{Result, StorageError};
use crate::signal::{Subscription, WakeSignal};
use std::collections::{BTreeSet, HashMap};

/// Table backing the default queue provider.
pub const DEFAULT_QUEUE_TABLE: &str = "JobQueue";

static DEFAULT_PROVIDER: QueueProvider = QueueProvider::Default;

/// Where the rows of a queue are stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum QueueProvider {
    /// The shared `JobQueue` table.
    Default,
    /// A table reserved for some queue names.
    Dedicated { table: String },
}

impl QueueProvider {
    pub fn table(&self) -> &str {
        match self {
            QueueProvider::Default => DEFAULT_QUEUE_TABLE,
            QueueProvider::Dedicated { table } => table,
        }
    }
}

/// Queue name to provider mapping. Names compare case-insensitively and
/// unmapped names fall back to [`QueueProvider::Default`].
#[derive(Debug, Clone, Default)]
pub struct QueueProviders {
    by_queue: HashMap<String, QueueProvider>,
}

impl QueueProviders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Providers for the dedicated tables configured in `options`.
    pub fn from_options(options: &StorageOptions) -> Self {
        let mut providers = Self::new();
        for (table, queues) in &options.dedicated_queues {
            providers.add(
                QueueProvider::Dedicated {
                    table: table.clone(),
                },
                queues,
            );
        }
        providers
    }

    /// Route `queues` to `provider`, replacing earlier routes.
    pub fn add<I, S>(&mut self, provider: QueueProvider, queues: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for queue in queues {
            self.by_queue
                .insert(queue.as_ref().to_lowercase(), provider.clone());
        }
    }

    pub fn get(&self, queue: &str) -> &QueueProvider {
        self.by_queue
            .get(&queue.to_lowercase())
            .unwrap_or(&DEFAULT_PROVIDER)
    }

    /// The single provider serving every queue in `queues`.
    ///
    /// # Errors
    ///
    /// * `InvalidArgument` - `queues` is empty or contains a blank name
    /// * `DuplicateProviderConflict` - the queues span several providers
    pub fn resolve<S: AsRef<str>>(&self, queues: &[S]) -> Result<&QueueProvider> {
        if queues.is_empty() {
            return Err(StorageError::invalid("queue list must not be empty"));
        }

        let mut resolved: Option<&QueueProvider> = None;
        for queue in queues {
            let queue = queue.as_ref();
            if queue.trim().is_empty() {
                return Err(StorageError::invalid("queue names must not be empty"));
            }
            let provider = self.get(queue);
            match resolved {
                None => resolved = Some(provider),
                Some(existing) if existing == provider => {}
                Some(_) => {
                    return Err(StorageError::DuplicateProviderConflict {
                        queues: queues.iter().map(|q| q.as_ref().to_string()).collect(),
                    });
                }
            }
        }

        resolved.ok_or_else(|| StorageError::invalid("queue list must not be empty"))
    }

    /// Every table a provider may read from, `JobQueue` included.
    pub fn tables(&self) -> BTreeSet<&str> {
        let mut tables: BTreeSet<&str> = self.by_queue.values().map(|p| p.table()).collect();
        tables.insert(DEFAULT_QUEUE_TABLE);
        tables
    }
}

/// Process-wide queue state owned by one storage instance.
///
/// Holds the wake signal that enqueues in this process raise after their
/// transaction commits, letting waiting pollers retry before their poll
/// interval elapses.
#[derive(Debug, Default)]
pub struct QueueContext {
    wake: WakeSignal,
}

impl QueueContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn subscribe(&self) -> Subscription<'_> {
        self.wake.subscribe()
    }

    /// Pollers currently waiting for a wake.
    pub fn waiting_pollers(&self) -> usize {
        self.wake.subscriber_count()
    }

    /// Wake every poller waiting in this process.
    pub fn notify_new_item(&self) {
        self.wake.notify_all();
    }

    /// Wake every poller for good; they return `Canceled`.
    pub fn shutdown(&self) {
        self.wake.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.wake.is_closed()
    }
}
