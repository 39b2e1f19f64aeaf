//! Cancellation and wake-up primitives.
//!
//! Both are built on `crossbeam-channel` so a waiting thread can block on
//! several conditions at once with `select!`.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

/// Cooperative cancellation shared between a controller and its workers.
///
/// Cancelling disconnects the underlying channel, so every receiver
/// obtained from [`CancellationToken::receiver`] becomes ready at once.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug)]
struct CancelInner {
    cancelled: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// A receiver that becomes ready (disconnected) once cancelled.
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.receiver
    }

    /// Sleep for `timeout` unless cancelled first.
    ///
    /// Returns `true` when woken by cancellation.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        // Nothing is ever sent, so the only outcomes are timeout or disconnect.
        let _ = self.inner.receiver.recv_timeout(timeout);
        self.is_cancelled()
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Broadcast "new item" condition for waiters in this process.
///
/// Each waiter subscribes once and gets its own receiver. A notification
/// leaves at most one pending wake per subscriber, so a burst of enqueues
/// costs a waiter one extra claim attempt, not one per item.
#[derive(Debug, Default)]
pub struct WakeSignal {
    subscribers: Mutex<Vec<(u64, Sender<()>)>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// One waiter's registration. Dropping it unregisters the waiter.
#[derive(Debug)]
pub struct Subscription<'a> {
    signal: &'a WakeSignal,
    id: u64,
    receiver: Receiver<()>,
}

impl Subscription<'_> {
    pub fn receiver(&self) -> &Receiver<()> {
        &self.receiver
    }
}

impl Deref for Subscription<'_> {
    type Target = Receiver<()>;

    fn deref(&self) -> &Self::Target {
        &self.receiver
    }
}

impl Drop for Subscription<'_> {
    fn drop(&mut self) {
        self.signal.unsubscribe(self.id);
    }
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter.
    ///
    /// After [`WakeSignal::shutdown`] the returned receiver is already
    /// disconnected.
    pub fn subscribe(&self) -> Subscription<'_> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.subscribers.lock();
        if !self.closed.load(Ordering::SeqCst) {
            subscribers.push((id, sender));
        }
        Subscription {
            signal: self,
            id,
            receiver,
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|(other, _)| *other != id);
    }

    /// Wake every current subscriber.
    pub fn notify_all(&self) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|(_, sender)| match sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Disconnect every subscriber; they observe the signal as closed.
    pub fn shutdown(&self) {
        let mut subscribers = self.subscribers.lock();
        self.closed.store(true, Ordering::SeqCst);
        subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
