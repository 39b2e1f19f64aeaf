//! RAII release tokens.

use super::registry::Inner;
use std::sync::Arc;
use uuid::Uuid;

/// Single-use handle for one acquisition of a resource.
///
/// Dropping the token (or calling [`ReleaseToken::release`]) removes its
/// holder id from the resource's entry. The OS lock is released only by the
/// token that empties the entry. Releasing never blocks on other processes
/// and never fails: a missing entry or a disposed registry is a no-op.
#[derive(Debug)]
pub struct ReleaseToken {
    registry: Arc<Inner>,
    resource: String,
    holder: Uuid,
    released: bool,
}

impl ReleaseToken {
    pub(super) fn new(registry: Arc<Inner>, resource: String, holder: Uuid) -> Self {
        Self {
            registry,
            resource,
            holder,
            released: false,
        }
    }

    /// The resource this token holds.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// The holder id recorded in the registry for this acquisition.
    pub fn holder(&self) -> Uuid {
        self.holder
    }

    /// Release before the token goes out of scope.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.registry.release(&self.resource, self.holder);
        }
    }
}

impl Drop for ReleaseToken {
    fn drop(&mut self) {
        self.release_once();
    }
}

/// Tokens obtained by one `lock_all` call, released in reverse order.
#[derive(Debug, Default)]
pub struct LockBundle {
    tokens: Vec<ReleaseToken>,
}

impl LockBundle {
    pub(super) fn push(&mut self, token: ReleaseToken) {
        self.tokens.push(token);
    }

    /// Resources held by the bundle, in acquisition order.
    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(|t| t.resource())
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Release every lock now.
    pub fn release(self) {}
}

impl Drop for LockBundle {
    fn drop(&mut self) {
        while let Some(token) = self.tokens.pop() {
            token.release();
        }
    }
}
