//! Per-identity mutual exclusion.
//!
//! A reconciliation holds an [`IdentityGuard`] for its whole duration; a
//! second attempt on the same identity is rejected instead of queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::state::ResourceIdentity;

/// Set of identities currently being reconciled.
#[derive(Debug, Default)]
pub struct IdentityLocks {
    active: Mutex<HashSet<ResourceIdentity>>,
}

/// Releases its identity on drop.
#[derive(Debug)]
pub struct IdentityGuard {
    locks: Arc<IdentityLocks>,
    identity: ResourceIdentity,
}

impl IdentityLocks {
    /// Creates an empty lock set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `identity` as busy, or returns `None` if it already is.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>, identity: &ResourceIdentity) -> Option<IdentityGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        active.insert(identity.clone()).then(|| IdentityGuard {
            locks: Arc::clone(self),
            identity: identity.clone(),
        })
    }

    /// Returns true if `identity` is busy.
    #[must_use]
    pub fn is_active(&self, identity: &ResourceIdentity) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(identity)
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        self.locks
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.identity);
    }
}
