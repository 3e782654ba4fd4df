//! State locking for concurrent access protection.
//!
//! Two `provisio apply` runs against the same state directory would race on
//! the same external objects, so a run holds an advisory lock for its duration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

use super::store::StateStore;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 3600;

/// Information about a state lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock info.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

/// Acquires the stack lock, waiting out contention up to `attempts` times.
///
/// The wait between attempts is the error's
/// [`retry_delay_secs`](crate::error::ProvisioError::retry_delay_secs).
///
/// # Errors
///
/// Returns the last lock error once attempts are exhausted, or any
/// non-retryable error immediately.
pub async fn acquire_with_retry(store: &dyn StateStore, holder: &str, attempts: u32) -> Result<LockInfo> {
    let mut attempt = 1;
    loop {
        match store.acquire_lock(holder).await {
            Ok(lock) => return Ok(lock),
            Err(err) if err.is_retryable() && attempt < attempts => {
                let delay = err.retry_delay_secs().unwrap_or(1);
                warn!("{err}; retrying in {delay}s (attempt {attempt}/{attempts})");
                tokio::time::sleep(Duration::from_secs(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProvisioError, StateError};
    use crate::state::MemoryStateStore;
    use std::sync::Arc;

    #[test]
    fn test_lock_creation() {
        let lock = LockInfo::new("test-holder");
        assert_eq!(lock.holder, "test-holder");
        assert!(!lock.is_expired());
        assert!(lock.remaining_secs() > 0);
    }

    #[test]
    fn test_expired_lock() {
        let mut lock = LockInfo::new("test-holder");
        lock.expires_at = Utc::now() - chrono::Duration::seconds(1);

        assert!(lock.is_expired());
        assert_eq!(lock.remaining_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_for_the_holder_to_release() {
        let store = Arc::new(MemoryStateStore::new());
        let held = store.acquire_lock("other").await.unwrap();

        let releaser = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                store.release_lock(&held.lock_id).await.unwrap();
            })
        };

        let lock = acquire_with_retry(store.as_ref(), "me", 3).await.unwrap();
        assert_eq!(lock.holder, "me");
        releaser.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_the_last_attempt() {
        let store = MemoryStateStore::new();
        store.acquire_lock("other").await.unwrap();

        let started = tokio::time::Instant::now();
        let err = acquire_with_retry(&store, "me", 2).await.unwrap_err();

        assert!(matches!(err, ProvisioError::State(StateError::LockedByOther { .. })));
        assert!(started.elapsed() >= Duration::from_secs(10));
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);

        let pid = std::process::id().to_string();
        assert!(id1.contains(&pid));
    }
}
