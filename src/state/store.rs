//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::{ResourceIdentity, StateRecord};

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the record for an identity.
    ///
    /// Returns `None` if the resource has never been created.
    async fn load(&self, identity: &ResourceIdentity) -> Result<Option<StateRecord>>;

    /// Saves a record, fully replacing any previous record for its identity.
    ///
    /// A crash during `save` must never leave a half-written record visible to `load`.
    async fn save(&self, record: &StateRecord) -> Result<()>;

    /// Deletes the record for an identity. Deleting an absent record is not an error.
    async fn delete(&self, identity: &ResourceIdentity) -> Result<()>;

    /// Lists every stored record, ordered by identity.
    async fn list(&self) -> Result<Vec<StateRecord>>;

    /// Acquires the stack-wide lock.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the stack-wide lock.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool> {
        Ok(self
            .get_lock_info()
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}
