//! In-memory state storage backend.
//!
//! Records are kept as serialized JSON so that `load` returns exactly what a
//! file backend would, including byte-stable comparisons in tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::error::{ProvisioError, Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::{ResourceIdentity, StateRecord};

/// Volatile state store, used for previews and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<BTreeMap<ResourceIdentity, String>>,
    lock: RwLock<Option<LockInfo>>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the serialized form of a record, if present.
    pub async fn raw(&self, identity: &ResourceIdentity) -> Option<String> {
        self.records.read().await.get(identity).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self, identity: &ResourceIdentity) -> Result<Option<StateRecord>> {
        let records = self.records.read().await;
        let Some(raw) = records.get(identity) else {
            return Ok(None);
        };

        let record = serde_json::from_str(raw)
            .map_err(|e| StateError::corrupted(format!("Failed to parse record for {identity}: {e}")))?;
        Ok(Some(record))
    }

    async fn save(&self, record: &StateRecord) -> Result<()> {
        let raw = serde_json::to_string_pretty(record)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        self.records
            .write()
            .await
            .insert(record.identity.clone(), raw);
        Ok(())
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        self.records.write().await.remove(identity);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StateRecord>> {
        let records = self.records.read().await;
        records
            .iter()
            .map(|(identity, raw)| {
                serde_json::from_str::<StateRecord>(raw).map_err(|e| {
                    ProvisioError::from(StateError::corrupted(format!(
                        "Failed to parse record for {identity}: {e}"
                    )))
                })
            })
            .collect()
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut lock = self.lock.write().await;
        if let Some(existing) = lock.as_ref() {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
        }

        let info = LockInfo::new(holder);
        *lock = Some(info.clone());
        Ok(info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut lock = self.lock.write().await;
        if lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *lock = None;
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.read().await.clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
