//! Local file-based state storage backend.
//!
//! Each resource identity is stored in its own JSON file under
//! `<base>/resources/`, written through a temporary file and an atomic rename.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ProvisioError, Result, StateError};

use super::lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
use super::store::StateStore;
use super::types::{ResourceIdentity, StateRecord, STATE_VERSION};

/// Default state directory name.
pub const STATE_DIR: &str = ".provisio";

/// Directory holding one file per resource.
const RESOURCES_DIR: &str = "resources";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Directory holding resource records.
    resources_dir: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a new local state store in `.provisio` under the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ProvisioError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let resources_dir = base_dir.join(RESOURCES_DIR);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            resources_dir,
            lock_path,
        }
    }

    /// Returns the base directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Returns the file path holding the record for an identity.
    #[must_use]
    pub fn record_path(&self, identity: &ResourceIdentity) -> PathBuf {
        self.resources_dir
            .join(format!("{}.json", identity.storage_key()))
    }

    /// Ensures the state directories exist.
    async fn ensure_dirs(&self) -> Result<()> {
        if !self.resources_dir.exists() {
            debug!("Creating state directory: {}", self.resources_dir.display());
            fs::create_dir_all(&self.resources_dir).await.map_err(|e| {
                StateError::storage(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Reads and parses a single record file.
    async fn read_record(path: &Path) -> Result<StateRecord> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            StateError::corrupted(format!("Failed to read {}: {e}", path.display()))
        })?;

        let record: StateRecord = serde_json::from_str(&content).map_err(|e| {
            StateError::corrupted(format!("Failed to parse {}: {e}", path.display()))
        })?;

        if record.version != STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION.to_string(),
                found: record.version,
            }
            .into());
        }

        Ok(record)
    }

    /// Writes `content` to `path` via a synced temporary file and a rename.
    async fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            StateError::storage(format!("Failed to create temp state file: {e}"))
        })?;

        file.write_all(content).await.map_err(|e| {
            StateError::storage(format!("Failed to write state file: {e}"))
        })?;

        file.sync_all().await.map_err(|e| {
            StateError::storage(format!("Failed to sync state file: {e}"))
        })?;
        drop(file);

        fs::rename(&temp_path, path).await.map_err(|e| {
            StateError::storage(format!("Failed to rename state file: {e}"))
        })?;

        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            StateError::corrupted(format!("Failed to read lock file: {e}"))
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            StateError::corrupted(format!("Failed to parse lock file: {e}"))
        })?;

        Ok(Some(lock_info))
    }

    /// Creates the lock file, failing with `AlreadyExists` if another holder has it.
    async fn create_lock_file(&self, content: &[u8]) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await?;

        let written = async {
            file.write_all(content).await?;
            file.sync_all().await
        }
        .await;

        if written.is_err() {
            drop(file);
            let _ = fs::remove_file(&self.lock_path).await;
        }
        written
    }

    /// Deletes the lock file.
    async fn delete_lock_file(&self) -> Result<()> {
        match fs::remove_file(&self.lock_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            }
            .into()),
        }
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, identity: &ResourceIdentity) -> Result<Option<StateRecord>> {
        let path = self.record_path(identity);
        if !path.exists() {
            debug!("No state for {identity} at {}", path.display());
            return Ok(None);
        }

        let record = Self::read_record(&path).await?;
        if record.identity != *identity {
            return Err(StateError::corrupted(format!(
                "{} holds state for {}, expected {identity}",
                path.display(),
                record.identity
            ))
            .into());
        }

        Ok(Some(record))
    }

    async fn save(&self, record: &StateRecord) -> Result<()> {
        self.ensure_dirs().await?;

        let path = self.record_path(&record.identity);
        debug!("Saving state for {} to {}", record.identity, path.display());

        let content = serde_json::to_vec_pretty(record).map_err(|e| {
            StateError::serialization(format!("Failed to serialize state: {e}"))
        })?;

        Self::write_atomic(&path, &content).await
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<()> {
        let path = self.record_path(identity);
        if path.exists() {
            info!("Deleting state for {identity}");
            fs::remove_file(&path).await.map_err(|e| {
                StateError::storage(format!("Failed to delete state file: {e}"))
            })?;
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StateRecord>> {
        if !self.resources_dir.exists() {
            return Ok(Vec::new());
        }

        let mut entries = fs::read_dir(&self.resources_dir).await.map_err(|e| {
            StateError::storage(format!("Failed to read state directory: {e}"))
        })?;

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| {
            StateError::storage(format!("Failed to read state directory: {e}"))
        })? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                records.push(Self::read_record(&path).await?);
            }
        }

        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        Ok(records)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        self.ensure_dirs().await?;

        let content = serde_json::to_vec_pretty(&lock_info).map_err(|e| {
            StateError::serialization(format!("Failed to serialize lock: {e}"))
        })?;

        // One retry after clearing an expired or just-released lock.
        for _ in 0..2 {
            match self.create_lock_file(&content).await {
                Ok(()) => {
                    info!(
                        "Acquired state lock: {} (expires in {}s)",
                        lock_info.lock_id, LOCK_EXPIRY_SECS
                    );
                    return Ok(lock_info);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(StateError::LockFailed {
                        message: format!("Failed to create lock file: {e}"),
                    }
                    .into());
                }
            }

            let existing = match self.read_lock_file().await {
                Ok(Some(existing)) => existing,
                Ok(None) => continue,
                Err(_) => {
                    return Err(StateError::LockFailed {
                        message: String::from("lock file is being written by another process"),
                    }
                    .into());
                }
            };

            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }

            debug!("Expired lock {} found, taking over", existing.lock_id);
            self.delete_lock_file().await?;
        }

        Err(StateError::LockFailed {
            message: String::from("lock changed hands while acquiring"),
        }
        .into())
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file().await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PropertyMap;
    use serde_json::json;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path());
        (store, temp_dir)
    }

    fn sample_record(name: &str) -> StateRecord {
        let mut inputs = PropertyMap::new();
        inputs.insert(String::from("accountName"), json!("a1"));
        let mut outputs = inputs.clone();
        outputs.insert(String::from("webContainerName"), json!("$web"));

        StateRecord::new(
            ResourceIdentity::new("azure:storage:StaticWebsite", name),
            format!("{name}-id"),
            inputs,
            outputs,
        )
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, _temp) = create_test_store();
        let record = sample_record("site");

        store.save(&record).await.expect("Failed to save state");

        let loaded = store
            .load(&record.identity)
            .await
            .expect("Failed to load state")
            .expect("State should exist");

        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store
            .load(&ResourceIdentity::new("command:Command", "missing"))
            .await
            .expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_save_replaces_whole_record_and_leaves_no_temp_file() {
        let (store, _temp) = create_test_store();
        let record = sample_record("site");
        store.save(&record).await.expect("first save");

        let mut outputs = PropertyMap::new();
        outputs.insert(String::from("endpoint"), json!("https://a1.web.core.windows.net/"));
        let next = record.updated(record.inputs.clone(), outputs);
        store.save(&next).await.expect("second save");

        let loaded = store.load(&record.identity).await.expect("load").expect("exists");
        assert_eq!(loaded.outputs.len(), 1);
        assert!(loaded.output("webContainerName").is_none());

        let path = store.record_path(&record.identity);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_an_error() {
        let (store, _temp) = create_test_store();
        let record = sample_record("site");
        store.save(&record).await.expect("save");

        std::fs::write(store.record_path(&record.identity), b"{ not json").expect("write");

        let result = store.load(&record.identity).await;
        assert!(matches!(
            result,
            Err(ProvisioError::State(StateError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (store, _temp) = create_test_store();
        store.save(&sample_record("b")).await.expect("save b");
        store.save(&sample_record("a")).await.expect("save a");

        let names: Vec<String> = store
            .list()
            .await
            .expect("list")
            .into_iter()
            .map(|r| r.identity.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);

        let id = ResourceIdentity::new("azure:storage:StaticWebsite", "a");
        store.delete(&id).await.expect("delete");
        store.delete(&id).await.expect("deleting twice is fine");
        assert_eq!(store.list().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.is_locked().await.expect("is_locked failed"));

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2").await;
        assert!(matches!(
            result,
            Err(ProvisioError::State(StateError::LockedByOther { .. }))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_has_one_winner() {
        let temp = TempDir::new().expect("Failed to create temp dir");

        let mut attempts = tokio::task::JoinSet::new();
        for i in 0..8 {
            let store = LocalStateStore::with_base_dir(temp.path());
            attempts.spawn(async move { store.acquire_lock(&format!("holder-{i}")).await });
        }

        let mut winners = 0;
        while let Some(joined) = attempts.join_next().await {
            match joined.expect("task joins") {
                Ok(_) => winners += 1,
                Err(err) => assert!(err.is_retryable(), "unexpected error: {err}"),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();
        let mut stale = LockInfo::new("gone");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        store.ensure_dirs().await.expect("dirs");
        std::fs::write(&store.lock_path, serde_json::to_vec(&stale).expect("json")).expect("write");

        let lock = store.acquire_lock("holder-1").await.expect("takeover");

        let current = store.get_lock_info().await.expect("read").expect("locked");
        assert_eq!(current.lock_id, lock.lock_id);
        assert_ne!(current.lock_id, stale.lock_id);
    }
}
