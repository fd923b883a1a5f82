//! Local file-based state storage backend.
//!
//! The whole applied state lives in one JSON document. Every entry write
//! rewrites the document through a temporary file and an atomic rename, so a
//! crash leaves either the previous or the new document on disk.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{ConvergeError, Result, StateError};

use super::lock::{KeyLocks, LOCK_EXPIRY_SECS, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{AppliedResource, AppliedState, HistoryEntry};

/// Default state directory name.
const STATE_DIR: &str = ".converge";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
    project: String,
    environment: String,
    /// Last committed document, loaded lazily.
    cache: Mutex<Option<AppliedState>>,
    keys: KeyLocks,
}

impl LocalStateStore {
    /// Creates a new local state store under `./.converge`.
    ///
    /// # Errors
    ///
    /// Returns an error if the current directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| ConvergeError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        Self::from_paths(base_dir, state_path)
    }

    /// Creates a new local state store from a custom state file path.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_paths(base_dir, state_path)
    }

    /// Sets the project recorded in a freshly created state document.
    #[must_use]
    pub fn with_project(mut self, project: &str, environment: &str) -> Self {
        self.project = project.to_string();
        self.environment = environment.to_string();
        self
    }

    /// Returns the state file path.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    fn from_paths(base_dir: PathBuf, state_path: PathBuf) -> Self {
        let lock_path = base_dir.join(LOCK_FILE);
        Self {
            base_dir,
            state_path,
            lock_path,
            project: String::new(),
            environment: String::new(),
            cache: Mutex::new(None),
            keys: KeyLocks::new(),
        }
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::write(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    async fn read_state_file(&self) -> Result<Option<AppliedState>> {
        if !self.state_path.exists() {
            debug!("State file does not exist: {}", self.state_path.display());
            return Ok(None);
        }

        info!("Loading state from: {}", self.state_path.display());

        let content = fs::read_to_string(&self.state_path).await.map_err(|e| {
            ConvergeError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;

        let state: AppliedState = serde_json::from_str(&content).map_err(|e| {
            ConvergeError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;

        Ok(Some(state))
    }

    async fn write_state_file(&self, state: &AppliedState) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a temporary file first, then rename
        let temp_path = self.state_path.with_extension("tmp");

        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to create temp state file: {e}")))?;

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StateError::write(format!("Failed to write state file: {e}")))?;

        file.sync_all()
            .await
            .map_err(|e| StateError::write(format!("Failed to sync state file: {e}")))?;

        fs::rename(&temp_path, &self.state_path)
            .await
            .map_err(|e| StateError::write(format!("Failed to rename state file: {e}")))?;

        debug!(serial = state.serial, "State saved");
        Ok(())
    }

    /// Applies `change` to a copy of the document, writes it, then commits
    /// it to the cache. A failed write leaves the cache untouched.
    async fn mutate<T, F>(&self, change: F) -> Result<T>
    where
        F: FnOnce(&mut AppliedState) -> std::result::Result<T, StateError> + Send,
        T: Send,
    {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = self.read_state_file().await?;
        }

        let mut next = cache
            .clone()
            .unwrap_or_else(|| AppliedState::new(&self.project, &self.environment));
        let value = change(&mut next)?;
        self.write_state_file(&next).await?;
        *cache = Some(next);
        Ok(value)
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        if !self.lock_path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.lock_path).await.map_err(|e| {
            ConvergeError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            ConvergeError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    async fn write_lock_file(&self, lock_info: &LockInfo) -> Result<()> {
        self.ensure_dir().await?;

        let content = serde_json::to_string_pretty(lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        fs::write(&self.lock_path, content).await.map_err(|e| {
            ConvergeError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        Ok(())
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self) -> Result<AppliedState> {
        let mut cache = self.cache.lock().await;
        if cache.is_none() {
            *cache = self.read_state_file().await?;
        }
        Ok(cache
            .clone()
            .unwrap_or_else(|| AppliedState::new(&self.project, &self.environment)))
    }

    async fn get(&self, name: &str) -> Result<Option<AppliedResource>> {
        let state = self.load().await?;
        Ok(state.resources.get(name).cloned())
    }

    async fn put(&self, resource: AppliedResource, expected_version: Option<u64>) -> Result<u64> {
        let _guard = self.keys.lock(&resource.name).await;
        let name = resource.name.clone();
        let version = self
            .mutate(move |state| state.upsert(resource, expected_version))
            .await?;
        debug!(resource = %name, version, "State entry written");
        Ok(version)
    }

    async fn remove(&self, name: &str, expected_version: u64) -> Result<()> {
        let _guard = self.keys.lock(name).await;
        self.mutate(|state| state.remove_checked(name, expected_version).map(|_| ()))
            .await?;
        debug!(resource = %name, "State entry removed");
        Ok(())
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        self.mutate(move |state| {
            state.add_history(entry);
            Ok(())
        })
        .await
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state_path.exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(ConvergeError::State(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        self.write_lock_file(&lock_info).await?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                fs::remove_file(&self.lock_path).await.map_err(|e| {
                    ConvergeError::State(StateError::LockFailed {
                        message: format!("Failed to delete lock file: {e}"),
                    })
                })?;
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
    use super::super::types::ApplyOperation;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path()).with_project("orders", "dev");
        (store, temp_dir)
    }

    fn api_record() -> AppliedResource {
        let mut resource = AppliedResource::new("api", "api_gateway_api", "sbx-1");
        resource.attributes.insert(String::from("api_id"), json!("orders-api"));
        resource
    }

    #[tokio::test]
    async fn test_load_empty() {
        let (store, _temp) = create_test_store();

        let state = store.load().await.expect("Load should not fail");
        assert!(state.is_empty());
        assert_eq!(state.project, "orders");
        assert!(!store.exists().await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_put_persists_to_disk() {
        let (store, temp) = create_test_store();

        let version = store.put(api_record(), None).await.expect("put");
        assert_eq!(version, 1);
        assert!(store.exists().await.expect("exists check failed"));

        // A second store over the same directory sees the entry
        let reopened = LocalStateStore::with_base_dir(temp.path());
        let loaded = reopened
            .get("api")
            .await
            .expect("get")
            .expect("entry should exist");
        assert_eq!(loaded.provider_id, "sbx-1");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.attributes.get("api_id"), Some(&json!("orders-api")));
    }

    #[tokio::test]
    async fn test_put_conflict_on_stale_version() {
        let (store, _temp) = create_test_store();

        store.put(api_record(), None).await.expect("put");
        store.put(api_record(), Some(1)).await.expect("second put");

        let err = store.put(api_record(), Some(1)).await.expect_err("stale write");
        assert!(matches!(
            err,
            ConvergeError::State(StateError::Conflict {
                expected: Some(1),
                found: Some(2),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let (store, _temp) = create_test_store();

        store.put(api_record(), None).await.expect("put");
        store.remove("api", 1).await.expect("remove");
        assert!(store.get("api").await.expect("get").is_none());
        assert!(store.remove("api", 1).await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_puts_on_distinct_keys() {
        let (store, _temp) = create_test_store();
        let store = Arc::new(store);

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                let record = AppliedResource::new(&format!("r{i}"), "bucket", &format!("id-{i}"));
                store.put(record, None).await
            }));
        }
        for handle in handles {
            handle.await.expect("join").expect("put");
        }

        let state = store.load().await.expect("load");
        assert_eq!(state.resources.len(), 8);
        assert_eq!(state.serial, 8);
    }

    #[tokio::test]
    async fn test_history_persisted() {
        let (store, _temp) = create_test_store();
        store
            .append_history(HistoryEntry::new(ApplyOperation::Apply, "h", 1, 0, 0))
            .await
            .expect("append");
        assert_eq!(store.load().await.expect("load").history.len(), 1);
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = store
            .acquire_lock("test-holder")
            .await
            .expect("Failed to acquire lock");

        assert!(store.get_lock_info().await.expect("lock info").is_some());

        store
            .release_lock(&lock.lock_id)
            .await
            .expect("Failed to release lock");

        assert!(store.get_lock_info().await.expect("lock info").is_none());
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
            Err(ConvergeError::State(StateError::LockedByOther { .. }))
        ));
    }
}
