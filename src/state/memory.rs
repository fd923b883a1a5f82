//! In-memory state storage backend.
//!
//! Used for dry runs and tests. Nothing survives the process.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{ConvergeError, Result, StateError};

use super::lock::{KeyLocks, LockInfo, generate_holder_id};
use super::store::StateStore;
use super::types::{AppliedResource, AppliedState, HistoryEntry};

/// In-memory state store.
#[derive(Debug)]
pub struct MemoryStateStore {
    state: Mutex<AppliedState>,
    lock: Mutex<Option<LockInfo>>,
    keys: KeyLocks,
    fail_writes: AtomicBool,
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(AppliedState::new("", ""))
    }

    /// Creates a store seeded with an existing document.
    #[must_use]
    pub fn with_state(state: AppliedState) -> Self {
        Self {
            state: Mutex::new(state),
            lock: Mutex::new(None),
            keys: KeyLocks::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent write fail with a write error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> std::result::Result<(), StateError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StateError::write("state backend unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<AppliedState> {
        Ok(self.state.lock().await.clone())
    }

    async fn get(&self, name: &str) -> Result<Option<AppliedResource>> {
        Ok(self.state.lock().await.resources.get(name).cloned())
    }

    async fn put(&self, resource: AppliedResource, expected_version: Option<u64>) -> Result<u64> {
        let _guard = self.keys.lock(&resource.name).await;
        self.check_writable()?;
        let name = resource.name.clone();
        let version = self.state.lock().await.upsert(resource, expected_version)?;
        debug!(resource = %name, version, "State entry written");
        Ok(version)
    }

    async fn remove(&self, name: &str, expected_version: u64) -> Result<()> {
        let _guard = self.keys.lock(name).await;
        self.check_writable()?;
        self.state.lock().await.remove_checked(name, expected_version)?;
        Ok(())
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        self.check_writable()?;
        self.state.lock().await.add_history(entry);
        Ok(())
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.state.lock().await.serial > 0)
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        let mut lock = self.lock.lock().await;
        if let Some(existing) = lock.as_ref().filter(|l| !l.is_expired()) {
            return Err(ConvergeError::State(StateError::LockedByOther {
                holder: existing.holder.clone(),
                since: existing.acquired_at.to_rfc3339(),
            }));
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };
        let info = LockInfo::new(&holder_id);
        *lock = Some(info.clone());
        Ok(info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        let mut lock = self.lock.lock().await;
        if lock.as_ref().is_some_and(|l| l.lock_id == lock_id) {
            *lock = None;
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().await.clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}
