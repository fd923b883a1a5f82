//! State store trait definition.
//!
//! This module defines the common interface for applied-state backends.
//! Writes are single-entry upserts guarded by a per-key lock and checked
//! against the entry version the writer last read.

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::{AppliedResource, AppliedState, HistoryEntry};

/// Trait for applied-state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads a snapshot of the whole applied state.
    ///
    /// Returns an empty state if nothing was persisted yet.
    async fn load(&self) -> Result<AppliedState>;

    /// Reads one entry.
    async fn get(&self, name: &str) -> Result<Option<AppliedResource>>;

    /// Inserts or replaces one entry.
    ///
    /// `expected_version` is the version the caller based its change on;
    /// `None` means the entry must not exist. Returns the new version.
    async fn put(&self, resource: AppliedResource, expected_version: Option<u64>) -> Result<u64>;

    /// Removes one entry if its version matches.
    async fn remove(&self, name: &str, expected_version: u64) -> Result<()>;

    /// Appends an entry to the apply history.
    async fn append_history(&self, entry: HistoryEntry) -> Result<()>;

    /// Checks if state has been persisted.
    async fn exists(&self) -> Result<bool>;

    /// Acquires the run lock.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases the run lock.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn load(&self) -> Result<AppliedState> {
        (**self).load().await
    }

    async fn get(&self, name: &str) -> Result<Option<AppliedResource>> {
        (**self).get(name).await
    }

    async fn put(&self, resource: AppliedResource, expected_version: Option<u64>) -> Result<u64> {
        (**self).put(resource, expected_version).await
    }

    async fn remove(&self, name: &str, expected_version: u64) -> Result<()> {
        (**self).remove(name, expected_version).await
    }

    async fn append_history(&self, entry: HistoryEntry) -> Result<()> {
        (**self).append_history(entry).await
    }

    async fn exists(&self) -> Result<bool> {
        (**self).exists().await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
