//! Sandbox provider.
//!
//! Keeps its inventory in memory, optionally mirrored to a JSON file, and
//! lets callers inject faults and latency. Every call is journaled with
//! start and finish timestamps so ordering guarantees can be checked after
//! a run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ConvergeError, ProviderError, Result, StateError};

use super::{
    ObservedResource, Provider, ProviderOutput, ProviderResult, ResourceHandle, ResourceRequest,
};

/// One instance held by the sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxRecord {
    /// Logical name it was created under.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Current attributes.
    pub attributes: BTreeMap<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Provider operations recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderOperation {
    /// Create.
    Create,
    /// Update.
    Update,
    /// Delete.
    Delete,
    /// Read.
    Read,
}

/// A journaled provider call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    /// Operation.
    pub operation: ProviderOperation,
    /// Logical name.
    pub name: String,
    /// Instance identifier, once known.
    pub provider_id: Option<String>,
    /// When the call started.
    pub started_at: DateTime<Utc>,
    /// When the call returned.
    pub finished_at: DateTime<Utc>,
    /// Whether it succeeded.
    pub success: bool,
}

#[derive(Debug, Clone)]
enum Fault {
    Permanent(ProviderError),
    Transient { remaining: u32, error: ProviderError },
}

#[derive(Debug, Default)]
struct Faults {
    by_name: HashMap<String, Fault>,
    unhealthy: HashSet<String>,
}

/// In-memory provider with fault injection.
#[derive(Debug, Default)]
pub struct SandboxProvider {
    inventory: Mutex<BTreeMap<String, SandboxRecord>>,
    path: Option<PathBuf>,
    writer: tokio::sync::Mutex<()>,
    faults: Mutex<Faults>,
    latency: Duration,
    journal: Mutex<Vec<JournalEntry>>,
}

impl SandboxProvider {
    /// Creates an empty in-memory sandbox.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a sandbox mirrored to `path`, loading it if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let inventory = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content).map_err(|e| {
                ConvergeError::State(StateError::Corrupted {
                    message: format!("Failed to parse sandbox inventory {}: {e}", path.display()),
                })
            })?
        } else {
            BTreeMap::new()
        };

        info!("Opened sandbox inventory at {}", path.display());
        Ok(Self {
            inventory: Mutex::new(inventory),
            path: Some(path),
            ..Self::default()
        })
    }

    /// Adds artificial latency to every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Makes every mutating call for `name` fail with `error`.
    pub fn fail_permanently(&self, name: &str, error: ProviderError) {
        self.faults().by_name.insert(name.to_string(), Fault::Permanent(error));
    }

    /// Makes the next `times` mutating calls for `name` fail with a network error.
    pub fn fail_transiently(&self, name: &str, times: u32) {
        self.faults().by_name.insert(
            name.to_string(),
            Fault::Transient {
                remaining: times,
                error: ProviderError::network("connection reset by sandbox"),
            },
        );
    }

    /// Makes the next `times` mutating calls for `name` hit a rate limit.
    pub fn rate_limit(&self, name: &str, times: u32, retry_after_secs: u64) {
        self.faults().by_name.insert(
            name.to_string(),
            Fault::Transient {
                remaining: times,
                error: ProviderError::RateLimited { retry_after_secs },
            },
        );
    }

    /// Makes instances created for `name` invisible to `read`.
    pub fn mark_unhealthy(&self, name: &str) {
        self.faults().unhealthy.insert(name.to_string());
    }

    /// Changes an attribute behind the engine's back.
    pub fn tamper(&self, provider_id: &str, attribute: &str, value: Value) -> bool {
        let mut inventory = self.inventory();
        inventory.get_mut(provider_id).is_some_and(|record| {
            record.attributes.insert(attribute.to_string(), value);
            true
        })
    }

    /// Removes an instance behind the engine's back.
    pub fn forget(&self, provider_id: &str) -> bool {
        self.inventory().remove(provider_id).is_some()
    }

    /// Returns a copy of the inventory, keyed by provider identifier.
    #[must_use]
    pub fn inventory_snapshot(&self) -> BTreeMap<String, SandboxRecord> {
        self.inventory().clone()
    }

    /// Returns the identifiers of live instances managed under `name`.
    #[must_use]
    pub fn instances_of(&self, name: &str) -> Vec<String> {
        self.inventory()
            .iter()
            .filter(|(_, record)| record.name == name)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Returns a copy of the call journal.
    #[must_use]
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Counts journaled calls of one operation for one name.
    #[must_use]
    pub fn call_count(&self, name: &str, operation: ProviderOperation) -> usize {
        self.journal()
            .iter()
            .filter(|e| e.name == name && e.operation == operation)
            .count()
    }

    fn inventory(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, SandboxRecord>> {
        self.inventory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn injected_fault(&self, name: &str) -> ProviderResult<()> {
        let mut faults = self.faults();
        match faults.by_name.get_mut(name) {
            Some(Fault::Permanent(error)) => Err(error.clone()),
            Some(Fault::Transient { remaining, error }) if *remaining > 0 => {
                *remaining -= 1;
                Err(error.clone())
            }
            _ => Ok(()),
        }
    }

    fn record(
        &self,
        operation: ProviderOperation,
        name: &str,
        provider_id: Option<&str>,
        started_at: DateTime<Utc>,
        success: bool,
    ) {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(JournalEntry {
                operation,
                name: name.to_string(),
                provider_id: provider_id.map(ToString::to_string),
                started_at,
                finished_at: Utc::now(),
                success,
            });
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    /// Applies `change` to a copy of the inventory and publishes the copy
    /// once it is on disk. Mutations are serialized.
    async fn commit<T, F>(&self, change: F) -> ProviderResult<T>
    where
        F: FnOnce(&mut BTreeMap<String, SandboxRecord>) -> ProviderResult<T> + Send,
    {
        let _writer = self.writer.lock().await;
        let mut next = self.inventory().clone();
        let value = change(&mut next)?;
        self.persist(&next).await?;
        *self.inventory() = next;
        Ok(value)
    }

    async fn persist(&self, inventory: &BTreeMap<String, SandboxRecord>) -> ProviderResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(inventory)
            .map_err(|e| ProviderError::network(format!("sandbox serialization failed: {e}")))?;
        write_atomic(path, &content)
            .await
            .map_err(|e| ProviderError::network(format!("sandbox write failed: {e}")))
    }

    fn outputs_for(provider_id: &str, attributes: &BTreeMap<String, Value>) -> ProviderOutput {
        let mut outputs = attributes.clone();
        outputs.insert(String::from("id"), Value::String(provider_id.to_string()));
        ProviderOutput {
            provider_id: provider_id.to_string(),
            outputs,
        }
    }
}

async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let temp = path.with_extension("tmp");
    tokio::fs::write(&temp, content).await?;
    tokio::fs::rename(&temp, path).await
}

#[async_trait]
impl Provider for SandboxProvider {
    fn name(&self) -> &'static str {
        "sandbox"
    }

    async fn create(&self, request: &ResourceRequest) -> ProviderResult<ProviderOutput> {
        let started_at = Utc::now();
        self.simulate_latency().await;

        if let Err(e) = self.injected_fault(&request.name) {
            self.record(ProviderOperation::Create, &request.name, None, started_at, false);
            return Err(e);
        }

        let provider_id = format!("sbx-{}", Uuid::new_v4());
        let now = Utc::now();
        let record = SandboxRecord {
            name: request.name.clone(),
            resource_type: request.resource_type.clone(),
            attributes: request.attributes.clone(),
            created_at: now,
            updated_at: now,
        };
        let outcome = self
            .commit(|inventory| {
                inventory.insert(provider_id.clone(), record);
                Ok(())
            })
            .await;
        if let Err(e) = outcome {
            self.record(ProviderOperation::Create, &request.name, None, started_at, false);
            return Err(e);
        }

        debug!(resource = %request.name, %provider_id, "Sandbox created instance");
        self.record(ProviderOperation::Create, &request.name, Some(&provider_id), started_at, true);
        Ok(Self::outputs_for(&provider_id, &request.attributes))
    }

    async fn update(
        &self,
        handle: &ResourceHandle,
        request: &ResourceRequest,
    ) -> ProviderResult<ProviderOutput> {
        let started_at = Utc::now();
        self.simulate_latency().await;

        let outcome = match self.injected_fault(&request.name) {
            Ok(()) => {
                self.commit(|inventory| {
                    let record = inventory
                        .get_mut(&handle.provider_id)
                        .ok_or_else(|| ProviderError::NotFound {
                            provider_id: handle.provider_id.clone(),
                        })?;
                    record.attributes.clone_from(&request.attributes);
                    record.updated_at = Utc::now();
                    Ok(())
                })
                .await
            }
            Err(e) => Err(e),
        };

        if let Err(e) = outcome {
            self.record(ProviderOperation::Update, &handle.name, Some(&handle.provider_id), started_at, false);
            return Err(e);
        }

        debug!(resource = %handle.name, provider_id = %handle.provider_id, "Sandbox updated instance");
        self.record(ProviderOperation::Update, &handle.name, Some(&handle.provider_id), started_at, true);
        Ok(Self::outputs_for(&handle.provider_id, &request.attributes))
    }

    async fn delete(&self, handle: &ResourceHandle) -> ProviderResult<()> {
        let started_at = Utc::now();
        self.simulate_latency().await;

        let outcome = match self.injected_fault(&handle.name) {
            Ok(()) => {
                self.commit(|inventory| {
                    inventory
                        .remove(&handle.provider_id)
                        .map(|_| ())
                        .ok_or_else(|| ProviderError::NotFound {
                            provider_id: handle.provider_id.clone(),
                        })
                })
                .await
            }
            Err(e) => Err(e),
        };

        let success = outcome.is_ok();
        if success {
            debug!(resource = %handle.name, provider_id = %handle.provider_id, "Sandbox deleted instance");
        }
        self.record(ProviderOperation::Delete, &handle.name, Some(&handle.provider_id), started_at, success);
        outcome
    }

    async fn read(&self, handle: &ResourceHandle) -> ProviderResult<Option<ObservedResource>> {
        let started_at = Utc::now();
        self.simulate_latency().await;

        let unhealthy = self.faults().unhealthy.contains(&handle.name);
        let observed = if unhealthy {
            None
        } else {
            self.inventory().get(&handle.provider_id).map(|record| ObservedResource {
                provider_id: handle.provider_id.clone(),
                resource_type: record.resource_type.clone(),
                attributes: record.attributes.clone(),
            })
        };

        self.record(ProviderOperation::Read, &handle.name, Some(&handle.provider_id), started_at, true);
        Ok(observed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn request(name: &str) -> ResourceRequest {
        let mut attributes = BTreeMap::new();
        attributes.insert(String::from("api_id"), json!("orders"));
        ResourceRequest {
            name: name.to_string(),
            resource_type: String::from("api_gateway_api"),
            attributes,
        }
    }

    #[tokio::test]
    async fn test_create_read_update_delete() {
        let sandbox = SandboxProvider::new();
        let output = sandbox.create(&request("api")).await.expect("create");
        assert_eq!(output.outputs.get("id"), Some(&json!(output.provider_id)));
        assert_eq!(output.outputs.get("api_id"), Some(&json!("orders")));

        let handle = ResourceHandle::new("api", "api_gateway_api", &output.provider_id);
        let observed = sandbox.read(&handle).await.expect("read").expect("exists");
        assert_eq!(observed.attributes.get("api_id"), Some(&json!("orders")));

        let mut changed = request("api");
        changed.attributes.insert(String::from("labels"), json!({"team": "core"}));
        sandbox.update(&handle, &changed).await.expect("update");

        sandbox.delete(&handle).await.expect("delete");
        assert!(sandbox.read(&handle).await.expect("read").is_none());
        assert!(matches!(
            sandbox.delete(&handle).await,
            Err(ProviderError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_transient_fault_clears() {
        let sandbox = SandboxProvider::new();
        sandbox.fail_transiently("api", 2);

        assert!(sandbox.create(&request("api")).await.is_err());
        assert!(sandbox.create(&request("api")).await.is_err());
        assert!(sandbox.create(&request("api")).await.is_ok());
        assert_eq!(sandbox.call_count("api", ProviderOperation::Create), 3);
    }

    #[tokio::test]
    async fn test_permanent_fault_sticks() {
        let sandbox = SandboxProvider::new();
        sandbox.fail_permanently(
            "api",
            ProviderError::PermissionDenied {
                resource: String::from("api"),
                message: String::from("missing role"),
            },
        );
        for _ in 0..3 {
            assert!(sandbox.create(&request("api")).await.is_err());
        }
        assert!(sandbox.instances_of("api").is_empty());
    }

    #[tokio::test]
    async fn test_inventory_persisted_to_file() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("sandbox.json");

        let sandbox = SandboxProvider::open(&path).expect("open");
        let output = sandbox.create(&request("api")).await.expect("create");

        let reopened = SandboxProvider::open(&path).expect("reopen");
        assert!(reopened.inventory_snapshot().contains_key(&output.provider_id));
    }

    #[tokio::test]
    async fn test_concurrent_creates_all_persisted() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("sandbox.json");
        let sandbox = std::sync::Arc::new(SandboxProvider::open(&path).expect("open"));

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..64 {
            let sandbox = std::sync::Arc::clone(&sandbox);
            tasks.spawn(async move { sandbox.create(&request(&format!("api-{i}"))).await });
        }
        while let Some(joined) = tasks.join_next().await {
            joined.expect("task").expect("create");
        }

        assert_eq!(sandbox.inventory_snapshot().len(), 64);
        let reopened = SandboxProvider::open(&path).expect("reopen");
        assert_eq!(reopened.inventory_snapshot(), sandbox.inventory_snapshot());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_inventory_unchanged() {
        let temp = TempDir::new().expect("temp dir");
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "").expect("blocker file");

        let sandbox = SandboxProvider::open(blocker.join("sandbox.json")).expect("open");
        let err = sandbox.create(&request("api")).await.expect_err("write must fail");
        assert!(err.is_transient());
        assert!(sandbox.inventory_snapshot().is_empty());
        assert_eq!(sandbox.journal().last().map(|e| e.success), Some(false));
    }

    #[tokio::test]
    async fn test_tamper_visible_to_read() {
        let sandbox = SandboxProvider::new();
        let output = sandbox.create(&request("api")).await.expect("create");
        assert!(sandbox.tamper(&output.provider_id, "api_id", json!("other")));

        let handle = ResourceHandle::new("api", "api_gateway_api", &output.provider_id);
        let observed = sandbox.read(&handle).await.expect("read").expect("exists");
        assert_eq!(observed.attributes.get("api_id"), Some(&json!("other")));
    }
}
