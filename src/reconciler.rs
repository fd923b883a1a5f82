//! Reconciler driving desired state towards applied state.
//!
//! This module ties the pieces together: it builds the graph from the
//! desired-state document, diffs it against the state store, executes the
//! resulting plan under the run lock and records the outcome in history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigHasher, InfraConfig};
use crate::error::Result;
use crate::graph::{GraphBuilder, ResourceGraph};
use crate::planner::{
    ApplyExecutor, ApplyReport, DiffEngine, Plan, PlanSummary, ResourceStatus,
};
use crate::provider::{Provider, ResourceHandle, RetryPolicy};
use crate::schema::SchemaRegistry;
use crate::state::{ApplyOperation, HistoryEntry, StateStore, generate_holder_id};

/// Reconciler for one desired-state document.
pub struct Reconciler {
    /// Desired-state document.
    config: InfraConfig,
    /// Provider that owns the live resources.
    provider: Arc<dyn Provider>,
    /// State store.
    store: Arc<dyn StateStore>,
    /// Attribute schemas.
    schemas: SchemaRegistry,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Overrides the configured worker count.
    parallelism: Option<usize>,
}

/// Result of an apply or destroy run.
#[derive(Debug, Serialize)]
pub struct ReconciliationResult {
    /// What was run.
    pub operation: ApplyOperation,
    /// Hash of the desired-state document.
    pub config_hash: String,
    /// Planned action counts.
    pub summary: PlanSummary,
    /// Per-action outcome.
    pub report: ApplyReport,
}

/// Drift status of one applied resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftStatus {
    /// Live attributes match the applied ones.
    InSync,
    /// Live attributes differ.
    Drifted,
    /// The instance no longer exists.
    Missing,
}

/// Drift of one applied resource.
#[derive(Debug, Clone, Serialize)]
pub struct DriftEntry {
    /// Logical name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Live instance identifier.
    pub provider_id: String,
    /// Drift status.
    pub status: DriftStatus,
    /// Attributes whose live value differs.
    pub changed: Vec<String>,
}

/// Report of drift detection.
#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// When the check ran.
    pub checked_at: DateTime<Utc>,
    /// One entry per applied resource.
    pub entries: Vec<DriftEntry>,
    /// Declared resources that have never been applied.
    pub pending: Vec<String>,
    /// Applied resources no longer declared.
    pub orphaned: Vec<String>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("project", &self.config.qualified_name())
            .field("provider", &self.provider.name())
            .field("store", &self.store.backend_type())
            .field("parallelism", &self.parallelism)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a reconciler.
    #[must_use]
    pub fn new(config: InfraConfig, provider: Arc<dyn Provider>, store: Arc<dyn StateStore>) -> Self {
        let schemas = SchemaRegistry::from_config(&config.schemas);
        Self {
            config,
            provider,
            store,
            schemas,
            hasher: ConfigHasher::new(),
            parallelism: None,
        }
    }

    /// Overrides the configured worker count.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: Option<usize>) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Returns the desired-state document.
    #[must_use]
    pub const fn config(&self) -> &InfraConfig {
        &self.config
    }

    /// Returns the state store.
    #[must_use]
    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Builds the desired resource graph.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown references or dependency cycles.
    pub fn graph(&self) -> Result<ResourceGraph> {
        Ok(GraphBuilder::new().build(&self.config.resources)?)
    }

    /// Computes the plan that converges applied state to the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph is invalid or state cannot be loaded.
    pub async fn plan(&self) -> Result<Plan> {
        let graph = self.graph()?;
        self.plan_for(&graph).await
    }

    /// Computes the plan that deletes every applied resource.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded.
    pub async fn destroy_plan(&self) -> Result<Plan> {
        let graph = GraphBuilder::new().build(&BTreeMap::new())?;
        self.plan_for(&graph).await
    }

    async fn plan_for(&self, graph: &ResourceGraph) -> Result<Plan> {
        let config_hash = self.hasher.hash_config(&self.config);
        let state = self.store.load().await?;
        debug!("Loaded state with {} resources", state.resources.len());

        let diff = DiffEngine::new(self.schemas.clone()).compute(graph, &state)?;
        info!(
            "Diff: {} creates, {} updates, {} replaces, {} deletes, {} unchanged",
            diff.creates, diff.updates, diff.replaces, diff.deletes, diff.unchanged
        );

        Ok(Plan::build(diff, graph, &config_hash)?)
    }

    /// Plans and applies the document.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails or the run lock is held elsewhere.
    /// Individual action failures are reported, not returned.
    pub async fn apply(&self, cancel: &CancellationToken) -> Result<ReconciliationResult> {
        info!("Starting apply for {}", self.config.qualified_name());
        let plan = self.plan().await?;
        self.execute(&plan, ApplyOperation::Apply, cancel).await
    }

    /// Deletes every applied resource.
    ///
    /// # Errors
    ///
    /// Returns an error if planning fails or the run lock is held elsewhere.
    pub async fn destroy(&self, cancel: &CancellationToken) -> Result<ReconciliationResult> {
        info!("Starting destroy for {}", self.config.qualified_name());
        let plan = self.destroy_plan().await?;
        self.execute(&plan, ApplyOperation::Destroy, cancel).await
    }

    /// Executes a previously computed plan under the run lock.
    ///
    /// # Errors
    ///
    /// Returns an error if the run lock cannot be acquired.
    pub async fn execute(
        &self,
        plan: &Plan,
        operation: ApplyOperation,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationResult> {
        let holder = generate_holder_id();
        let lock = self.store.acquire_lock(&holder).await?;
        debug!("Acquired run lock {} as {}", lock.lock_id, holder);

        let executor = ApplyExecutor::new(Arc::clone(&self.provider), Arc::clone(&self.store))
            .with_retry(RetryPolicy::from_config(&self.config.engine.retry))
            .with_parallelism(self.parallelism.or(self.config.engine.parallelism))
            .with_max_parallelism(self.config.engine.max_parallelism);

        let report = executor.execute(plan, cancel).await;

        let entry = HistoryEntry::new(
            operation,
            &plan.config_hash,
            report.count(ResourceStatus::Applied),
            report.count(ResourceStatus::Failed),
            report.count(ResourceStatus::Blocked),
        );
        if let Err(e) = self.store.append_history(entry).await {
            error!("Failed to record history: {}", e);
        }

        if let Err(e) = self.store.release_lock(&lock.lock_id).await {
            warn!("Failed to release run lock {}: {}", lock.lock_id, e);
        }

        if report.is_success() {
            info!("{} completed", operation);
        } else {
            warn!(
                "{} finished with {} failed and {} blocked actions",
                operation,
                report.count(ResourceStatus::Failed),
                report.count(ResourceStatus::Blocked)
            );
        }

        Ok(ReconciliationResult {
            operation,
            config_hash: plan.config_hash.clone(),
            summary: plan.summary(),
            report,
        })
    }

    /// Compares applied state with what the provider reports.
    ///
    /// # Errors
    ///
    /// Returns an error if state cannot be loaded or a read fails.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking for drift in {}", self.config.qualified_name());

        let state = self.store.load().await?;
        let retry = RetryPolicy::from_config(&self.config.engine.retry);
        let mut entries = Vec::with_capacity(state.resources.len());

        for record in state.resources.values() {
            let handle = ResourceHandle::new(&record.name, &record.resource_type, &record.provider_id);
            let observed = retry
                .run(&record.name, "read", || self.provider.read(&handle))
                .await?;

            let (status, changed) = match observed {
                None => (DriftStatus::Missing, Vec::new()),
                Some(live) => {
                    let changed: Vec<String> = record
                        .attributes
                        .keys()
                        .chain(live.attributes.keys())
                        .filter(|k| record.attributes.get(*k) != live.attributes.get(*k))
                        .cloned()
                        .collect::<std::collections::BTreeSet<_>>()
                        .into_iter()
                        .collect();
                    if changed.is_empty() {
                        (DriftStatus::InSync, changed)
                    } else {
                        (DriftStatus::Drifted, changed)
                    }
                }
            };

            if status != DriftStatus::InSync {
                warn!(resource = %record.name, ?status, "Drift detected");
            }
            entries.push(DriftEntry {
                name: record.name.clone(),
                resource_type: record.resource_type.clone(),
                provider_id: record.provider_id.clone(),
                status,
                changed,
            });
        }

        let pending = self
            .config
            .resources
            .keys()
            .filter(|name| !state.resources.contains_key(*name))
            .cloned()
            .collect();
        let orphaned = state
            .resources
            .keys()
            .filter(|name| !self.config.resources.contains_key(*name))
            .cloned()
            .collect();

        Ok(DriftReport {
            checked_at: Utc::now(),
            entries,
            pending,
            orphaned,
        })
    }
}

impl ReconciliationResult {
    /// Returns true if nothing failed or was blocked.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.report.is_success()
    }
}

impl DriftReport {
    /// Returns true if any applied resource has drifted or disappeared.
    #[must_use]
    pub fn has_drift(&self) -> bool {
        self.entries.iter().any(|e| e.status != DriftStatus::InSync)
    }

    /// Returns true if state, document and live resources all agree.
    #[must_use]
    pub fn is_converged(&self) -> bool {
        !self.has_drift() && self.pending.is_empty() && self.orphaned.is_empty()
    }

    /// Returns the entries that are not in sync.
    pub fn drifted(&self) -> impl Iterator<Item = &DriftEntry> {
        self.entries.iter().filter(|e| e.status != DriftStatus::InSync)
    }
}

impl std::fmt::Display for DriftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InSync => "in sync",
            Self::Drifted => "drifted",
            Self::Missing => "missing",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_drift() {
            writeln!(f, "Drift detected:")?;
            for entry in self.drifted() {
                if entry.changed.is_empty() {
                    writeln!(f, "  - {} ({})", entry.name, entry.status)?;
                } else {
                    writeln!(f, "  - {} ({}: {})", entry.name, entry.status, entry.changed.join(", "))?;
                }
            }
        } else {
            writeln!(f, "No drift detected")?;
        }
        if !self.pending.is_empty() {
            writeln!(f, "Not yet applied: {}", self.pending.join(", "))?;
        }
        if !self.orphaned.is_empty() {
            writeln!(f, "No longer declared: {}", self.orphaned.join(", "))?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.is_success() { "successful" } else { "failed" };
        writeln!(f, "{} {status}:", self.operation)?;
        writeln!(f, "  Applied: {}", self.report.count(ResourceStatus::Applied))?;
        writeln!(f, "  Skipped: {}", self.report.count(ResourceStatus::Skipped))?;
        writeln!(f, "  Failed: {}", self.report.count(ResourceStatus::Failed))?;
        writeln!(f, "  Blocked: {}", self.report.count(ResourceStatus::Blocked))?;
        writeln!(f, "  Cancelled: {}", self.report.count(ResourceStatus::Cancelled))?;

        let errors: Vec<_> = self
            .report
            .actions
            .iter()
            .filter_map(|a| a.error.as_ref().map(|e| (&a.name, e)))
            .collect();
        if !errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for (name, error) in errors {
                writeln!(f, "    - {name}: {error}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::{ConvergeError, StateError};
    use crate::provider::SandboxProvider;
    use crate::state::{LocalStateStore, MemoryStateStore};
    use serde_json::json;

    const DOCUMENT: &str = r#"
project:
  name: api-gateway
  environment: test
engine:
  retry:
    max_attempts: 2
    initial_backoff_ms: 1
    max_backoff_ms: 2
schemas:
  api_gateway_api:
    mutable: [display_name]
resources:
  api:
    type: api_gateway_api
    attributes:
      api_id: orders
      display_name: Orders
  config:
    type: api_gateway_api_config
    attributes:
      api: "${api_gateway_api.api.id}"
    lifecycle:
      create_before_destroy: true
  gateway:
    type: api_gateway_gateway
    attributes:
      config: "${api_gateway_api_config.config.id}"
"#;

    fn document() -> InfraConfig {
        ConfigParser::new().parse_yaml(DOCUMENT, None).expect("document")
    }

    fn reconciler(sandbox: &Arc<SandboxProvider>, store: Arc<dyn StateStore>) -> Reconciler {
        Reconciler::new(document(), sandbox.clone(), store)
    }

    #[tokio::test]
    async fn test_apply_then_converged() {
        let sandbox = Arc::new(SandboxProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let r = reconciler(&sandbox, store.clone());

        let result = r.apply(&CancellationToken::new()).await.expect("apply");
        assert!(result.is_success());
        assert_eq!(result.summary.create, 3);

        let plan = r.plan().await.expect("plan");
        assert!(plan.is_empty());
        assert!(r.check_drift().await.expect("drift").is_converged());

        let state = store.load().await.expect("load");
        assert_eq!(state.history.len(), 1);
        assert!(state.history[0].success);
        assert!(store.get_lock_info().await.expect("lock").is_none());
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let sandbox = Arc::new(SandboxProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let r = reconciler(&sandbox, store.clone());
        assert!(r.apply(&CancellationToken::new()).await.expect("apply").is_success());

        let plan = r.destroy_plan().await.expect("destroy plan");
        assert_eq!(plan.order(), vec!["gateway", "config", "api"]);

        let result = r.destroy(&CancellationToken::new()).await.expect("destroy");
        assert!(result.is_success());
        assert!(store.load().await.expect("load").is_empty());
        assert!(sandbox.inventory_snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_drift_detection() {
        let sandbox = Arc::new(SandboxProvider::new());
        let store = Arc::new(MemoryStateStore::new());
        let r = reconciler(&sandbox, store.clone());
        assert!(r.apply(&CancellationToken::new()).await.expect("apply").is_success());

        let state = store.load().await.expect("load");
        assert!(sandbox.tamper(&state.resources["api"].provider_id, "display_name", json!("Edited")));
        assert!(sandbox.forget(&state.resources["gateway"].provider_id));

        let report = r.check_drift().await.expect("drift");
        assert!(report.has_drift());
        let by_name: BTreeMap<_, _> = report.entries.iter().map(|e| (e.name.as_str(), e)).collect();
        assert_eq!(by_name["api"].status, DriftStatus::Drifted);
        assert_eq!(by_name["api"].changed, vec!["display_name"]);
        assert_eq!(by_name["config"].status, DriftStatus::InSync);
        assert_eq!(by_name["gateway"].status, DriftStatus::Missing);
    }

    #[tokio::test]
    async fn test_apply_refused_while_locked() {
        let sandbox = Arc::new(SandboxProvider::new());
        let temp = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(LocalStateStore::with_base_dir(temp.path()));
        let r = reconciler(&sandbox, store.clone());

        let held = store.acquire_lock("someone-else").await.expect("lock");
        let err = r.apply(&CancellationToken::new()).await.expect_err("locked");
        assert!(matches!(err, ConvergeError::State(StateError::LockedByOther { .. })));
        assert!(sandbox.journal().is_empty());

        store.release_lock(&held.lock_id).await.expect("release");
        assert!(r.apply(&CancellationToken::new()).await.expect("apply").is_success());
    }

    #[tokio::test]
    async fn test_failed_apply_recorded_in_history() {
        let sandbox = Arc::new(SandboxProvider::new());
        sandbox.fail_permanently(
            "api",
            crate::error::ProviderError::PermissionDenied {
                resource: String::from("api_gateway_api.api"),
                message: String::from("missing role"),
            },
        );
        let store = Arc::new(MemoryStateStore::new());
        let r = reconciler(&sandbox, store.clone());

        let result = r.apply(&CancellationToken::new()).await.expect("apply");
        assert!(!result.is_success());
        assert_eq!(result.report.count(ResourceStatus::Blocked), 2);

        let state = store.load().await.expect("load");
        assert_eq!(state.history.len(), 1);
        assert!(!state.history[0].success);
        assert_eq!(state.history[0].blocked, 2);
    }
}
