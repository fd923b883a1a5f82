//! Apply executor.
//!
//! Runs plan actions on a bounded worker pool. An action starts once every
//! action it depends on has finished successfully; a failure blocks its
//! transitive dependents and leaves unrelated actions running. Every
//! confirmed provider operation is persisted immediately as a single-entry
//! state write.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ConfigHasher;
use crate::error::{ConvergeError, ProviderError, ReconcileError, Result, StateError};
use crate::graph::{Reference, ResourceNode, resolve_value};
use crate::provider::{Provider, ProviderOutput, ResourceHandle, ResourceRequest, RetryPolicy};
use crate::state::{AppliedResource, DeposedInstance, StateStore};

use super::diff::ActionType;
use super::plan::{Plan, PlannedAction};

/// Default upper bound on concurrent actions.
pub const DEFAULT_MAX_PARALLELISM: usize = 8;

/// Executes plans against a provider and a state store.
pub struct ApplyExecutor {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
    parallelism: Option<usize>,
    max_parallelism: usize,
}

/// Terminal status of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    /// The change was applied and persisted.
    Applied,
    /// A provider call or state write failed.
    Failed,
    /// A dependency failed, so the action never ran.
    Blocked,
    /// Nothing to do.
    Skipped,
    /// The run was cancelled before the action started.
    Cancelled,
}

/// Milestones recorded while an action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionPhase {
    /// A new instance was created.
    CreateSucceeded,
    /// A replacement was confirmed readable.
    HealthChecked,
    /// Deletion of an instance began.
    DeleteStarted,
    /// An instance was deleted.
    DeleteSucceeded,
    /// A state entry was written.
    StatePersisted,
}

/// A timestamped milestone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionEvent {
    /// Milestone.
    pub phase: ActionPhase,
    /// When it happened.
    pub at: DateTime<Utc>,
    /// Instance involved, if any.
    pub provider_id: Option<String>,
}

/// Outcome of one action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    /// Position in the plan.
    pub index: usize,
    /// Logical name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Planned action.
    pub action_type: ActionType,
    /// Terminal status.
    pub status: ResourceStatus,
    /// Cause, for anything other than applied or skipped.
    pub error: Option<String>,
    /// Identifier of the live instance afterwards.
    pub provider_id: Option<String>,
    /// Whether this was a deposed cleanup action.
    pub cleanup: bool,
    /// When work started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the action reached its terminal status.
    pub finished_at: DateTime<Utc>,
    /// Milestones, in order.
    pub events: Vec<ActionEvent>,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyReport {
    /// One report per plan action, in plan order.
    pub actions: Vec<ActionReport>,
    /// Concurrency bound used.
    pub parallelism: usize,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
}

/// State shared by all worker tasks.
struct Worker {
    provider: Arc<dyn Provider>,
    store: Arc<dyn StateStore>,
    retry: RetryPolicy,
    hasher: ConfigHasher,
}

impl std::fmt::Debug for ApplyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplyExecutor")
            .field("provider", &self.provider.name())
            .field("store", &self.store.backend_type())
            .field("retry", &self.retry)
            .field("parallelism", &self.parallelism)
            .field("max_parallelism", &self.max_parallelism)
            .finish()
    }
}

impl ApplyExecutor {
    /// Creates an executor with default retry and concurrency settings.
    #[must_use]
    pub fn new(provider: Arc<dyn Provider>, store: Arc<dyn StateStore>) -> Self {
        Self {
            provider,
            store,
            retry: RetryPolicy::default(),
            parallelism: None,
            max_parallelism: DEFAULT_MAX_PARALLELISM,
        }
    }

    /// Sets the retry policy for provider calls.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fixes the number of concurrent actions.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: Option<usize>) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Sets the cap used when the bound is derived from the plan.
    #[must_use]
    pub const fn with_max_parallelism(mut self, max_parallelism: usize) -> Self {
        self.max_parallelism = max_parallelism;
        self
    }

    /// Returns the concurrency bound for a plan.
    ///
    /// A fixed setting wins; otherwise one worker per independent subgraph,
    /// capped, and never fewer than one.
    #[must_use]
    pub fn concurrency_for(&self, plan: &Plan) -> usize {
        self.parallelism
            .unwrap_or_else(|| plan.independent_subgraphs().min(self.max_parallelism))
            .max(1)
    }

    /// Executes a plan.
    ///
    /// Never fails as a whole: every action ends with a status in the
    /// returned report. Cancelling `cancel` stops new actions from starting
    /// and waits for running ones.
    pub async fn execute(&self, plan: &Plan, cancel: &CancellationToken) -> ApplyReport {
        let started_at = Utc::now();
        let limit = self.concurrency_for(plan);
        let count = plan.actions.len();
        info!(actions = count, parallelism = limit, "Executing plan");

        let mut reports: Vec<Option<ActionReport>> = vec![None; count];
        let mut waiting: Vec<usize> = plan.actions.iter().map(|a| a.dependencies.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
        for action in &plan.actions {
            for &dep in &action.dependencies {
                if let Some(list) = dependents.get_mut(dep) {
                    list.push(action.index);
                }
            }
        }

        let mut ready: BTreeSet<usize> = (0..count).filter(|&i| waiting[i] == 0).collect();
        let mut running: BTreeSet<usize> = BTreeSet::new();
        let semaphore = Arc::new(Semaphore::new(limit));
        let worker = Arc::new(Worker {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            retry: self.retry.clone(),
            hasher: ConfigHasher::new(),
        });
        let mut join_set: JoinSet<ActionReport> = JoinSet::new();

        loop {
            while let Some(i) = ready.pop_first() {
                let action = &plan.actions[i];

                if cancel.is_cancelled() {
                    reports[i] = Some(ActionReport::finished(
                        action,
                        ResourceStatus::Cancelled,
                        Some(String::from("run cancelled before start")),
                    ));
                    continue;
                }

                if !action.has_work() {
                    debug!(resource = %action.name, "Nothing to do");
                    reports[i] = Some(ActionReport::finished(action, ResourceStatus::Skipped, None));
                    release(i, &dependents, &mut waiting, &reports, &mut ready);
                    continue;
                }

                let action = action.clone();
                let worker = Arc::clone(&worker);
                let semaphore = Arc::clone(&semaphore);
                let cancel = cancel.clone();
                running.insert(i);

                join_set.spawn(async move {
                    let permit = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        permit = semaphore.acquire_owned() => permit.ok(),
                    };
                    let Some(_permit) = permit else {
                        return ActionReport::finished(
                            &action,
                            ResourceStatus::Cancelled,
                            Some(String::from("run cancelled before start")),
                        );
                    };
                    worker.run(&action).await
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };

            let report = match joined {
                Ok(report) => report,
                Err(e) => {
                    error!("Apply task ended abnormally: {e}");
                    continue;
                }
            };

            let i = report.index;
            running.remove(&i);
            match report.status {
                ResourceStatus::Applied | ResourceStatus::Skipped => {
                    reports[i] = Some(report);
                    release(i, &dependents, &mut waiting, &reports, &mut ready);
                }
                ResourceStatus::Failed => {
                    reports[i] = Some(report);
                    block_dependents(plan, i, &dependents, &mut reports);
                }
                ResourceStatus::Blocked | ResourceStatus::Cancelled => {
                    reports[i] = Some(report);
                }
            }
        }

        // Tasks that never reported back count as failed
        for i in running {
            reports[i] = Some(ActionReport::finished(
                &plan.actions[i],
                ResourceStatus::Failed,
                Some(String::from("apply task ended abnormally")),
            ));
            block_dependents(plan, i, &dependents, &mut reports);
        }

        let actions: Vec<ActionReport> = plan
            .actions
            .iter()
            .zip(reports)
            .map(|(action, report)| {
                report.unwrap_or_else(|| {
                    ActionReport::finished(
                        action,
                        ResourceStatus::Cancelled,
                        Some(String::from("run cancelled before start")),
                    )
                })
            })
            .collect();

        let report = ApplyReport {
            actions,
            parallelism: limit,
            started_at,
            finished_at: Utc::now(),
        };
        info!(
            applied = report.count(ResourceStatus::Applied),
            failed = report.count(ResourceStatus::Failed),
            blocked = report.count(ResourceStatus::Blocked),
            skipped = report.count(ResourceStatus::Skipped),
            cancelled = report.count(ResourceStatus::Cancelled),
            "Plan execution finished"
        );
        report
    }
}

/// Marks `finished` as done and queues dependents that became ready.
fn release(
    finished: usize,
    dependents: &[Vec<usize>],
    waiting: &mut [usize],
    reports: &[Option<ActionReport>],
    ready: &mut BTreeSet<usize>,
) {
    for &j in &dependents[finished] {
        waiting[j] = waiting[j].saturating_sub(1);
        if waiting[j] == 0 && reports[j].is_none() {
            ready.insert(j);
        }
    }
}

/// Marks every transitive dependent of `failed` as blocked.
fn block_dependents(
    plan: &Plan,
    failed: usize,
    dependents: &[Vec<usize>],
    reports: &mut [Option<ActionReport>],
) {
    let cause = &plan.actions[failed].name;
    let mut stack = dependents[failed].clone();
    while let Some(i) = stack.pop() {
        if reports[i].is_some() {
            continue;
        }
        warn!(resource = %plan.actions[i].name, dependency = %cause, "Blocked by failed dependency");
        reports[i] = Some(ActionReport::finished(
            &plan.actions[i],
            ResourceStatus::Blocked,
            Some(format!("dependency '{cause}' failed")),
        ));
        stack.extend(dependents[i].iter().copied());
    }
}

impl Worker {
    async fn run(&self, action: &PlannedAction) -> ActionReport {
        let mut report = ActionReport::finished(action, ResourceStatus::Failed, None);
        report.started_at = Some(Utc::now());
        info!(resource = %action.name, action = %action.action_type, "Applying");

        match self.apply(action, &mut report).await {
            Ok(status) => {
                info!(resource = %action.name, status = %status, "Action finished");
                report.status = status;
            }
            Err(e) => {
                error!(resource = %action.name, error = %e, "Action failed");
                report.status = ResourceStatus::Failed;
                report.error = Some(e.to_string());
            }
        }

        report.finished_at = Utc::now();
        report
    }

    async fn apply(&self, action: &PlannedAction, report: &mut ActionReport) -> Result<ResourceStatus> {
        if action.cleanup {
            return self.remove_deposed(action, report).await;
        }

        let mut current = self.current_record(action).await?;

        let cleaned = if let Some(deposed) = &action.deposed {
            current = self.destroy_deposed(action, deposed, current, report).await?;
            true
        } else {
            false
        };

        let status = match action.action_type {
            ActionType::NoOp => ResourceStatus::Skipped,
            ActionType::Create => self.create(action, report).await?,
            ActionType::Update => self.update(action, required(action, current)?, report).await?,
            ActionType::Replace => self.replace(action, required(action, current)?, report).await?,
            ActionType::Delete => self.delete(action, required(action, current)?, report).await?,
        };

        Ok(if cleaned && status == ResourceStatus::Skipped {
            ResourceStatus::Applied
        } else {
            status
        })
    }

    /// Reads the entry and checks it is still the one the plan was made from.
    async fn current_record(&self, action: &PlannedAction) -> Result<Option<AppliedResource>> {
        let current = self.store.get(&action.name).await?;
        let expected = action.prior.as_ref().map(|p| p.version);
        let found = current.as_ref().map(|c| c.version);
        if expected != found {
            return Err(ConvergeError::State(StateError::Conflict {
                key: action.name.clone(),
                expected,
                found,
            }));
        }
        Ok(current)
    }

    /// Deletes the instance a replace left behind, if the entry still marks it.
    async fn remove_deposed(&self, action: &PlannedAction, report: &mut ActionReport) -> Result<ResourceStatus> {
        let current = self.store.get(&action.name).await?;
        let marked = current
            .as_ref()
            .and_then(|r| r.deposed.clone())
            .filter(|d| action.deposed.as_ref().is_some_and(|p| p.provider_id == d.provider_id));
        let Some(deposed) = marked else {
            debug!(resource = %action.name, "No deposed instance left, skipping");
            return Ok(ResourceStatus::Skipped);
        };

        report.provider_id = Some(deposed.provider_id.clone());
        self.destroy_deposed(action, &deposed, current, report).await?;
        Ok(ResourceStatus::Applied)
    }

    async fn destroy_deposed(
        &self,
        action: &PlannedAction,
        deposed: &DeposedInstance,
        current: Option<AppliedResource>,
        report: &mut ActionReport,
    ) -> Result<Option<AppliedResource>> {
        info!(resource = %action.name, provider_id = %deposed.provider_id, "Removing deposed instance");
        let handle = ResourceHandle::new(&action.name, &deposed.resource_type, &deposed.provider_id);
        report.record(ActionPhase::DeleteStarted, Some(deposed.provider_id.as_str()));
        self.delete_instance(&handle).await?;
        report.record(ActionPhase::DeleteSucceeded, Some(deposed.provider_id.as_str()));

        let Some(mut record) = current else {
            return Ok(None);
        };
        if record.deposed.as_ref().is_some_and(|d| d.provider_id == deposed.provider_id) {
            record.deposed = None;
            record.touch();
            record.version = self.store.put(record.clone(), Some(record.version)).await?;
            report.record(ActionPhase::StatePersisted, None);
        }
        Ok(Some(record))
    }

    async fn create(&self, action: &PlannedAction, report: &mut ActionReport) -> Result<ResourceStatus> {
        let node = desired(action)?;
        let attributes = self.resolve(node).await?;
        let output = self.create_instance(node, &attributes, report).await?;

        let record = self.record_for(node, attributes, output);
        report.provider_id = Some(record.provider_id.clone());
        self.persist(record, None, report).await?;
        Ok(ResourceStatus::Applied)
    }

    async fn update(
        &self,
        action: &PlannedAction,
        current: AppliedResource,
        report: &mut ActionReport,
    ) -> Result<ResourceStatus> {
        let node = desired(action)?;
        let attributes = self.resolve(node).await?;
        report.provider_id = Some(current.provider_id.clone());
        if attributes == current.attributes {
            debug!(resource = %action.name, "Resolved attributes unchanged, skipping");
            return Ok(ResourceStatus::Skipped);
        }

        let handle = ResourceHandle::new(&current.name, &current.resource_type, &current.provider_id);
        let request = request_for(node, &attributes);
        let output = self
            .retry
            .run(&action.name, "update", || self.provider.update(&handle, &request))
            .await?;

        let mut record = self.record_for(node, attributes, output);
        record.created_at = current.created_at;
        record.deposed = current.deposed;
        report.provider_id = Some(record.provider_id.clone());
        self.persist(record, Some(current.version), report).await?;
        Ok(ResourceStatus::Applied)
    }

    async fn replace(
        &self,
        action: &PlannedAction,
        current: AppliedResource,
        report: &mut ActionReport,
    ) -> Result<ResourceStatus> {
        let node = desired(action)?;
        let attributes = self.resolve(node).await?;
        report.provider_id = Some(current.provider_id.clone());
        if current.resource_type == node.resource_type() && attributes == current.attributes {
            debug!(resource = %action.name, "Resolved attributes unchanged, skipping");
            return Ok(ResourceStatus::Skipped);
        }

        let old = ResourceHandle::new(&current.name, &current.resource_type, &current.provider_id);

        if action.create_before_destroy {
            let output = self.create_instance(node, &attributes, report).await?;
            let new = ResourceHandle::new(node.name(), node.resource_type(), &output.provider_id);
            self.check_health(&new, report).await?;

            // The entry moves to the new instance; the old one stays recorded
            // as deposed until the cleanup action removes it
            let mut record = self.record_for(node, attributes, output);
            record.deposed = Some(DeposedInstance {
                provider_id: old.provider_id.clone(),
                resource_type: old.resource_type.clone(),
                deposed_at: Utc::now(),
            });
            report.provider_id = Some(record.provider_id.clone());
            self.persist(record, Some(current.version), report).await?;
        } else {
            report.record(ActionPhase::DeleteStarted, Some(old.provider_id.as_str()));
            self.delete_instance(&old).await?;
            report.record(ActionPhase::DeleteSucceeded, Some(old.provider_id.as_str()));
            self.store.remove(&current.name, current.version).await?;
            report.provider_id = None;

            let output = self.create_instance(node, &attributes, report).await?;
            let record = self.record_for(node, attributes, output);
            report.provider_id = Some(record.provider_id.clone());
            self.persist(record, None, report).await?;
        }

        Ok(ResourceStatus::Applied)
    }

    async fn delete(
        &self,
        action: &PlannedAction,
        current: AppliedResource,
        report: &mut ActionReport,
    ) -> Result<ResourceStatus> {
        let handle = ResourceHandle::new(&current.name, &current.resource_type, &current.provider_id);
        report.record(ActionPhase::DeleteStarted, Some(current.provider_id.as_str()));
        self.delete_instance(&handle).await?;
        report.record(ActionPhase::DeleteSucceeded, Some(current.provider_id.as_str()));

        self.store.remove(&action.name, current.version).await?;
        report.record(ActionPhase::StatePersisted, None);
        Ok(ResourceStatus::Applied)
    }

    async fn create_instance(
        &self,
        node: &ResourceNode,
        attributes: &BTreeMap<String, Value>,
        report: &mut ActionReport,
    ) -> Result<ProviderOutput> {
        let request = request_for(node, attributes);
        let output = self
            .retry
            .run(node.name(), "create", || self.provider.create(&request))
            .await?;
        report.record(ActionPhase::CreateSucceeded, Some(output.provider_id.as_str()));
        Ok(output)
    }

    /// Confirms a replacement is readable; removes it if not.
    async fn check_health(&self, handle: &ResourceHandle, report: &mut ActionReport) -> Result<()> {
        let reason = match self
            .retry
            .run(&handle.name, "read", || self.provider.read(handle))
            .await
        {
            Ok(Some(_)) => {
                report.record(ActionPhase::HealthChecked, Some(handle.provider_id.as_str()));
                return Ok(());
            }
            Ok(None) => String::from("instance not readable after create"),
            Err(e) => e.to_string(),
        };

        warn!(resource = %handle.name, provider_id = %handle.provider_id, %reason, "Replacement unhealthy, removing it");
        if let Err(e) = self.delete_instance(handle).await {
            error!(resource = %handle.name, provider_id = %handle.provider_id, error = %e, "Failed to remove unhealthy replacement");
        }
        Err(ConvergeError::Reconcile(ReconcileError::ReplacementUnhealthy {
            resource: handle.name.clone(),
            reason,
        }))
    }

    /// Deletes an instance; one that is already gone counts as deleted.
    async fn delete_instance(&self, handle: &ResourceHandle) -> Result<()> {
        match self
            .retry
            .run(&handle.name, "delete", || self.provider.delete(handle))
            .await
        {
            Err(ConvergeError::Provider(ProviderError::NotFound { .. })) => {
                debug!(resource = %handle.name, provider_id = %handle.provider_id, "Instance already gone");
                Ok(())
            }
            other => other,
        }
    }

    async fn persist(
        &self,
        record: AppliedResource,
        expected_version: Option<u64>,
        report: &mut ActionReport,
    ) -> Result<u64> {
        let name = record.name.clone();
        let provider_id = record.provider_id.clone();
        match self.store.put(record, expected_version).await {
            Ok(version) => {
                report.record(ActionPhase::StatePersisted, None);
                Ok(version)
            }
            Err(e) => {
                error!(resource = %name, %provider_id, error = %e, "Provider change succeeded but state write failed");
                Err(e)
            }
        }
    }

    /// Resolves references against the current state of the dependencies.
    async fn resolve(&self, node: &ResourceNode) -> Result<BTreeMap<String, Value>> {
        let mut dependencies: HashMap<String, AppliedResource> = HashMap::new();
        let names: BTreeSet<&String> = node.all_references().map(|r| &r.name).collect();
        for name in names {
            if let Some(record) = self.store.get(name).await? {
                dependencies.insert(name.clone(), record);
            }
        }

        let mut resolved = BTreeMap::new();
        for (key, value) in node.attributes() {
            let mut missing: Option<(Reference, String)> = None;
            let mut lookup = |reference: &Reference| -> Option<Value> {
                let found = match dependencies.get(&reference.name) {
                    None => Err(String::from("dependency has not been applied")),
                    Some(r) if r.resource_type != reference.resource_type => {
                        Err(format!("dependency is a {}", r.resource_type))
                    }
                    Some(r) => r
                        .output(&reference.attribute)
                        .ok_or_else(|| format!("no output named '{}'", reference.attribute)),
                };
                match found {
                    Ok(value) => Some(value),
                    Err(reason) => {
                        missing.get_or_insert((reference.clone(), reason));
                        None
                    }
                }
            };

            let Some(value) = resolve_value(value, &mut lookup) else {
                let (reference, reason) = missing.unwrap_or_else(|| {
                    (
                        Reference::new("", "", key.as_str()),
                        String::from("unresolved reference"),
                    )
                });
                return Err(ConvergeError::Reconcile(ReconcileError::UnresolvedReference {
                    resource: node.id().to_string(),
                    reference: reference.to_string(),
                    reason,
                }));
            };
            resolved.insert(key.clone(), value);
        }

        Ok(resolved)
    }

    fn record_for(
        &self,
        node: &ResourceNode,
        attributes: BTreeMap<String, Value>,
        output: ProviderOutput,
    ) -> AppliedResource {
        let mut record = AppliedResource::new(node.name(), node.resource_type(), &output.provider_id);
        record.attributes_hash = self.hasher.hash_attributes(&attributes);
        record.attributes = attributes;
        record.outputs = output.outputs;
        record.dependencies = node.dependencies().clone();
        record.create_before_destroy = node.lifecycle().create_before_destroy;
        record
    }
}

fn desired(action: &PlannedAction) -> Result<&ResourceNode> {
    action.node.as_ref().ok_or_else(|| {
        ConvergeError::internal(format!("{} action for '{}' has no desired node", action.action_type, action.name))
    })
}

fn required(action: &PlannedAction, current: Option<AppliedResource>) -> Result<AppliedResource> {
    current.ok_or_else(|| {
        ConvergeError::State(StateError::Conflict {
            key: action.name.clone(),
            expected: action.prior.as_ref().map(|p| p.version),
            found: None,
        })
    })
}

fn request_for(node: &ResourceNode, attributes: &BTreeMap<String, Value>) -> ResourceRequest {
    ResourceRequest {
        name: node.name().to_string(),
        resource_type: node.resource_type().to_string(),
        attributes: attributes.clone(),
    }
}

impl ActionReport {
    fn finished(action: &PlannedAction, status: ResourceStatus, error: Option<String>) -> Self {
        Self {
            index: action.index,
            name: action.name.clone(),
            resource_type: action.resource_type.clone(),
            action_type: action.action_type,
            status,
            error,
            provider_id: action
                .prior
                .as_ref()
                .map(|p| p.provider_id.clone())
                .or_else(|| action.deposed.as_ref().map(|d| d.provider_id.clone())),
            cleanup: action.cleanup,
            started_at: None,
            finished_at: Utc::now(),
            events: Vec::new(),
        }
    }

    fn record(&mut self, phase: ActionPhase, provider_id: Option<&str>) {
        self.events.push(ActionEvent {
            phase,
            at: Utc::now(),
            provider_id: provider_id.map(ToString::to_string),
        });
    }

    /// Returns when a milestone was first reached.
    #[must_use]
    pub fn first(&self, phase: ActionPhase) -> Option<DateTime<Utc>> {
        self.events.iter().find(|e| e.phase == phase).map(|e| e.at)
    }
}

impl ApplyReport {
    /// Counts actions with a status.
    #[must_use]
    pub fn count(&self, status: ResourceStatus) -> usize {
        self.actions.iter().filter(|a| a.status == status).count()
    }

    /// Returns the report for a resource.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ActionReport> {
        self.actions.iter().find(|a| a.name == name && !a.cleanup)
    }

    /// Returns the report of a resource's deposed cleanup.
    #[must_use]
    pub fn cleanup_for(&self, name: &str) -> Option<&ActionReport> {
        self.actions.iter().find(|a| a.name == name && a.cleanup)
    }

    /// Returns the status of a resource.
    #[must_use]
    pub fn status(&self, name: &str) -> Option<ResourceStatus> {
        self.get(name).map(|a| a.status)
    }

    /// Returns true if nothing failed or was blocked.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.count(ResourceStatus::Failed) == 0 && self.count(ResourceStatus::Blocked) == 0
    }

    /// Returns true if the run was cut short.
    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.count(ResourceStatus::Cancelled) > 0
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::Skipped => "skipped (no-op)",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}
