//! Applied-state types.
//!
//! These types record what the engine last applied successfully: resolved
//! attributes, provider identifiers and outputs, keyed by logical name.
//! Every entry carries a version used for optimistic concurrency.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::StateError;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The complete applied state of a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Incremented on every write.
    pub serial: u64,
    /// Applied resources by logical name.
    pub resources: BTreeMap<String, AppliedResource>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Apply history (recent entries).
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Last applied record of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppliedResource {
    /// Logical name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Resolved attributes as sent to the provider.
    pub attributes: BTreeMap<String, serde_json::Value>,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: BTreeMap<String, serde_json::Value>,
    /// Logical names this resource depended on when applied.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Lifecycle flag at apply time.
    #[serde(default)]
    pub create_before_destroy: bool,
    /// Hash of the resolved attributes.
    pub attributes_hash: String,
    /// Entry version, starting at 1.
    #[serde(default)]
    pub version: u64,
    /// Old instance left over from a create-before-destroy replacement.
    #[serde(default)]
    pub deposed: Option<DeposedInstance>,
    /// When the resource was first created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last changed.
    pub updated_at: DateTime<Utc>,
}

/// An old instance awaiting deletion after its replacement was created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeposedInstance {
    /// Provider identifier of the old instance.
    pub provider_id: String,
    /// Resource type of the old instance.
    pub resource_type: String,
    /// When the instance was deposed.
    pub deposed_at: DateTime<Utc>,
}

/// A single entry in the apply history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Type of run.
    pub operation: ApplyOperation,
    /// Hash of the desired-state document.
    pub config_hash: String,
    /// Resources applied.
    pub applied: usize,
    /// Resources failed.
    pub failed: usize,
    /// Resources blocked by a failed dependency.
    pub blocked: usize,
    /// Whether every action succeeded.
    pub success: bool,
    /// Optional error summary.
    #[serde(default)]
    pub error: Option<String>,
}

/// Types of runs recorded in history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOperation {
    /// Converge to the desired state.
    Apply,
    /// Delete everything.
    Destroy,
}

impl AppliedState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            serial: 0,
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&AppliedResource> {
        self.resources.get(name)
    }

    /// Returns true if no resource is recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns all resource names.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Inserts or replaces an entry if `expected_version` matches.
    ///
    /// `None` means the entry must not exist yet. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Conflict`] on a version mismatch.
    pub fn upsert(
        &mut self,
        mut resource: AppliedResource,
        expected_version: Option<u64>,
    ) -> Result<u64, StateError> {
        let found = self.resources.get(&resource.name).map(|r| r.version);
        if found != expected_version {
            return Err(StateError::Conflict {
                key: resource.name,
                expected: expected_version,
                found,
            });
        }

        let version = found.map_or(1, |v| v + 1);
        resource.version = version;
        self.resources.insert(resource.name.clone(), resource);
        self.touch();
        Ok(version)
    }

    /// Removes an entry if its version matches.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Conflict`] if the entry is missing or its version
    /// differs.
    pub fn remove_checked(
        &mut self,
        name: &str,
        expected_version: u64,
    ) -> Result<AppliedResource, StateError> {
        let found = self.resources.get(name).map(|r| r.version);
        if found != Some(expected_version) {
            return Err(StateError::Conflict {
                key: name.to_string(),
                expected: Some(expected_version),
                found,
            });
        }

        let removed = self.resources.remove(name).ok_or_else(|| StateError::Conflict {
            key: name.to_string(),
            expected: Some(expected_version),
            found: None,
        })?;
        self.touch();
        Ok(removed)
    }

    /// Adds a history entry, dropping the oldest beyond the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
        self.touch();
    }

    /// Returns resources that still carry a deposed instance.
    #[must_use]
    pub fn deposed_resources(&self) -> Vec<&AppliedResource> {
        self.resources
            .values()
            .filter(|r| r.deposed.is_some())
            .collect()
    }

    fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }
}

impl AppliedResource {
    /// Creates a new record for a freshly created resource.
    #[must_use]
    pub fn new(name: &str, resource_type: &str, provider_id: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            provider_id: provider_id.to_string(),
            attributes: BTreeMap::new(),
            outputs: BTreeMap::new(),
            dependencies: BTreeSet::new(),
            create_before_destroy: false,
            attributes_hash: String::new(),
            version: 0,
            deposed: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Reads an output attribute.
    ///
    /// Outputs take precedence over input attributes; `id` falls back to the
    /// provider identifier.
    #[must_use]
    pub fn output(&self, attribute: &str) -> Option<serde_json::Value> {
        self.outputs
            .get(attribute)
            .or_else(|| self.attributes.get(attribute))
            .cloned()
            .or_else(|| (attribute == "id").then(|| serde_json::Value::String(self.provider_id.clone())))
    }

    /// Marks the record as updated now.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(
        operation: ApplyOperation,
        config_hash: &str,
        applied: usize,
        failed: usize,
        blocked: usize,
    ) -> Self {
        let success = failed == 0 && blocked == 0;
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            applied,
            failed,
            blocked,
            success,
            error: (!success).then(|| format!("{failed} failed, {blocked} blocked")),
        }
    }
}

impl std::fmt::Display for ApplyOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Destroy => "destroy",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_upsert_versions() {
        let mut state = AppliedState::new("orders", "dev");
        let v1 = state
            .upsert(AppliedResource::new("api", "api_gateway_api", "id-1"), None)
            .expect("first insert");
        assert_eq!(v1, 1);

        let v2 = state
            .upsert(AppliedResource::new("api", "api_gateway_api", "id-1"), Some(1))
            .expect("update with matching version");
        assert_eq!(v2, 2);
        assert_eq!(state.get("api").map(|r| r.version), Some(2));
        assert_eq!(state.serial, 2);
    }

    #[test]
    fn test_upsert_conflict() {
        let mut state = AppliedState::new("orders", "dev");
        state
            .upsert(AppliedResource::new("api", "api_gateway_api", "id-1"), None)
            .expect("first insert");

        let err = state
            .upsert(AppliedResource::new("api", "api_gateway_api", "id-2"), None)
            .expect_err("entry already exists");
        assert!(matches!(
            err,
            StateError::Conflict { expected: None, found: Some(1), .. }
        ));
        assert_eq!(state.get("api").map(|r| r.provider_id.as_str()), Some("id-1"));
    }

    #[test]
    fn test_remove_checked() {
        let mut state = AppliedState::new("orders", "dev");
        state
            .upsert(AppliedResource::new("api", "api_gateway_api", "id-1"), None)
            .expect("insert");
        assert!(state.remove_checked("api", 7).is_err());
        assert!(state.remove_checked("api", 1).is_ok());
        assert!(state.is_empty());
        assert!(state.remove_checked("api", 1).is_err());
    }

    #[test]
    fn test_output_lookup_order() {
        let mut resource = AppliedResource::new("api", "api_gateway_api", "prov-9");
        resource.attributes.insert(String::from("region"), json!("eu"));
        resource.outputs.insert(String::from("region"), json!("europe-west1"));
        assert_eq!(resource.output("region"), Some(json!("europe-west1")));
        assert_eq!(resource.output("id"), Some(json!("prov-9")));
        assert_eq!(resource.output("missing"), None);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = AppliedState::new("orders", "dev");
        for _ in 0..(MAX_HISTORY + 5) {
            state.add_history(HistoryEntry::new(ApplyOperation::Apply, "hash", 1, 0, 0));
        }
        assert_eq!(state.history.len(), MAX_HISTORY);
    }

    #[test]
    fn test_history_entry_failure_summary() {
        let entry = HistoryEntry::new(ApplyOperation::Apply, "hash", 2, 1, 3);
        assert!(!entry.success);
        assert_eq!(entry.error.as_deref(), Some("1 failed, 3 blocked"));
    }
}
