//! Error types for the Converge reconciliation engine.
//!
//! Errors are split by the stage that raises them: configuration loading,
//! graph construction, state storage, provider calls, planning, and the
//! apply/reconcile run itself. Structural errors (cycles, unknown
//! references) abort a run before any side effect; provider and conflict
//! errors are scoped to a single resource.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Converge engine.
#[derive(Debug, Error)]
pub enum ConvergeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resource graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Provider errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Reconciliation errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An environment override holds an unusable value.
    #[error("Invalid value for environment variable {name}: {value}")]
    InvalidEnvVar {
        /// Name of the variable.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// Errors raised while building or ordering the resource graph.
///
/// Both variants are structural: they are detected before any provider call.
#[derive(Debug, Error)]
pub enum GraphError {
    /// The dependency graph contains a cycle.
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    Cycle {
        /// Resources on the cycle, in traversal order. The first resource is
        /// repeated at the end when the path is known.
        cycle: Vec<String>,
    },

    /// A reference or explicit dependency names a resource that is not declared.
    #[error("Resource '{from}' references unknown resource '{reference}'")]
    UnknownReference {
        /// Resource holding the reference.
        from: String,
        /// The reference as written.
        reference: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Writing the state failed.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State format version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state format version.
        expected: String,
        /// Found state format version.
        found: String,
    },

    /// A concurrent modification was detected on a state entry.
    #[error("Conflicting update to state entry '{key}': expected version {expected:?}, found {found:?}")]
    Conflict {
        /// Logical resource name.
        key: String,
        /// Version the writer based its update on.
        expected: Option<u64>,
        /// Version currently stored.
        found: Option<u64>,
    },
}

/// Errors returned by a provider operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// The provider throttled the request.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network failure talking to the provider.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// The provider rejected the attributes.
    #[error("Validation failed for {resource}: {message}")]
    Validation {
        /// Resource address.
        resource: String,
        /// Provider message.
        message: String,
    },

    /// The caller is not allowed to perform the operation.
    #[error("Permission denied for {resource}: {message}")]
    PermissionDenied {
        /// Resource address.
        resource: String,
        /// Provider message.
        message: String,
    },

    /// The remote object does not exist.
    #[error("Remote object not found: {provider_id}")]
    NotFound {
        /// Provider-assigned identifier.
        provider_id: String,
    },

    /// The provider does not manage this resource type.
    #[error("Unsupported resource type: {resource_type}")]
    UnsupportedType {
        /// The resource type.
        resource_type: String,
    },
}

/// Classification of a provider error for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderErrorKind {
    /// Worth retrying after a delay.
    Transient,
    /// Will fail again; surface immediately.
    Permanent,
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// Plan actions could not be ordered.
    #[error("Failed to order plan actions: {message}")]
    OrderingFailed {
        /// Description of the ordering issue.
        message: String,
    },

    /// A resource type has conflicting schema declarations.
    #[error("Conflicting schema for resource type '{resource_type}'")]
    ConflictingSchema {
        /// The resource type.
        resource_type: String,
    },
}

/// Reconciliation errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A reference could not be resolved against applied state at apply time.
    #[error("Cannot resolve reference '{reference}' for {resource}: {reason}")]
    UnresolvedReference {
        /// Resource holding the reference.
        resource: String,
        /// The reference text.
        reference: String,
        /// Why it did not resolve.
        reason: String,
    },

    /// Maximum retry attempts exceeded.
    #[error("Maximum retry attempts ({attempts}) exceeded for {resource}: {last_error}")]
    MaxRetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
        /// Resource that failed.
        resource: String,
        /// Last error observed.
        last_error: String,
    },

    /// A freshly created replacement did not report healthy.
    #[error("Replacement for {resource} is not healthy: {reason}")]
    ReplacementUnhealthy {
        /// Resource being replaced.
        resource: String,
        /// Reason given.
        reason: String,
    },

    /// Reconciliation was aborted.
    #[error("Reconciliation aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// Result type alias for Converge operations.
pub type Result<T> = std::result::Result<T, ConvergeError>;

impl ConvergeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_transient(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Provider(e) => e.retry_delay_secs(),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }

    /// Returns true for errors that abort a run before any apply begins.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Graph(_) | Self::Config(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Returns the retry classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ProviderErrorKind {
        match self {
            Self::RateLimited { .. } | Self::Network { .. } => ProviderErrorKind::Transient,
            Self::Validation { .. }
            | Self::PermissionDenied { .. }
            | Self::NotFound { .. }
            | Self::UnsupportedType { .. } => ProviderErrorKind::Permanent,
        }
    }

    /// Returns true if the error is transient.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ProviderErrorKind::Transient)
    }

    /// Returns the delay the provider asked for, if any.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::Network { .. } => Some(1),
            _ => None,
        }
    }
}
