//! Provider capability.
//!
//! A provider performs the side effects of an apply: it creates, updates,
//! deletes and reads resource instances of a given type. The engine knows
//! nothing about what those instances are; it only sees resolved attribute
//! maps going in and identifiers plus outputs coming back.

mod retry;
mod sandbox;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::ProviderError;

pub use retry::RetryPolicy;
pub use sandbox::{JournalEntry, ProviderOperation, SandboxProvider, SandboxRecord};

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A create or update request with fully resolved attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    /// Logical name.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Resolved attributes.
    pub attributes: BTreeMap<String, Value>,
}

/// Identifies an existing provider-side instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    /// Logical name the instance is managed under.
    pub name: String,
    /// Resource type.
    pub resource_type: String,
    /// Provider-assigned identifier.
    pub provider_id: String,
}

/// What a provider reports after a successful create or update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderOutput {
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Output attributes other resources can reference.
    pub outputs: BTreeMap<String, Value>,
}

/// An instance as currently observed by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedResource {
    /// Provider-assigned identifier.
    pub provider_id: String,
    /// Resource type.
    pub resource_type: String,
    /// Attributes as the provider sees them.
    pub attributes: BTreeMap<String, Value>,
}

/// Side-effecting operations on the managed system.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name, for logs and reports.
    fn name(&self) -> &'static str;

    /// Creates a new instance.
    async fn create(&self, request: &ResourceRequest) -> ProviderResult<ProviderOutput>;

    /// Updates an existing instance in place.
    async fn update(
        &self,
        handle: &ResourceHandle,
        request: &ResourceRequest,
    ) -> ProviderResult<ProviderOutput>;

    /// Deletes an instance. Missing instances yield [`ProviderError::NotFound`].
    async fn delete(&self, handle: &ResourceHandle) -> ProviderResult<()>;

    /// Reads an instance, `None` if it does not exist.
    async fn read(&self, handle: &ResourceHandle) -> ProviderResult<Option<ObservedResource>>;
}

#[async_trait]
impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn create(&self, request: &ResourceRequest) -> ProviderResult<ProviderOutput> {
        (**self).create(request).await
    }

    async fn update(
        &self,
        handle: &ResourceHandle,
        request: &ResourceRequest,
    ) -> ProviderResult<ProviderOutput> {
        (**self).update(handle, request).await
    }

    async fn delete(&self, handle: &ResourceHandle) -> ProviderResult<()> {
        (**self).delete(handle).await
    }

    async fn read(&self, handle: &ResourceHandle) -> ProviderResult<Option<ObservedResource>> {
        (**self).read(handle).await
    }
}

impl ResourceHandle {
    /// Creates a handle.
    #[must_use]
    pub fn new(name: &str, resource_type: &str, provider_id: &str) -> Self {
        Self {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            provider_id: provider_id.to_string(),
        }
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{} ({})", self.resource_type, self.name, self.provider_id)
    }
}
