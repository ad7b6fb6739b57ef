//! Compute resource port used to provision self-hosted workers.

use crate::schema_change::domain::ResourceId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Result type for resource manager operations.
pub type ResourceResult<T> = Result<T, ResourceError>;

/// Where a resource is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLocation {
    /// Region the resource runs in.
    pub region: String,
    /// Group (cluster) inside the region.
    pub group: String,
}

/// A container port exposed on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port on the host.
    pub host_port: u16,
    /// Port inside the container.
    pub container_port: u16,
}

/// Requested shape of a worker pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSpec {
    /// Namespace the pod is created in.
    pub namespace: String,
    /// Pod name.
    pub name: String,
    /// Requested CPU in millicores.
    pub cpu_millis: u32,
    /// Requested memory in MiB.
    pub memory_mb: u32,
    /// Host port mappings, empty when pods are reachable directly.
    pub port_mappings: Vec<PortMapping>,
}

/// Addresses of a provisioned pod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodResource {
    /// Pod address, once scheduled.
    pub pod_ip: Option<String>,
    /// Address of the host running the pod.
    pub host_ip: Option<String>,
    /// Host port mapped to the worker listen port.
    pub mapped_port: Option<u16>,
}

/// Compute resource lifecycle contract.
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// Provisions a resource and returns its handle and current addresses.
    async fn create(
        &self,
        location: &ResourceLocation,
        resource_type: &str,
        image: &str,
        spec: &PodSpec,
    ) -> ResourceResult<(ResourceId, PodResource)>;

    /// Releases a resource.
    ///
    /// # Errors
    ///
    /// Returns [`ResourceError::NotFound`] when the handle is unknown or
    /// already released.
    async fn destroy(&self, id: ResourceId) -> ResourceResult<()>;

    /// Returns the current addresses of a resource, or `None` when it is
    /// gone.
    async fn query(&self, id: ResourceId) -> ResourceResult<Option<PodResource>>;
}

/// Errors returned by resource managers.
#[derive(Debug, Clone, Error)]
pub enum ResourceError {
    /// The resource handle is unknown.
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// The backend refused the request.
    #[error("resource request rejected: {0}")]
    Rejected(String),

    /// Backend failure.
    #[error("resource manager error: {0}")]
    Backend(Arc<dyn std::error::Error + Send + Sync>),
}

impl ResourceError {
    /// Wraps a backend error.
    pub fn backend(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Arc::new(err))
    }
}
