//! In-memory resource manager that records every lifecycle call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::schema_change::{
    domain::ResourceId,
    ports::{
        PodResource, PodSpec, ResourceError, ResourceLocation, ResourceManager, ResourceResult,
    },
};

/// Thread-safe in-memory resource manager.
///
/// New resources report the addresses configured with
/// [`InMemoryResourceManager::with_pod_addresses`].
#[derive(Debug, Clone, Default)]
pub struct InMemoryResourceManager {
    state: Arc<Mutex<ResourceState>>,
}

#[derive(Debug, Default)]
struct ResourceState {
    next_id: u64,
    pod_template: PodResource,
    live: HashMap<ResourceId, PodResource>,
    created: Vec<(ResourceId, PodSpec)>,
    destroy_calls: Vec<ResourceId>,
    fail_create: bool,
}

impl InMemoryResourceManager {
    /// Creates a manager whose pods have no addresses yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the addresses reported for pods created afterwards.
    #[must_use]
    pub fn with_pod_addresses(self, pod: PodResource) -> Self {
        self.with_state(|state| state.pod_template = pod);
        self
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ResourceState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    /// Replaces the addresses of a live resource.
    pub fn set_pod_addresses(&self, id: ResourceId, pod: PodResource) {
        self.with_state(|state| {
            if let Some(live) = state.live.get_mut(&id) {
                *live = pod;
            }
        });
    }

    /// Makes subsequent `create` calls fail.
    pub fn fail_create(&self, fail: bool) {
        self.with_state(|state| state.fail_create = fail);
    }

    /// Returns every resource created so far with its requested spec.
    #[must_use]
    pub fn created(&self) -> Vec<(ResourceId, PodSpec)> {
        self.with_state(|state| state.created.clone())
    }

    /// Returns every `destroy` call so far, including repeated ones.
    #[must_use]
    pub fn destroy_calls(&self) -> Vec<ResourceId> {
        self.with_state(|state| state.destroy_calls.clone())
    }

    /// Returns whether `id` is still provisioned.
    #[must_use]
    pub fn is_live(&self, id: ResourceId) -> bool {
        self.with_state(|state| state.live.contains_key(&id))
    }
}

#[async_trait]
impl ResourceManager for InMemoryResourceManager {
    async fn create(
        &self,
        _location: &ResourceLocation,
        _resource_type: &str,
        _image: &str,
        spec: &PodSpec,
    ) -> ResourceResult<(ResourceId, PodResource)> {
        self.with_state(|state| {
            if state.fail_create {
                return Err(ResourceError::Rejected("injected create failure".to_owned()));
            }
            state.next_id += 1;
            let id = ResourceId::new(state.next_id);
            let mut pod = state.pod_template.clone();
            if let Some(mapping) = spec.port_mappings.first() {
                pod.mapped_port = Some(mapping.host_port);
            }
            state.live.insert(id, pod.clone());
            state.created.push((id, spec.clone()));
            Ok((id, pod))
        })
    }

    async fn destroy(&self, id: ResourceId) -> ResourceResult<()> {
        self.with_state(|state| {
            state.destroy_calls.push(id);
            state
                .live
                .remove(&id)
                .map(|_| ())
                .ok_or(ResourceError::NotFound(id))
        })
    }

    async fn query(&self, id: ResourceId) -> ResourceResult<Option<PodResource>> {
        Ok(self.with_state(|state| state.live.get(&id).cloned()))
    }
}
