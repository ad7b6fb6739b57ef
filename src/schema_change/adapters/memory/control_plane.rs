//! Scripted in-memory worker control plane.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::schema_change::ports::{
    ControlPlane, ControlPlaneError, ControlPlaneResult, MigrationCounters, SupervisorResponse,
};

/// In-memory control plane addressing workers by base URL.
///
/// A worker answers only after [`InMemoryControlPlane::mark_alive`]; its
/// `monitor` endpoint answers only after a successful `start`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryControlPlane {
    state: Arc<Mutex<ControlPlaneState>>,
}

#[derive(Debug, Default)]
struct ControlPlaneState {
    alive: HashSet<String>,
    started: HashMap<String, BTreeMap<String, String>>,
    counters: HashMap<String, MigrationCounters>,
    reject_start: bool,
    reject_updates: bool,
    fail_monitor: bool,
    start_calls: usize,
    update_calls: Vec<(String, u32)>,
    clear_calls: Vec<String>,
}

fn unreachable_worker(path: &str, base_url: &str) -> ControlPlaneError {
    ControlPlaneError::Transport {
        path: path.to_owned(),
        message: format!("{base_url} is not reachable"),
    }
}

impl InMemoryControlPlane {
    /// Creates a control plane with no reachable worker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ControlPlaneState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    /// Makes the worker at `base_url` answer.
    pub fn mark_alive(&self, base_url: impl Into<String>) {
        self.with_state(|state| {
            state.alive.insert(base_url.into());
        });
    }

    /// Makes the worker at `base_url` stop answering.
    pub fn mark_down(&self, base_url: &str) {
        self.with_state(|state| {
            state.alive.remove(base_url);
        });
    }

    /// Sets the counters the worker at `base_url` reports.
    pub fn set_counters(&self, base_url: impl Into<String>, counters: MigrationCounters) {
        self.with_state(|state| {
            state.counters.insert(base_url.into(), counters);
        });
    }

    /// Makes `start` answer with `success = false`.
    pub fn reject_start(&self, reject: bool) {
        self.with_state(|state| state.reject_start = reject);
    }

    /// Makes `update` answer with `success = false`.
    pub fn reject_updates(&self, reject: bool) {
        self.with_state(|state| state.reject_updates = reject);
    }

    /// Makes `monitor` fail for every worker.
    pub fn fail_monitor(&self, fail: bool) {
        self.with_state(|state| state.fail_monitor = fail);
    }

    /// Returns the configuration the worker at `base_url` was started with.
    #[must_use]
    pub fn started_config(&self, base_url: &str) -> Option<BTreeMap<String, String>> {
        self.with_state(|state| state.started.get(base_url).cloned())
    }

    /// Returns the number of `start` calls, accepted or not.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.with_state(|state| state.start_calls)
    }

    /// Returns every `update` call as `(base_url, throttle_rps)`.
    #[must_use]
    pub fn update_calls(&self) -> Vec<(String, u32)> {
        self.with_state(|state| state.update_calls.clone())
    }

    /// Returns every `clear` call.
    #[must_use]
    pub fn clear_calls(&self) -> Vec<String> {
        self.with_state(|state| state.clear_calls.clone())
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn heartbeat(&self, base_url: &str) -> ControlPlaneResult<SupervisorResponse> {
        self.with_state(|state| {
            if state.alive.contains(base_url) {
                Ok(SupervisorResponse::ok())
            } else {
                Err(unreachable_worker("/heartbeat", base_url))
            }
        })
    }

    async fn start(
        &self,
        base_url: &str,
        config: &BTreeMap<String, String>,
    ) -> ControlPlaneResult<SupervisorResponse> {
        self.with_state(|state| {
            if !state.alive.contains(base_url) {
                return Err(unreachable_worker("/start", base_url));
            }
            state.start_calls += 1;
            if state.reject_start {
                return Ok(SupervisorResponse::rejected());
            }
            state.started.insert(base_url.to_owned(), config.clone());
            Ok(SupervisorResponse::ok())
        })
    }

    async fn monitor(&self, base_url: &str) -> ControlPlaneResult<MigrationCounters> {
        self.with_state(|state| {
            if !state.alive.contains(base_url) {
                return Err(unreachable_worker("/monitor", base_url));
            }
            if state.fail_monitor || !state.started.contains_key(base_url) {
                return Err(ControlPlaneError::Status {
                    path: "/monitor".to_owned(),
                    status: 500,
                });
            }
            Ok(state.counters.get(base_url).cloned().unwrap_or_default())
        })
    }

    async fn update(
        &self,
        base_url: &str,
        throttle_rps: u32,
    ) -> ControlPlaneResult<SupervisorResponse> {
        self.with_state(|state| {
            if !state.alive.contains(base_url) {
                return Err(unreachable_worker("/update", base_url));
            }
            state.update_calls.push((base_url.to_owned(), throttle_rps));
            if state.reject_updates {
                Ok(SupervisorResponse::rejected())
            } else {
                Ok(SupervisorResponse::ok())
            }
        })
    }

    async fn clear(&self, base_url: &str) -> ControlPlaneResult<SupervisorResponse> {
        self.with_state(|state| {
            state.clear_calls.push(base_url.to_owned());
            if !state.alive.contains(base_url) {
                return Err(unreachable_worker("/clear", base_url));
            }
            state.started.remove(base_url);
            Ok(SupervisorResponse::ok())
        })
    }
}
