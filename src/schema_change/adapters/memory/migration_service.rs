//! Scripted in-memory migration service.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::schema_change::{
    domain::RateLimitConfig,
    ports::{
        DataSourceSpec, FullVerifyOutcome, MigrationService, MigrationServiceError,
        MigrationServiceResult, ProjectProgress, ProjectSpec, ProjectStatus, ProjectStep,
        ProjectStepName, ProjectStepStatus,
    },
};

/// In-memory migration service with scriptable project progress.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMigrationService {
    state: Arc<Mutex<ServiceState>>,
}

#[derive(Debug, Default)]
struct ServiceState {
    next_id: u64,
    datasources: Vec<DataSourceSpec>,
    projects: HashMap<String, ProjectRecord>,
    reject_rate_limit: bool,
    fail_describe: bool,
}

#[derive(Debug, Clone)]
struct ProjectRecord {
    spec: ProjectSpec,
    progress: ProjectProgress,
    steps: Vec<ProjectStep>,
    verify: Option<FullVerifyOutcome>,
    rate_limit_updates: Vec<RateLimitConfig>,
    stopped: bool,
    released: bool,
}

const fn step(name: ProjectStepName, status: ProjectStepStatus, progress: u8) -> ProjectStep {
    ProjectStep {
        name,
        status,
        progress: Some(progress),
        error_message: None,
        capacity: None,
        processed_records: None,
    }
}

fn initial_steps(enable_full_verify: bool) -> Vec<ProjectStep> {
    let mut steps = vec![
        step(ProjectStepName::TransferPrecheck, ProjectStepStatus::Finished, 100),
        step(ProjectStepName::TransferIncrLogPull, ProjectStepStatus::Running, 0),
        step(ProjectStepName::FullTransfer, ProjectStepStatus::Running, 0),
        step(ProjectStepName::IncrTransfer, ProjectStepStatus::Init, 0),
    ];
    if enable_full_verify {
        steps.push(step(ProjectStepName::FullVerifier, ProjectStepStatus::Init, 0));
    }
    steps
}

fn not_found(project_id: &str) -> MigrationServiceError {
    MigrationServiceError::ProjectNotFound(project_id.to_owned())
}

impl InMemoryMigrationService {
    /// Creates a service without projects.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ServiceState) -> T) -> T {
        let mut guard = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        f(&mut guard)
    }

    fn with_project<T>(
        &self,
        project_id: &str,
        f: impl FnOnce(&mut ProjectRecord) -> T,
    ) -> MigrationServiceResult<T> {
        self.with_state(|state| {
            state
                .projects
                .get_mut(project_id)
                .filter(|project| !project.released)
                .map(f)
                .ok_or_else(|| not_found(project_id))
        })
    }

    /// Returns the identifiers of every project created so far.
    #[must_use]
    pub fn project_ids(&self) -> Vec<String> {
        self.with_state(|state| {
            let mut ids: Vec<String> = state.projects.keys().cloned().collect();
            ids.sort();
            ids
        })
    }

    /// Returns the definition a project was created with.
    #[must_use]
    pub fn project_spec(&self, project_id: &str) -> Option<ProjectSpec> {
        self.with_state(|state| {
            state
                .projects
                .get(project_id)
                .map(|project| project.spec.clone())
        })
    }

    /// Returns the number of registered datasources.
    #[must_use]
    pub fn datasource_count(&self) -> usize {
        self.with_state(|state| state.datasources.len())
    }

    /// Replaces the reported progress of a project.
    pub fn set_progress(&self, project_id: &str, progress: ProjectProgress) {
        self.with_state(|state| {
            if let Some(project) = state.projects.get_mut(project_id) {
                project.progress = progress;
            }
        });
    }

    /// Replaces the reported steps of a project.
    pub fn set_steps(&self, project_id: &str, steps: Vec<ProjectStep>) {
        self.with_state(|state| {
            if let Some(project) = state.projects.get_mut(project_id) {
                project.steps = steps;
            }
        });
    }

    /// Sets the verification outcome of a project.
    pub fn set_full_verify(&self, project_id: &str, outcome: FullVerifyOutcome) {
        self.with_state(|state| {
            if let Some(project) = state.projects.get_mut(project_id) {
                project.verify = Some(outcome);
            }
        });
    }

    /// Reports every checked step of a project as complete with the given
    /// incremental checkpoint.
    pub fn finish_transfer(&self, project_id: &str, checkpoint: i64) {
        self.with_state(|state| {
            if let Some(project) = state.projects.get_mut(project_id) {
                for reported in &mut project.steps {
                    reported.progress = Some(100);
                    reported.status = match reported.name {
                        ProjectStepName::IncrTransfer => ProjectStepStatus::Monitoring,
                        ProjectStepName::FullVerifier => ProjectStepStatus::Running,
                        _ => ProjectStepStatus::Finished,
                    };
                }
                project.progress.current_step = Some(ProjectStepName::IncrTransfer);
                project.progress.incr_sync_checkpoint = Some(checkpoint);
            }
        });
    }

    /// Makes rate-limit updates fail.
    pub fn reject_rate_limit_updates(&self, reject: bool) {
        self.with_state(|state| state.reject_rate_limit = reject);
    }

    /// Makes progress and step queries fail.
    pub fn fail_describe(&self, fail: bool) {
        self.with_state(|state| state.fail_describe = fail);
    }

    /// Returns every rate limit pushed to a project.
    #[must_use]
    pub fn rate_limit_updates(&self, project_id: &str) -> Vec<RateLimitConfig> {
        self.with_state(|state| {
            state
                .projects
                .get(project_id)
                .map(|project| project.rate_limit_updates.clone())
                .unwrap_or_default()
        })
    }

    /// Returns whether a project was stopped and released.
    #[must_use]
    pub fn is_released(&self, project_id: &str) -> bool {
        self.with_state(|state| {
            state
                .projects
                .get(project_id)
                .is_some_and(|project| project.stopped && project.released)
        })
    }
}

#[async_trait]
impl MigrationService for InMemoryMigrationService {
    async fn create_datasource(&self, spec: &DataSourceSpec) -> MigrationServiceResult<String> {
        Ok(self.with_state(|state| {
            state.next_id += 1;
            state.datasources.push(spec.clone());
            format!("ds-{}", state.next_id)
        }))
    }

    async fn create_project(&self, spec: &ProjectSpec) -> MigrationServiceResult<String> {
        Ok(self.with_state(|state| {
            state.next_id += 1;
            let id = format!("project-{}", state.next_id);
            state.projects.insert(
                id.clone(),
                ProjectRecord {
                    spec: spec.clone(),
                    progress: ProjectProgress {
                        status: ProjectStatus::Running,
                        current_step: Some(ProjectStepName::FullTransfer),
                        incr_sync_checkpoint: None,
                    },
                    steps: initial_steps(spec.enable_full_verify),
                    verify: None,
                    rate_limit_updates: Vec::new(),
                    stopped: false,
                    released: false,
                },
            );
            id
        }))
    }

    async fn describe_progress(&self, project_id: &str) -> MigrationServiceResult<ProjectProgress> {
        if self.with_state(|state| state.fail_describe) {
            return Err(MigrationServiceError::Rejected("describe unavailable".to_owned()));
        }
        self.with_project(project_id, |project| project.progress.clone())
    }

    async fn describe_steps(&self, project_id: &str) -> MigrationServiceResult<Vec<ProjectStep>> {
        if self.with_state(|state| state.fail_describe) {
            return Err(MigrationServiceError::Rejected("describe unavailable".to_owned()));
        }
        self.with_project(project_id, |project| project.steps.clone())
    }

    async fn full_verify_result(
        &self,
        project_id: &str,
    ) -> MigrationServiceResult<Option<FullVerifyOutcome>> {
        self.with_project(project_id, |project| project.verify.clone())
    }

    async fn update_rate_limit(
        &self,
        project_id: &str,
        rate_limit: &RateLimitConfig,
    ) -> MigrationServiceResult<()> {
        if self.with_state(|state| state.reject_rate_limit) {
            return Err(MigrationServiceError::Rejected("rate limit update refused".to_owned()));
        }
        self.with_project(project_id, |project| {
            project.rate_limit_updates.push(*rate_limit);
            project.spec.rate_limit = *rate_limit;
        })
    }

    async fn stop_project(&self, project_id: &str) -> MigrationServiceResult<()> {
        self.with_project(project_id, |project| project.stopped = true)
    }

    async fn release_project(&self, project_id: &str) -> MigrationServiceResult<()> {
        self.with_project(project_id, |project| {
            project.released = true;
            project.progress.status = ProjectStatus::Released;
        })
    }
}
