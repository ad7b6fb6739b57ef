//! In-memory schedule repository.
//!
//! Tasks are kept as encoded rows, the way a relational store keeps them, so
//! every read goes through the same decode and upgrade path as production
//! storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::schema_change::{
    domain::{
        OscState, PersistedScheduleTaskData, Schedule, ScheduleId, ScheduleTask, ScheduleTaskId,
        TaskParameters, TaskResult, TaskStatus, decode_task_parameters, encode_task_parameters,
    },
    ports::{ScheduleRepository, ScheduleRepositoryError, ScheduleRepositoryResult},
};

/// Thread-safe in-memory schedule repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduleRepository {
    state: Arc<RwLock<InMemoryScheduleState>>,
}

#[derive(Debug, Default)]
struct InMemoryScheduleState {
    schedules: HashMap<ScheduleId, Schedule>,
    tasks: HashMap<ScheduleTaskId, TaskRow>,
}

#[derive(Debug, Clone)]
struct TaskRow {
    id: ScheduleTaskId,
    schedule_id: ScheduleId,
    sequence: u32,
    state: String,
    status: String,
    parameters_json: String,
    result_json: Option<String>,
    progress_percentage: f64,
    extra_info: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn encode(task: &ScheduleTask) -> ScheduleRepositoryResult<Self> {
        Ok(Self {
            id: task.id(),
            schedule_id: task.schedule_id(),
            sequence: task.sequence(),
            state: task.state().as_str().to_owned(),
            status: task.status().as_str().to_owned(),
            parameters_json: encode_parameters(task.id(), task.parameters())?,
            result_json: task
                .result()
                .map(|result| encode_result(task.id(), result))
                .transpose()?,
            progress_percentage: task.progress_percentage(),
            extra_info: task.extra_info().map(str::to_owned),
            created_at: task.created_at(),
            updated_at: task.updated_at(),
        })
    }

    fn decode(&self) -> ScheduleRepositoryResult<ScheduleTask> {
        let corrupt = |message: String| ScheduleRepositoryError::Corrupt {
            task_id: self.id,
            message,
        };
        let state = OscState::try_from(self.state.as_str()).map_err(|err| corrupt(err.to_string()))?;
        let status =
            TaskStatus::try_from(self.status.as_str()).map_err(|err| corrupt(err.to_string()))?;
        let parameters =
            decode_task_parameters(&self.parameters_json).map_err(|err| corrupt(err.to_string()))?;
        let result = self
            .result_json
            .as_deref()
            .map(serde_json::from_str::<TaskResult>)
            .transpose()
            .map_err(|err| corrupt(err.to_string()))?;

        Ok(ScheduleTask::from_persisted(PersistedScheduleTaskData {
            id: self.id,
            schedule_id: self.schedule_id,
            sequence: self.sequence,
            state,
            status,
            parameters,
            result,
            progress_percentage: self.progress_percentage,
            extra_info: self.extra_info.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }))
    }
}

fn encode_parameters(
    task_id: ScheduleTaskId,
    parameters: &TaskParameters,
) -> ScheduleRepositoryResult<String> {
    encode_task_parameters(parameters).map_err(|err| ScheduleRepositoryError::Corrupt {
        task_id,
        message: err.to_string(),
    })
}

fn encode_result(task_id: ScheduleTaskId, result: &TaskResult) -> ScheduleRepositoryResult<String> {
    serde_json::to_string(result).map_err(|err| ScheduleRepositoryError::Corrupt {
        task_id,
        message: err.to_string(),
    })
}

fn lock_error(err: impl std::fmt::Display) -> ScheduleRepositoryError {
    ScheduleRepositoryError::persistence(std::io::Error::other(err.to_string()))
}

impl InMemoryScheduleRepository {
    /// Creates an empty in-memory repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored parameter blob of a task verbatim.
    ///
    /// Used to seed rows written by older releases.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleRepositoryError::TaskNotFound`] when the task does
    /// not exist.
    pub fn overwrite_parameters_json(
        &self,
        id: ScheduleTaskId,
        json: impl Into<String>,
    ) -> ScheduleRepositoryResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        let row = state
            .tasks
            .get_mut(&id)
            .ok_or(ScheduleRepositoryError::TaskNotFound(id))?;
        row.parameters_json = json.into();
        Ok(())
    }

    /// Returns the stored parameter blob of a task.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleRepositoryError::TaskNotFound`] when the task does
    /// not exist.
    pub fn parameters_json(&self, id: ScheduleTaskId) -> ScheduleRepositoryResult<String> {
        let state = self.state.read().map_err(lock_error)?;
        state
            .tasks
            .get(&id)
            .map(|row| row.parameters_json.clone())
            .ok_or(ScheduleRepositoryError::TaskNotFound(id))
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn store_schedule(&self, schedule: &Schedule) -> ScheduleRepositoryResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        if state.schedules.contains_key(&schedule.id()) {
            return Err(ScheduleRepositoryError::DuplicateSchedule(schedule.id()));
        }
        state.schedules.insert(schedule.id(), schedule.clone());
        Ok(())
    }

    async fn update_schedule(&self, schedule: &Schedule) -> ScheduleRepositoryResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        let stored = state
            .schedules
            .get_mut(&schedule.id())
            .ok_or(ScheduleRepositoryError::ScheduleNotFound(schedule.id()))?;
        *stored = schedule.clone();
        Ok(())
    }

    async fn find_schedule(&self, id: ScheduleId) -> ScheduleRepositoryResult<Option<Schedule>> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state.schedules.get(&id).cloned())
    }

    async fn store_task(&self, task: &ScheduleTask) -> ScheduleRepositoryResult<()> {
        let row = TaskRow::encode(task)?;
        let mut state = self.state.write().map_err(lock_error)?;
        if state.tasks.contains_key(&task.id()) {
            return Err(ScheduleRepositoryError::DuplicateTask(task.id()));
        }
        state.tasks.insert(task.id(), row);
        Ok(())
    }

    async fn update_task(&self, task: &ScheduleTask) -> ScheduleRepositoryResult<()> {
        let row = TaskRow::encode(task)?;
        let mut state = self.state.write().map_err(lock_error)?;
        let stored = state
            .tasks
            .get_mut(&task.id())
            .ok_or(ScheduleRepositoryError::TaskNotFound(task.id()))?;
        *stored = row;
        Ok(())
    }

    async fn find_task(
        &self,
        id: ScheduleTaskId,
    ) -> ScheduleRepositoryResult<Option<ScheduleTask>> {
        let state = self.state.read().map_err(lock_error)?;
        state.tasks.get(&id).map(TaskRow::decode).transpose()
    }

    async fn list_tasks(
        &self,
        schedule_id: ScheduleId,
    ) -> ScheduleRepositoryResult<Vec<ScheduleTask>> {
        let state = self.state.read().map_err(lock_error)?;
        let mut rows: Vec<&TaskRow> = state
            .tasks
            .values()
            .filter(|row| row.schedule_id == schedule_id)
            .collect();
        rows.sort_by_key(|row| row.sequence);
        rows.into_iter().map(TaskRow::decode).collect()
    }

    async fn update_task_parameters(
        &self,
        id: ScheduleTaskId,
        parameters: &TaskParameters,
    ) -> ScheduleRepositoryResult<usize> {
        let json = encode_parameters(id, parameters)?;
        let mut state = self.state.write().map_err(lock_error)?;
        Ok(state.tasks.get_mut(&id).map_or(0, |row| {
            row.parameters_json = json;
            1
        }))
    }

    async fn update_task_result(
        &self,
        id: ScheduleTaskId,
        result: &TaskResult,
    ) -> ScheduleRepositoryResult<usize> {
        let json = encode_result(id, result)?;
        let mut state = self.state.write().map_err(lock_error)?;
        Ok(state.tasks.get_mut(&id).map_or(0, |row| {
            row.result_json = Some(json);
            1
        }))
    }
}
