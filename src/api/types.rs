//! API request and response types.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::api::task_store::TaskPatch;
use crate::task::{
    Priority, Progress, Subtask, SubtaskId, SubtaskSequence, SubtaskStatus, Task, TaskId,
    TaskStatus,
};

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,

    /// Active store backend (`memory`, `sqlite`, `supabase`)
    pub store: String,

    /// Whether tasks survive a restart
    pub persistent: bool,
}

/// Pagination for task listings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListTasksQuery {
    pub const DEFAULT_LIMIT: usize = 50;
    pub const MAX_LIMIT: usize = 500;

    pub fn limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT)
    }

    pub fn offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

/// Distinguish an absent field from an explicit `null`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update of a task. `null` clears priority or due date.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "double_option")]
    pub priority: Option<Option<Priority>>,

    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<NaiveDate>>,
}

impl From<UpdateTaskRequest> for TaskPatch {
    fn from(req: UpdateTaskRequest) -> Self {
        TaskPatch {
            title: req.title,
            priority: req.priority,
            due_date: req.due_date,
        }
    }
}

/// Request to set a manual task status.
#[derive(Debug, Clone, Deserialize)]
pub struct SetStatusRequest {
    pub status: TaskStatus,
}

/// How a task's status is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusMode {
    Manual,
    Derived,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubtaskResponse {
    pub id: SubtaskId,
    pub task_id: TaskId,
    pub title: String,
    pub status: SubtaskStatus,
    pub order_index: i64,
    pub created_at: DateTime<Utc>,

    /// Whether the subtask can be toggled right now
    pub enabled: bool,
}

/// A task as presented to clients.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResponse {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub status_mode: StatusMode,

    /// Priority as stored, `None` when unset
    pub priority: Option<Priority>,

    /// Priority to display (`medium` when unset)
    pub effective_priority: Priority,
    pub due_date: Option<NaiveDate>,

    /// Subtasks in completion order
    pub subtasks: Vec<SubtaskResponse>,
    pub completed_subtasks: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Task> for TaskResponse {
    fn from(task: &Task) -> Self {
        let status_mode = match task.progress() {
            Progress::Manual { .. } => StatusMode::Manual,
            Progress::Derived { .. } => StatusMode::Derived,
        };

        let sequence = SubtaskSequence::new(task.subtasks());
        let subtasks: Vec<SubtaskResponse> = sequence
            .ordered()
            .iter()
            .enumerate()
            .map(|(position, s)| subtask_response(s, sequence.is_enabled_at(position)))
            .collect();
        let completed_subtasks = subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .count();

        Self {
            id: task.id(),
            title: task.title().to_string(),
            status: task.status(),
            status_mode,
            priority: task.priority(),
            effective_priority: task.effective_priority(),
            due_date: task.due_date(),
            subtasks,
            completed_subtasks,
            created_at: task.created_at(),
            updated_at: task.updated_at(),
        }
    }
}

fn subtask_response(subtask: &Subtask, enabled: bool) -> SubtaskResponse {
    SubtaskResponse {
        id: subtask.id,
        task_id: subtask.task_id,
        title: subtask.title.clone(),
        status: subtask.status,
        order_index: subtask.order_index,
        created_at: subtask.created_at,
        enabled,
    }
}

/// Error body. Rejected operations carry the task's current state.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskResponse>,
}
