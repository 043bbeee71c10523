//! Core Task type.
//!
//! # Invariants
//! - `title` is non-empty
//! - a task with subtasks never stores its own status; it is derived from the
//!   subtasks on every read (see [`Progress`])

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::completion::derive_task_status;
use super::subtask::Subtask;

/// Unique identifier for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Get the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Aggregate status of a task.
///
/// # State Machine
/// ```text
/// manual task:   any -> any (set directly)
/// derived task:  all open -> Open
///                mixed    -> InProgress
///                all done -> Completed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Open,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            other => Err(TaskError::InvalidValue {
                field: "task status",
                value: other.to_string(),
            }),
        }
    }
}

/// Task priority. Absent priorities display as `Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(TaskError::InvalidValue {
                field: "priority",
                value: other.to_string(),
            }),
        }
    }
}

/// How a task's status is determined.
///
/// `Manual` is the only variant that carries a status, so a status can only
/// ever be assigned to a task without subtasks. `Derived` always holds at
/// least one subtask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Progress {
    Manual { status: TaskStatus },
    Derived { subtasks: Vec<Subtask> },
}

impl Progress {
    fn from_subtasks(subtasks: Vec<Subtask>, fallback: TaskStatus) -> Self {
        if subtasks.is_empty() {
            Progress::Manual { status: fallback }
        } else {
            Progress::Derived { subtasks }
        }
    }
}

/// Flat snapshot of a task record as a store keeps it.
///
/// `status` is the last persisted status. For tasks with subtasks it is a
/// denormalized copy of the derived status and is ignored on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRow {
    pub id: TaskId,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Option<Priority>,
    pub due_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A unit of work, optionally decomposed into ordered subtasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TaskRecord")]
pub struct Task {
    id: TaskId,
    title: String,
    priority: Option<Priority>,
    due_date: Option<NaiveDate>,
    progress: Progress,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Serialized form of a [`Task`], checked before it becomes one.
#[derive(Deserialize)]
struct TaskRecord {
    id: TaskId,
    title: String,
    priority: Option<Priority>,
    due_date: Option<NaiveDate>,
    progress: Progress,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRecord> for Task {
    type Error = TaskError;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        // an empty derived list is a manual task with the status it derives
        let progress = match record.progress {
            Progress::Derived { subtasks } => Progress::from_subtasks(subtasks, TaskStatus::Open),
            manual @ Progress::Manual { .. } => manual,
        };
        Ok(Self {
            id: record.id,
            title: normalize_title(record.title)?,
            priority: record.priority,
            due_date: record.due_date,
            progress,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}

impl Task {
    /// Create a new manual task with status `Open`.
    ///
    /// # Errors
    /// Returns `TaskError::EmptyTitle` if `title` is blank.
    pub fn new(title: impl Into<String>) -> Result<Self, TaskError> {
        let title = normalize_title(title.into())?;
        let now = Utc::now();
        Ok(Self {
            id: TaskId::new(),
            title,
            priority: None,
            due_date: None,
            progress: Progress::Manual {
                status: TaskStatus::Open,
            },
            created_at: now,
            updated_at: now,
        })
    }

    /// Rebuild a task from its stored row and subtasks.
    pub fn from_row(row: TaskRow, subtasks: Vec<Subtask>) -> Self {
        Self {
            id: row.id,
            title: row.title,
            priority: row.priority,
            due_date: row.due_date,
            progress: Progress::from_subtasks(subtasks, row.status),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }

    /// Flatten into a stored row, with `status` set to the current status.
    pub fn to_row(&self) -> TaskRow {
        TaskRow {
            id: self.id,
            title: self.title.clone(),
            status: self.status(),
            priority: self.priority,
            due_date: self.due_date,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn with_priority(mut self, priority: Option<Priority>) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due_date(mut self, due_date: Option<NaiveDate>) -> Self {
        self.due_date = due_date;
        self
    }

    /// Attach subtasks. An empty list leaves the task manual.
    pub fn with_subtasks(mut self, subtasks: Vec<Subtask>) -> Self {
        let current = self.status();
        self.progress = Progress::from_subtasks(subtasks, current);
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// Priority used for display and sorting.
    pub fn effective_priority(&self) -> Priority {
        self.priority.unwrap_or_default()
    }

    pub fn due_date(&self) -> Option<NaiveDate> {
        self.due_date
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Subtasks in collection order (empty for manual tasks).
    pub fn subtasks(&self) -> &[Subtask] {
        match &self.progress {
            Progress::Manual { .. } => &[],
            Progress::Derived { subtasks } => subtasks,
        }
    }

    pub fn has_subtasks(&self) -> bool {
        matches!(self.progress, Progress::Derived { .. })
    }

    /// Current status: stored for manual tasks, derived otherwise.
    pub fn status(&self) -> TaskStatus {
        match &self.progress {
            Progress::Manual { status } => *status,
            Progress::Derived { subtasks } => derive_task_status(subtasks),
        }
    }

    /// Mutable access to the status, available only for manual tasks.
    pub fn manual_status_mut(&mut self) -> Option<&mut TaskStatus> {
        match &mut self.progress {
            Progress::Manual { status } => Some(status),
            Progress::Derived { .. } => None,
        }
    }
}

/// Trim a title and reject it if nothing is left.
pub(crate) fn normalize_title(title: String) -> Result<String, TaskError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(TaskError::EmptyTitle);
    }
    if trimmed.len() == title.len() {
        Ok(title)
    } else {
        Ok(trimmed.to_string())
    }
}

/// Errors that can occur while building or decoding tasks.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Title cannot be empty")]
    EmptyTitle,

    #[error("Invalid {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::SubtaskStatus;

    #[test]
    fn test_new_task_is_manual_and_open() {
        let task = Task::new("Write release notes").unwrap();
        assert!(!task.has_subtasks());
        assert_eq!(task.status(), TaskStatus::Open);
        assert_eq!(task.effective_priority(), Priority::Medium);
    }

    #[test]
    fn test_title_is_trimmed() {
        let task = Task::new("  Plan sprint ").unwrap();
        assert_eq!(task.title(), "Plan sprint");
        assert_eq!(Task::new(" \t").unwrap_err(), TaskError::EmptyTitle);
    }

    #[test]
    fn test_derived_task_has_no_manual_status() {
        let task = Task::new("Ship").unwrap();
        let sub = Subtask::new(task.id(), "Build", 0).unwrap();
        let mut task = task.with_subtasks(vec![sub]);
        assert!(task.manual_status_mut().is_none());
        assert_eq!(task.status(), TaskStatus::Open);
    }

    #[test]
    fn test_row_round_trip_ignores_stale_status_when_derived() {
        let task = Task::new("Ship").unwrap();
        let mut sub = Subtask::new(task.id(), "Build", 0).unwrap();
        sub.status = SubtaskStatus::Completed;

        let mut row = task.to_row();
        row.status = TaskStatus::Open;
        let rebuilt = Task::from_row(row, vec![sub]);
        assert_eq!(rebuilt.status(), TaskStatus::Completed);
    }

    #[test]
    fn test_from_row_without_subtasks_keeps_stored_status() {
        let mut row = Task::new("Ship").unwrap().to_row();
        row.status = TaskStatus::InProgress;
        let rebuilt = Task::from_row(row, Vec::new());
        assert_eq!(rebuilt.status(), TaskStatus::InProgress);
        assert!(matches!(rebuilt.progress(), Progress::Manual { .. }));
    }

    #[test]
    fn test_deserialized_empty_derived_task_is_manual() {
        let json = serde_json::json!({
            "id": "6f1c2a0e-0000-4000-8000-000000000003",
            "title": "Order catering",
            "priority": null,
            "due_date": null,
            "progress": {"mode": "derived", "subtasks": []},
            "created_at": "2026-10-19T08:00:00Z",
            "updated_at": "2026-10-19T08:00:00Z"
        });
        let task: Task = serde_json::from_value(json).unwrap();
        assert!(!task.has_subtasks());
        assert_eq!(task.status(), TaskStatus::Open);

        let updated = crate::task::set_manual_status(&task, TaskStatus::Completed).unwrap();
        assert_eq!(updated.status(), TaskStatus::Completed);
    }

    #[test]
    fn test_deserialize_rejects_blank_title() {
        let task = Task::new("Ship").unwrap();
        let mut json = serde_json::to_value(&task).unwrap();
        json["title"] = serde_json::json!("  ");
        assert!(serde_json::from_value::<Task>(json).is_err());
    }

    #[test]
    fn test_serialized_task_reads_back() {
        let task = Task::new("Ship").unwrap();
        let sub = Subtask::new(task.id(), "Build", 0).unwrap();
        let task = task.with_subtasks(vec![sub]);
        let json = serde_json::to_string(&task).unwrap();
        assert_eq!(serde_json::from_str::<Task>(&json).unwrap(), task);
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TaskStatus::InProgress.to_string(), "in_progress");
        assert_eq!("completed".parse::<TaskStatus>().unwrap(), TaskStatus::Completed);
        assert_eq!("low".parse::<Priority>().unwrap(), Priority::Low);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
