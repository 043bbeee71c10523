//! Subtask definitions.
//!
//! A subtask is an ordered, dependent step inside a task. It has no lifecycle
//! of its own: it is created under a task, deleted with it, and its position
//! in the completion sequence comes from `order_index`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{TaskError, TaskId};

/// Unique identifier for a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubtaskId(Uuid);

impl SubtaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SubtaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Completion state of a single subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    #[default]
    Open,
    Completed,
}

impl SubtaskStatus {
    /// The status a toggle moves to.
    pub fn toggled(self) -> Self {
        match self {
            Self::Open => Self::Completed,
            Self::Completed => Self::Open,
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubtaskStatus {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "completed" => Ok(Self::Completed),
            other => Err(TaskError::InvalidValue {
                field: "subtask status",
                value: other.to_string(),
            }),
        }
    }
}

/// A step inside a task.
///
/// # Invariants
/// - `title` is non-empty (enforced by `new`)
/// - `order_index` is a sort key only: it may repeat or have gaps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,

    /// Owning task (relation only)
    pub task_id: TaskId,

    pub title: String,

    pub status: SubtaskStatus,

    /// Position in the required completion sequence
    pub order_index: i64,

    pub created_at: DateTime<Utc>,
}

impl Subtask {
    /// Create an open subtask for `task_id`.
    ///
    /// # Errors
    /// Returns `TaskError::EmptyTitle` if `title` is blank.
    pub fn new(
        task_id: TaskId,
        title: impl Into<String>,
        order_index: i64,
    ) -> Result<Self, TaskError> {
        let title = super::task::normalize_title(title.into())?;
        Ok(Self {
            id: SubtaskId::new(),
            task_id,
            title,
            status: SubtaskStatus::Open,
            order_index,
            created_at: Utc::now(),
        })
    }

    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }
}

/// Order index for a subtask appended after `existing`.
pub fn next_order_index(existing: &[Subtask]) -> i64 {
    existing
        .iter()
        .map(|s| s.order_index)
        .max()
        .map(|max| max.saturating_add(1))
        .unwrap_or(0)
}
