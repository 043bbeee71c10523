//! Task storage module with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database with cascading subtask deletes
//! - `supabase`: Hosted Postgres through the PostgREST API
//!
//! Stores are plain record stores. They never apply the completion rules;
//! callers run the engine in [`crate::task::completion`] and persist what it
//! returns. Concurrent writers are last-writer-wins.

mod changes;
mod memory;
mod sqlite;
mod supabase;

pub use changes::{ChangeFeed, ChangeKind, TaskChange, TaskSubscription};
pub use memory::InMemoryTaskStore;
pub use sqlite::SqliteTaskStore;
pub use supabase::SupabaseTaskStore;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::task::{Priority, Subtask, SubtaskId, SubtaskStatus, Task, TaskError, TaskId, TaskStatus};

/// Partial update of a task's descriptive fields.
///
/// The outer `Option` means "leave unchanged"; `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub priority: Option<Option<Priority>>,
    pub due_date: Option<Option<NaiveDate>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.priority.is_none() && self.due_date.is_none()
    }

    /// Trim the title and reject a blank one.
    pub fn normalized(mut self) -> Result<Self, TaskError> {
        if let Some(title) = self.title.take() {
            self.title = Some(crate::task::task::normalize_title(title)?);
        }
        Ok(self)
    }
}

/// Errors returned by task stores.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Task {0} not found")]
    TaskNotFound(TaskId),

    #[error("Subtask {0} not found")]
    SubtaskNotFound(SubtaskId),

    /// The row changed underneath the write. Only some backends detect this.
    #[error("Conflicting concurrent update: {0}")]
    Conflict(String),

    #[error("Stored record is invalid: {0}")]
    Corrupt(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl From<TaskError> for StoreError {
    fn from(e: TaskError) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Task store trait - implemented by all storage backends.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Change feed fed by this store's writes.
    fn changes(&self) -> &ChangeFeed;

    /// List tasks with their subtasks, newest first.
    async fn list_tasks(&self, limit: usize, offset: usize) -> Result<Vec<Task>, StoreError>;

    /// Get a task and its subtasks.
    ///
    /// Subtasks come back ordered by `order_index`, then creation order.
    async fn fetch_task(&self, id: TaskId) -> Result<Task, StoreError>;

    /// Insert a new task together with any subtasks it already has.
    async fn create_task(&self, task: &Task) -> Result<(), StoreError>;

    /// Update title, priority and due date.
    async fn update_task_details(&self, id: TaskId, patch: &TaskPatch) -> Result<(), StoreError>;

    /// Delete a task and all of its subtasks. Returns whether it existed.
    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Insert a subtask under `subtask.task_id`.
    async fn add_subtask(&self, subtask: &Subtask) -> Result<(), StoreError>;

    /// Delete one subtask. Returns whether it existed.
    async fn delete_subtask(&self, task_id: TaskId, subtask_id: SubtaskId)
        -> Result<bool, StoreError>;

    /// Write a subtask's status.
    async fn persist_subtask_status(
        &self,
        subtask_id: SubtaskId,
        status: SubtaskStatus,
    ) -> Result<(), StoreError>;

    /// Write a task's status (manual, or the denormalized derived value).
    async fn persist_task_status(&self, task_id: TaskId, status: TaskStatus)
        -> Result<(), StoreError>;

    /// Follow changes to one task.
    fn subscribe(&self, task_id: TaskId) -> TaskSubscription {
        self.changes().subscribe(task_id)
    }
}

/// Task store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStoreType {
    Memory,
    #[default]
    Sqlite,
    Supabase,
}

impl TaskStoreType {
    /// Parse from environment variable value.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "sqlite" | "db" => Some(Self::Sqlite),
            "supabase" | "postgrest" => Some(Self::Supabase),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Sqlite => "sqlite",
            Self::Supabase => "supabase",
        }
    }
}

/// Create a task store based on configuration.
pub async fn create_task_store(config: &StoreConfig) -> Result<Arc<dyn TaskStore>, StoreError> {
    let feed = ChangeFeed::new(config.change_buffer);
    match config.store_type {
        TaskStoreType::Memory => Ok(Arc::new(InMemoryTaskStore::with_feed(feed))),
        TaskStoreType::Sqlite => {
            let store = SqliteTaskStore::new(config.data_dir.clone(), feed).await?;
            Ok(Arc::new(store))
        }
        TaskStoreType::Supabase => {
            let (Some(url), Some(key)) = (
                config.supabase_url.as_deref(),
                config.supabase_service_role_key.as_deref(),
            ) else {
                return Err(StoreError::Backend(
                    "Supabase store requires SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY".to_string(),
                ));
            };
            Ok(Arc::new(SupabaseTaskStore::new(url, key, feed)))
        }
    }
}
