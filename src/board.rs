//! Task board service.
//!
//! Wires the completion engine to a [`TaskStore`]. Every use case reads the
//! task fresh from the store, runs the engine on that snapshot, persists the
//! result and re-fetches, so callers always get back what the store holds.

use std::sync::Arc;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::api::task_store::{StoreError, TaskPatch, TaskStore, TaskSubscription};
use crate::task::{
    derive_task_status, next_order_index, set_manual_status, toggle_subtask, CompletionError,
    Priority, Subtask, SubtaskId, Task, TaskError, TaskId, TaskStatus,
};

/// Input for a new subtask.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSubtask {
    pub title: String,

    /// Position in the completion sequence. Appended after the last
    /// subtask when absent.
    #[serde(default)]
    pub order_index: Option<i64>,
}

impl NewSubtask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            order_index: None,
        }
    }
}

/// Input for a new task.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub subtasks: Vec<NewSubtask>,
}

impl NewTask {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            priority: None,
            due_date: None,
            subtasks: Vec::new(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    /// The engine refused the operation. `task` is the current state.
    #[error("{reason}")]
    Rejected {
        #[source]
        reason: CompletionError,
        task: Box<Task>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Invalid(#[from] TaskError),
}

impl BoardError {
    /// The task state that accompanies a rejection.
    pub fn current_task(&self) -> Option<&Task> {
        match self {
            BoardError::Rejected { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// Presentation-facing task operations.
#[derive(Clone)]
pub struct TaskBoard {
    store: Arc<dyn TaskStore>,
}

impl TaskBoard {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub async fn list(&self, limit: usize, offset: usize) -> Result<Vec<Task>, BoardError> {
        Ok(self.store.list_tasks(limit, offset).await?)
    }

    pub async fn get(&self, id: TaskId) -> Result<Task, BoardError> {
        Ok(self.store.fetch_task(id).await?)
    }

    /// Create a task, optionally with subtasks already attached.
    pub async fn create(&self, new: NewTask) -> Result<Task, BoardError> {
        let task = Task::new(new.title)?
            .with_priority(new.priority)
            .with_due_date(new.due_date);

        let mut subtasks: Vec<Subtask> = Vec::with_capacity(new.subtasks.len());
        for input in new.subtasks {
            let order_index = input
                .order_index
                .unwrap_or_else(|| next_order_index(&subtasks));
            subtasks.push(Subtask::new(task.id(), input.title, order_index)?);
        }
        let task = task.with_subtasks(subtasks);

        self.store.create_task(&task).await?;
        tracing::info!(
            task_id = %task.id(),
            subtasks = task.subtasks().len(),
            "Created task"
        );
        self.get(task.id()).await
    }

    /// Change title, priority or due date. Status is not touched here.
    pub async fn update_details(&self, id: TaskId, patch: TaskPatch) -> Result<Task, BoardError> {
        let patch = patch.normalized()?;
        if !patch.is_empty() {
            self.store.update_task_details(id, &patch).await?;
        }
        self.get(id).await
    }

    pub async fn delete(&self, id: TaskId) -> Result<(), BoardError> {
        if !self.store.delete_task(id).await? {
            return Err(StoreError::TaskNotFound(id).into());
        }
        tracing::info!(task_id = %id, "Deleted task");
        Ok(())
    }

    /// Append or insert a subtask, then persist the new derived status.
    pub async fn add_subtask(&self, id: TaskId, new: NewSubtask) -> Result<Task, BoardError> {
        let task = self.store.fetch_task(id).await?;
        let order_index = new
            .order_index
            .unwrap_or_else(|| next_order_index(task.subtasks()));
        let subtask = Subtask::new(id, new.title, order_index)?;

        let mut subtasks = task.subtasks().to_vec();
        subtasks.push(subtask.clone());
        let status = derive_task_status(&subtasks);

        self.store.add_subtask(&subtask).await?;
        self.store.persist_task_status(id, status).await?;
        tracing::debug!(
            task_id = %id,
            subtask_id = %subtask.id,
            order_index,
            status = %status,
            "Added subtask"
        );
        self.get(id).await
    }

    /// Remove a subtask. Removing the last one turns the task back into a
    /// manual task that keeps its last derived status.
    pub async fn remove_subtask(
        &self,
        id: TaskId,
        subtask_id: SubtaskId,
    ) -> Result<Task, BoardError> {
        let task = self.store.fetch_task(id).await?;
        let remaining: Vec<Subtask> = task
            .subtasks()
            .iter()
            .filter(|s| s.id != subtask_id)
            .cloned()
            .collect();
        if remaining.len() == task.subtasks().len() {
            return Err(self.reject(CompletionError::NotFound { task_id: id, subtask_id }, task));
        }

        let status = if remaining.is_empty() {
            task.status()
        } else {
            derive_task_status(&remaining)
        };

        if !self.store.delete_subtask(id, subtask_id).await? {
            // deleted by someone else between the fetch and the delete
            let fresh = self.store.fetch_task(id).await?;
            return Err(self.reject(CompletionError::NotFound { task_id: id, subtask_id }, fresh));
        }
        self.store.persist_task_status(id, status).await?;
        tracing::debug!(
            task_id = %id,
            subtask_id = %subtask_id,
            remaining = remaining.len(),
            status = %status,
            "Removed subtask"
        );
        self.get(id).await
    }

    /// Toggle a subtask between open and completed.
    pub async fn toggle_subtask(
        &self,
        id: TaskId,
        subtask_id: SubtaskId,
    ) -> Result<Task, BoardError> {
        let task = self.store.fetch_task(id).await?;
        let outcome = match toggle_subtask(&task, subtask_id) {
            Ok(outcome) => outcome,
            Err(reason) => return Err(self.reject(reason, task)),
        };

        self.store
            .persist_subtask_status(outcome.subtask_id, outcome.subtask_status)
            .await?;
        self.store.persist_task_status(id, outcome.task_status).await?;
        tracing::debug!(
            task_id = %id,
            subtask_id = %subtask_id,
            subtask_status = %outcome.subtask_status,
            task_status = %outcome.task_status,
            "Toggled subtask"
        );
        self.get(id).await
    }

    /// Set the status of a task without subtasks.
    pub async fn set_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, BoardError> {
        let task = self.store.fetch_task(id).await?;
        let updated = match set_manual_status(&task, status) {
            Ok(updated) => updated,
            Err(reason) => return Err(self.reject(reason, task)),
        };

        self.store.persist_task_status(id, updated.status()).await?;
        tracing::debug!(task_id = %id, status = %status, "Set task status");
        self.get(id).await
    }

    /// Follow changes to one task.
    pub fn subscribe(&self, id: TaskId) -> TaskSubscription {
        self.store.subscribe(id)
    }

    /// Log an engine rejection and wrap it with the task it was checked against.
    ///
    /// `task` was fetched by the rejected call itself, so for `NotFound` it is
    /// already the fresh state the caller's stale view should be replaced with.
    fn reject(&self, reason: CompletionError, task: Task) -> BoardError {
        match &reason {
            CompletionError::Locked {
                subtask_id,
                blocked_by,
            } => {
                tracing::debug!(
                    task_id = %task.id(),
                    subtask_id = %subtask_id,
                    blocked_by = %blocked_by,
                    "Ignoring toggle of locked subtask"
                );
            }
            CompletionError::NotFound {
                task_id,
                subtask_id,
            } => {
                tracing::warn!(
                    task_id = %task_id,
                    subtask_id = %subtask_id,
                    "Subtask not found, caller view is stale"
                );
            }
            CompletionError::NotApplicable { task_id } => {
                tracing::error!(
                    task_id = %task_id,
                    "Manual status set on a task with subtasks: {}",
                    reason
                );
            }
        }
        BoardError::Rejected {
            reason,
            task: Box::new(task),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::task_store::{ChangeKind, InMemoryTaskStore};
    use crate::task::SubtaskStatus;

    fn board() -> TaskBoard {
        TaskBoard::new(Arc::new(InMemoryTaskStore::new()))
    }

    async fn checklist(board: &TaskBoard, titles: &[&str]) -> Task {
        let mut new = NewTask::new("Release 1.4");
        new.subtasks = titles.iter().map(|t| NewSubtask::new(*t)).collect();
        board.create(new).await.expect("Failed to create task")
    }

    fn subtask_id(task: &Task, title: &str) -> SubtaskId {
        task.subtasks()
            .iter()
            .find(|s| s.title == title)
            .map(|s| s.id)
            .expect("no such subtask")
    }

    #[tokio::test]
    async fn test_create_assigns_sequential_order() {
        let board = board();
        let task = checklist(&board, &["Freeze", "Tag", "Publish"]).await;
        let order: Vec<i64> = task.subtasks().iter().map(|s| s.order_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(task.status(), TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_create_rejects_blank_titles() {
        let board = board();
        assert!(matches!(
            board.create(NewTask::new("   ")).await,
            Err(BoardError::Invalid(TaskError::EmptyTitle))
        ));

        let mut new = NewTask::new("Ok");
        new.subtasks.push(NewSubtask::new(""));
        assert!(matches!(board.create(new).await, Err(BoardError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_toggle_walks_the_sequence() {
        let board = board();
        let task = checklist(&board, &["Freeze", "Tag"]).await;
        let freeze = subtask_id(&task, "Freeze");
        let tag = subtask_id(&task, "Tag");

        let task = board.toggle_subtask(task.id(), freeze).await.unwrap();
        assert_eq!(task.status(), TaskStatus::InProgress);

        let task = board.toggle_subtask(task.id(), tag).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);

        // un-completing the first is always allowed
        let task = board.toggle_subtask(task.id(), freeze).await.unwrap();
        assert_eq!(task.status(), TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_locked_toggle_returns_unchanged_task() {
        let board = board();
        let task = checklist(&board, &["Freeze", "Tag"]).await;
        let tag = subtask_id(&task, "Tag");

        let err = board.toggle_subtask(task.id(), tag).await.unwrap_err();
        match err {
            BoardError::Rejected {
                reason: CompletionError::Locked { blocked_by, .. },
                task: current,
            } => {
                assert_eq!(blocked_by, subtask_id(&task, "Freeze"));
                assert!(current
                    .subtasks()
                    .iter()
                    .all(|s| s.status == SubtaskStatus::Open));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let stored = board.get(task.id()).await.unwrap();
        assert_eq!(stored.status(), TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_unknown_subtask_returns_fresh_task() {
        let board = board();
        let task = checklist(&board, &["Freeze"]).await;
        let err = board
            .toggle_subtask(task.id(), SubtaskId::new())
            .await
            .unwrap_err();
        assert!(matches!(
            &err,
            BoardError::Rejected {
                reason: CompletionError::NotFound { .. },
                ..
            }
        ));
        assert_eq!(err.current_task().map(Task::id), Some(task.id()));
    }

    #[tokio::test]
    async fn test_set_status_only_for_manual_tasks() {
        let board = board();
        let manual = board.create(NewTask::new("Book venue")).await.unwrap();
        let manual = board
            .set_status(manual.id(), TaskStatus::Completed)
            .await
            .unwrap();
        assert_eq!(manual.status(), TaskStatus::Completed);

        let derived = checklist(&board, &["Freeze"]).await;
        assert!(matches!(
            board.set_status(derived.id(), TaskStatus::Completed).await,
            Err(BoardError::Rejected {
                reason: CompletionError::NotApplicable { .. },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_add_subtask_appends_and_rederives() {
        let board = board();
        let task = checklist(&board, &["Freeze"]).await;
        let task = board
            .toggle_subtask(task.id(), subtask_id(&task, "Freeze"))
            .await
            .unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);

        let task = board
            .add_subtask(task.id(), NewSubtask::new("Announce"))
            .await
            .unwrap();
        let announce = task
            .subtasks()
            .iter()
            .find(|s| s.title == "Announce")
            .unwrap();
        assert_eq!(announce.order_index, 1);
        assert_eq!(task.status(), TaskStatus::InProgress);
        assert_eq!(task.to_row().status, TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_removing_last_subtask_keeps_status() {
        let board = board();
        let task = checklist(&board, &["Freeze"]).await;
        let freeze = subtask_id(&task, "Freeze");
        board.toggle_subtask(task.id(), freeze).await.unwrap();

        let task = board.remove_subtask(task.id(), freeze).await.unwrap();
        assert!(!task.has_subtasks());
        assert_eq!(task.status(), TaskStatus::Completed);

        // now manual again
        let task = board.set_status(task.id(), TaskStatus::Open).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Open);
    }

    #[tokio::test]
    async fn test_remove_blocking_subtask_unlocks_next() {
        let board = board();
        let task = checklist(&board, &["Freeze", "Tag"]).await;
        let task = board
            .remove_subtask(task.id(), subtask_id(&task, "Freeze"))
            .await
            .unwrap();
        let tag = subtask_id(&task, "Tag");
        let task = board.toggle_subtask(task.id(), tag).await.unwrap();
        assert_eq!(task.status(), TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_update_details_and_delete() {
        let board = board();
        let task = board.create(NewTask::new("Draft")).await.unwrap();
        let patch = TaskPatch {
            title: Some("  Final ".to_string()),
            priority: Some(Some(Priority::Low)),
            due_date: Some(NaiveDate::from_ymd_opt(2026, 11, 2)),
        };
        let task = board.update_details(task.id(), patch).await.unwrap();
        assert_eq!(task.title(), "Final");
        assert_eq!(task.effective_priority(), Priority::Low);

        board.delete(task.id()).await.unwrap();
        assert!(matches!(
            board.delete(task.id()).await,
            Err(BoardError::Store(StoreError::TaskNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_toggle_publishes_changes() {
        let board = board();
        let task = checklist(&board, &["Freeze"]).await;
        let mut sub = board.subscribe(task.id());

        board
            .toggle_subtask(task.id(), subtask_id(&task, "Freeze"))
            .await
            .unwrap();

        assert_eq!(sub.recv().await.unwrap().kind, ChangeKind::SubtaskStatus);
        assert_eq!(sub.recv().await.unwrap().kind, ChangeKind::Status);
    }
}
