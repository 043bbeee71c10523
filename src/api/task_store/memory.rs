//! In-memory task store (non-persistent).

use super::{ChangeFeed, ChangeKind, StoreError, TaskChange, TaskPatch, TaskStore};
use crate::task::{Subtask, SubtaskId, SubtaskStatus, Task, TaskId, TaskRow, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct Entry {
    row: TaskRow,
    /// Insertion order; sorted by `order_index` on read
    subtasks: Vec<Subtask>,
}

impl Entry {
    fn to_task(&self) -> Task {
        let mut subtasks = self.subtasks.clone();
        subtasks.sort_by_key(|s| s.order_index);
        Task::from_row(self.row.clone(), subtasks)
    }
}

#[derive(Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<RwLock<HashMap<TaskId, Entry>>>,
    changes: ChangeFeed,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_feed(ChangeFeed::default())
    }

    pub fn with_feed(changes: ChangeFeed) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            changes,
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    fn is_persistent(&self) -> bool {
        false
    }

    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    async fn list_tasks(&self, limit: usize, offset: usize) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.read().await;
        let mut entries: Vec<&Entry> = tasks.values().collect();
        entries.sort_by(|a, b| b.row.created_at.cmp(&a.row.created_at));
        Ok(entries
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(Entry::to_task)
            .collect())
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Task, StoreError> {
        self.tasks
            .read()
            .await
            .get(&id)
            .map(Entry::to_task)
            .ok_or(StoreError::TaskNotFound(id))
    }

    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let entry = Entry {
            row: task.to_row(),
            subtasks: task.subtasks().to_vec(),
        };
        self.tasks.write().await.insert(task.id(), entry);
        self.changes
            .publish(TaskChange::new(task.id(), ChangeKind::Created));
        Ok(())
    }

    async fn update_task_details(&self, id: TaskId, patch: &TaskPatch) -> Result<(), StoreError> {
        {
            let mut tasks = self.tasks.write().await;
            let entry = tasks.get_mut(&id).ok_or(StoreError::TaskNotFound(id))?;
            if let Some(title) = &patch.title {
                entry.row.title = title.clone();
            }
            if let Some(priority) = patch.priority {
                entry.row.priority = priority;
            }
            if let Some(due_date) = patch.due_date {
                entry.row.due_date = due_date;
            }
            entry.row.updated_at = Utc::now();
        }
        self.changes.publish(TaskChange::new(id, ChangeKind::Updated));
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError> {
        let removed = self.tasks.write().await.remove(&id).is_some();
        if removed {
            self.changes.publish(TaskChange::new(id, ChangeKind::Deleted));
        }
        Ok(removed)
    }

    async fn add_subtask(&self, subtask: &Subtask) -> Result<(), StoreError> {
        {
            let mut tasks = self.tasks.write().await;
            let entry = tasks
                .get_mut(&subtask.task_id)
                .ok_or(StoreError::TaskNotFound(subtask.task_id))?;
            entry.subtasks.push(subtask.clone());
            entry.row.updated_at = Utc::now();
        }
        self.changes.publish(TaskChange::for_subtask(
            subtask.task_id,
            subtask.id,
            ChangeKind::SubtaskAdded,
        ));
        Ok(())
    }

    async fn delete_subtask(
        &self,
        task_id: TaskId,
        subtask_id: SubtaskId,
    ) -> Result<bool, StoreError> {
        let removed = {
            let mut tasks = self.tasks.write().await;
            let entry = tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
            let before = entry.subtasks.len();
            entry.subtasks.retain(|s| s.id != subtask_id);
            let removed = entry.subtasks.len() != before;
            if removed {
                entry.row.updated_at = Utc::now();
            }
            removed
        };
        if removed {
            self.changes.publish(TaskChange::for_subtask(
                task_id,
                subtask_id,
                ChangeKind::SubtaskRemoved,
            ));
        }
        Ok(removed)
    }

    async fn persist_subtask_status(
        &self,
        subtask_id: SubtaskId,
        status: SubtaskStatus,
    ) -> Result<(), StoreError> {
        let task_id = {
            let mut tasks = self.tasks.write().await;
            let entry = tasks
                .values_mut()
                .find(|e| e.subtasks.iter().any(|s| s.id == subtask_id))
                .ok_or(StoreError::SubtaskNotFound(subtask_id))?;
            if let Some(subtask) = entry.subtasks.iter_mut().find(|s| s.id == subtask_id) {
                subtask.status = status;
            }
            entry.row.updated_at = Utc::now();
            entry.row.id
        };
        self.changes.publish(TaskChange::for_subtask(
            task_id,
            subtask_id,
            ChangeKind::SubtaskStatus,
        ));
        Ok(())
    }

    async fn persist_task_status(
        &self,
        task_id: TaskId,
        status: TaskStatus,
    ) -> Result<(), StoreError> {
        {
            let mut tasks = self.tasks.write().await;
            let entry = tasks.get_mut(&task_id).ok_or(StoreError::TaskNotFound(task_id))?;
            entry.row.status = status;
            entry.row.updated_at = Utc::now();
        }
        self.changes.publish(TaskChange::new(task_id, ChangeKind::Status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    async fn seeded() -> (InMemoryTaskStore, Task) {
        let store = InMemoryTaskStore::new();
        let task = Task::new("Launch").expect("Failed to build task");
        let subtasks = vec![
            Subtask::new(task.id(), "Second", 1).unwrap(),
            Subtask::new(task.id(), "First", 0).unwrap(),
        ];
        let task = task.with_subtasks(subtasks);
        store.create_task(&task).await.expect("Failed to create task");
        (store, task)
    }

    #[tokio::test]
    async fn test_fetch_returns_subtasks_in_order() {
        let (store, task) = seeded().await;
        let fetched = store.fetch_task(task.id()).await.expect("Failed to fetch");
        let titles: Vec<&str> = fetched.subtasks().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
    }

    #[tokio::test]
    async fn test_missing_task_is_not_found() {
        let store = InMemoryTaskStore::new();
        let id = TaskId::new();
        assert!(matches!(
            store.fetch_task(id).await,
            Err(StoreError::TaskNotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn test_persist_subtask_status_notifies() {
        let (store, task) = seeded().await;
        let mut sub = store.subscribe(task.id());
        let target = task.subtasks()[1].id;

        store
            .persist_subtask_status(target, SubtaskStatus::Completed)
            .await
            .expect("Failed to persist");

        let change = sub.recv().await.unwrap();
        assert_eq!(change.kind, ChangeKind::SubtaskStatus);
        assert_eq!(change.subtask_id, Some(target));

        let fetched = store.fetch_task(task.id()).await.unwrap();
        assert_eq!(fetched.status(), TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_delete_task_cascades() {
        let (store, task) = seeded().await;
        let subtask_id = task.subtasks()[0].id;
        assert!(store.delete_task(task.id()).await.unwrap());
        assert!(!store.delete_task(task.id()).await.unwrap());
        assert!(matches!(
            store
                .persist_subtask_status(subtask_id, SubtaskStatus::Completed)
                .await,
            Err(StoreError::SubtaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_update_details_and_list() {
        let (store, task) = seeded().await;
        let other = Task::new("Later").unwrap();
        store.create_task(&other).await.unwrap();

        let patch = TaskPatch {
            title: Some("Launch v2".to_string()),
            priority: Some(Some(Priority::High)),
            due_date: None,
        };
        store.update_task_details(task.id(), &patch).await.unwrap();

        let fetched = store.fetch_task(task.id()).await.unwrap();
        assert_eq!(fetched.title(), "Launch v2");
        assert_eq!(fetched.priority(), Some(Priority::High));

        let listed = store.list_tasks(10, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(store.list_tasks(10, 1).await.unwrap().len(), 1);
    }
}
