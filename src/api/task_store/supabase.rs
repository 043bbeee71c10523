//! Supabase (PostgREST) task store.
//!
//! Expects two tables, `tasks` and `subtasks`, whose columns match
//! [`TaskRow`] and [`Subtask`], with `subtasks.task_id` referencing
//! `tasks.id ON DELETE CASCADE`. Row-level security is the backend's concern.
//!
//! `subtasks` also needs an insertion sequence column,
//! `seq bigint generated always as identity`. Subtasks created in one batch
//! often share a `created_at` microsecond, so `seq` is the last ordering key
//! and keeps equal `order_index` values in creation order. Inserts never
//! send it and reads ignore it.
//!
//! Realtime notifications from the hosted platform are not consumed; the
//! change feed only reports writes made through this store.

use super::{ChangeFeed, ChangeKind, StoreError, TaskChange, TaskPatch, TaskStore};
use crate::task::{Subtask, SubtaskId, SubtaskStatus, Task, TaskId, TaskRow, TaskStatus};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

/// A `tasks` row with its embedded `subtasks`.
#[derive(Debug, Deserialize)]
struct DbTask {
    #[serde(flatten)]
    row: TaskRow,
    #[serde(default)]
    subtasks: Vec<Subtask>,
}

impl DbTask {
    fn into_task(self) -> Task {
        Task::from_row(self.row, self.subtasks)
    }
}

const TASK_SELECT: &str =
    "select=*,subtasks(*)&subtasks.order=order_index.asc,created_at.asc,seq.asc";

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

/// Supabase client for the task tables.
pub struct SupabaseTaskStore {
    client: Client,
    url: String,
    service_role_key: String,
    changes: ChangeFeed,
}

impl SupabaseTaskStore {
    /// Create a new Supabase-backed store.
    pub fn new(url: &str, service_role_key: &str, changes: ChangeFeed) -> Self {
        Self {
            client: Client::new(),
            url: url.trim_end_matches('/').to_string(),
            service_role_key: service_role_key.to_string(),
            changes,
        }
    }

    /// Get the PostgREST URL.
    fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_role_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
    }

    /// Turn a non-success response into a store error.
    async fn check(resp: Response, action: &str) -> Result<Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        if status == StatusCode::CONFLICT || status == StatusCode::PRECONDITION_FAILED {
            Err(StoreError::Conflict(format!("{}: {}", action, text)))
        } else {
            Err(StoreError::Backend(format!(
                "Failed to {}: {} - {}",
                action, status, text
            )))
        }
    }

    /// PATCH rows matching `filter` and return the updated rows.
    async fn patch_rows<T: for<'de> Deserialize<'de>>(
        &self,
        table: &str,
        filter: &str,
        body: serde_json::Value,
        action: &str,
    ) -> Result<Vec<T>, StoreError> {
        let resp = self
            .authed(
                self.client
                    .patch(format!("{}/{}?{}", self.rest_url(), table, filter)),
            )
            .header("Content-Type", "application/json")
            .header("Prefer", "return=representation")
            .json(&body)
            .send()
            .await?;
        let text = Self::check(resp, action).await?.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn delete_rows(&self, table: &str, filter: &str, action: &str) -> Result<bool, StoreError> {
        let resp = self
            .authed(
                self.client
                    .delete(format!("{}/{}?{}", self.rest_url(), table, filter)),
            )
            .header("Prefer", "return=representation")
            .send()
            .await?;
        let text = Self::check(resp, action).await?.text().await?;
        let deleted: Vec<serde_json::Value> = serde_json::from_str(&text)?;
        Ok(!deleted.is_empty())
    }

    async fn insert_subtasks(&self, subtasks: &[Subtask]) -> Result<(), StoreError> {
        if subtasks.is_empty() {
            return Ok(());
        }
        let resp = self
            .authed(self.client.post(format!("{}/subtasks", self.rest_url())))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(subtasks)
            .send()
            .await?;
        Self::check(resp, "insert subtasks").await?;
        Ok(())
    }

    async fn touch(&self, task_id: TaskId) -> Result<(), StoreError> {
        let rows: Vec<serde_json::Value> = self
            .patch_rows(
                "tasks",
                &format!("id=eq.{}", task_id),
                serde_json::json!({ "updated_at": Utc::now() }),
                "touch task",
            )
            .await?;
        if rows.is_empty() {
            return Err(StoreError::TaskNotFound(task_id));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for SupabaseTaskStore {
    fn is_persistent(&self) -> bool {
        true
    }

    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    async fn list_tasks(&self, limit: usize, offset: usize) -> Result<Vec<Task>, StoreError> {
        let resp = self
            .authed(self.client.get(format!(
                "{}/tasks?{}&order=created_at.desc&limit={}&offset={}",
                self.rest_url(),
                TASK_SELECT,
                limit,
                offset
            )))
            .send()
            .await?;
        let text = Self::check(resp, "list tasks").await?.text().await?;
        let rows: Vec<DbTask> = serde_json::from_str(&text)?;
        Ok(rows.into_iter().map(DbTask::into_task).collect())
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Task, StoreError> {
        let resp = self
            .authed(self.client.get(format!(
                "{}/tasks?id=eq.{}&{}",
                self.rest_url(),
                id,
                TASK_SELECT
            )))
            .send()
            .await?;
        let text = Self::check(resp, "fetch task").await?.text().await?;
        let rows: Vec<DbTask> = serde_json::from_str(&text)?;
        rows.into_iter()
            .next()
            .map(DbTask::into_task)
            .ok_or(StoreError::TaskNotFound(id))
    }

    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let resp = self
            .authed(self.client.post(format!("{}/tasks", self.rest_url())))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(&task.to_row())
            .send()
            .await?;
        Self::check(resp, "create task").await?;

        // PostgREST has no multi-table transaction; a failure here leaves an
        // empty task behind, which the caller sees on its re-fetch.
        self.insert_subtasks(task.subtasks()).await?;

        self.changes
            .publish(TaskChange::new(task.id(), ChangeKind::Created));
        Ok(())
    }

    async fn update_task_details(&self, id: TaskId, patch: &TaskPatch) -> Result<(), StoreError> {
        let mut body = serde_json::Map::new();
        if let Some(title) = &patch.title {
            body.insert("title".to_string(), serde_json::json!(title));
        }
        if let Some(priority) = patch.priority {
            body.insert("priority".to_string(), serde_json::json!(priority));
        }
        if let Some(due_date) = patch.due_date {
            body.insert("due_date".to_string(), serde_json::json!(due_date));
        }
        body.insert("updated_at".to_string(), serde_json::json!(Utc::now()));

        let rows: Vec<serde_json::Value> = self
            .patch_rows(
                "tasks",
                &format!("id=eq.{}", id),
                serde_json::Value::Object(body),
                "update task",
            )
            .await?;
        if rows.is_empty() {
            return Err(StoreError::TaskNotFound(id));
        }

        self.changes.publish(TaskChange::new(id, ChangeKind::Updated));
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError> {
        let deleted = self
            .delete_rows("tasks", &format!("id=eq.{}", id), "delete task")
            .await?;
        if deleted {
            self.changes.publish(TaskChange::new(id, ChangeKind::Deleted));
        }
        Ok(deleted)
    }

    async fn add_subtask(&self, subtask: &Subtask) -> Result<(), StoreError> {
        self.touch(subtask.task_id).await?;
        self.insert_subtasks(std::slice::from_ref(subtask)).await?;
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
        self.touch(task_id).await?;
        let deleted = self
            .delete_rows(
                "subtasks",
                &format!("id=eq.{}&task_id=eq.{}", subtask_id, task_id),
                "delete subtask",
            )
            .await?;
        if deleted {
            self.changes.publish(TaskChange::for_subtask(
                task_id,
                subtask_id,
                ChangeKind::SubtaskRemoved,
            ));
        }
        Ok(deleted)
    }

    async fn persist_subtask_status(
        &self,
        subtask_id: SubtaskId,
        status: SubtaskStatus,
    ) -> Result<(), StoreError> {
        let rows: Vec<Subtask> = self
            .patch_rows(
                "subtasks",
                &format!("id=eq.{}", subtask_id),
                serde_json::json!({ "status": status }),
                "update subtask status",
            )
            .await?;
        let task_id = rows
            .first()
            .map(|s| s.task_id)
            .ok_or(StoreError::SubtaskNotFound(subtask_id))?;
        self.touch(task_id).await?;

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
        let rows: Vec<serde_json::Value> = self
            .patch_rows(
                "tasks",
                &format!("id=eq.{}", task_id),
                serde_json::json!({ "status": status, "updated_at": Utc::now() }),
                "update task status",
            )
            .await?;
        if rows.is_empty() {
            return Err(StoreError::TaskNotFound(task_id));
        }

        self.changes.publish(TaskChange::new(task_id, ChangeKind::Status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Priority;

    #[test]
    fn test_rest_url_trims_trailing_slash() {
        let store = SupabaseTaskStore::new("https://demo.supabase.co/", "key", ChangeFeed::default());
        assert_eq!(store.rest_url(), "https://demo.supabase.co/rest/v1");
    }

    #[test]
    fn test_decode_embedded_task() {
        let json = r#"[{
            "id": "6f1c2a0e-0000-4000-8000-000000000001",
            "title": "Prepare demo",
            "status": "open",
            "priority": "high",
            "due_date": "2026-10-30",
            "created_at": "2026-10-19T08:00:00.123456+00:00",
            "updated_at": "2026-10-19T08:05:00+00:00",
            "subtasks": [
                {
                    "id": "6f1c2a0e-0000-4000-8000-0000000000a1",
                    "task_id": "6f1c2a0e-0000-4000-8000-000000000001",
                    "title": "Slides",
                    "status": "completed",
                    "order_index": 0,
                    "created_at": "2026-10-19T08:01:00+00:00"
                },
                {
                    "id": "6f1c2a0e-0000-4000-8000-0000000000a2",
                    "task_id": "6f1c2a0e-0000-4000-8000-000000000001",
                    "title": "Dry run",
                    "status": "open",
                    "order_index": 1,
                    "created_at": "2026-10-19T08:02:00+00:00"
                }
            ]
        }]"#;

        let rows: Vec<DbTask> = serde_json::from_str(json).unwrap();
        let task = rows.into_iter().next().unwrap().into_task();

        assert_eq!(task.title(), "Prepare demo");
        assert_eq!(task.priority(), Some(Priority::High));
        assert_eq!(task.subtasks().len(), 2);
        // stored status is stale; the derived one wins
        assert_eq!(task.status(), TaskStatus::InProgress);
    }

    #[test]
    fn test_subtask_order_ends_with_insertion_sequence() {
        let order = TASK_SELECT
            .split('&')
            .find_map(|part| part.strip_prefix("subtasks.order="))
            .unwrap();
        assert_eq!(order, "order_index.asc,created_at.asc,seq.asc");
    }

    #[test]
    fn test_tied_subtasks_keep_returned_order() {
        let json = r#"{
            "id": "6f1c2a0e-0000-4000-8000-000000000004",
            "title": "Launch",
            "status": "open",
            "priority": null,
            "due_date": null,
            "created_at": "2026-10-19T08:00:00+00:00",
            "updated_at": "2026-10-19T08:00:00+00:00",
            "subtasks": [
                {
                    "id": "6f1c2a0e-0000-4000-8000-0000000000b1",
                    "task_id": "6f1c2a0e-0000-4000-8000-000000000004",
                    "title": "Draft",
                    "status": "open",
                    "order_index": 1,
                    "created_at": "2026-10-19T08:01:00.000001+00:00",
                    "seq": 7
                },
                {
                    "id": "6f1c2a0e-0000-4000-8000-0000000000b2",
                    "task_id": "6f1c2a0e-0000-4000-8000-000000000004",
                    "title": "Review",
                    "status": "open",
                    "order_index": 1,
                    "created_at": "2026-10-19T08:01:00.000001+00:00",
                    "seq": 8
                }
            ]
        }"#;
        let task = serde_json::from_str::<DbTask>(json).unwrap().into_task();
        let sequence = crate::task::SubtaskSequence::new(task.subtasks());
        let titles: Vec<&str> = sequence.ordered().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Draft", "Review"]);
        assert!(sequence.is_enabled(task.subtasks()[0].id));
        assert!(!sequence.is_enabled(task.subtasks()[1].id));
    }

    #[test]
    fn test_decode_task_without_subtasks() {
        let json = r#"{
            "id": "6f1c2a0e-0000-4000-8000-000000000002",
            "title": "Book room",
            "status": "completed",
            "priority": null,
            "due_date": null,
            "created_at": "2026-10-19T08:00:00+00:00",
            "updated_at": "2026-10-19T08:00:00+00:00",
            "subtasks": []
        }"#;
        let task = serde_json::from_str::<DbTask>(json).unwrap().into_task();
        assert!(!task.has_subtasks());
        assert_eq!(task.status(), TaskStatus::Completed);
    }
}
