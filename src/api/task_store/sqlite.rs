//! SQLite-based task store.

use super::{ChangeFeed, ChangeKind, StoreError, TaskChange, TaskPatch, TaskStore};
use crate::task::{
    Priority, Subtask, SubtaskId, SubtaskStatus, Task, TaskId, TaskRow, TaskStatus,
};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    priority TEXT,
    due_date TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC);

CREATE TABLE IF NOT EXISTS subtasks (
    id TEXT PRIMARY KEY NOT NULL,
    task_id TEXT NOT NULL,
    title TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'open',
    order_index INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (task_id) REFERENCES tasks(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_subtasks_task ON subtasks(task_id, order_index);
"#;

const DB_FILE: &str = "taskboard.db";

pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
    changes: ChangeFeed,
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Backend(format!("Task join error: {}", e))
    }
}

/// Task columns as stored, before decoding.
struct RawTask {
    id: String,
    title: String,
    status: String,
    priority: Option<String>,
    due_date: Option<String>,
    created_at: String,
    updated_at: String,
}

/// Subtask columns as stored, before decoding.
struct RawSubtask {
    id: String,
    task_id: String,
    title: String,
    status: String,
    order_index: i64,
    created_at: String,
}

const TASK_COLUMNS: &str = "id, title, status, priority, due_date, created_at, updated_at";

fn raw_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawTask> {
    Ok(RawTask {
        id: row.get(0)?,
        title: row.get(1)?,
        status: row.get(2)?,
        priority: row.get(3)?,
        due_date: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn parse_uuid(value: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(value).map_err(|e| StoreError::Corrupt(format!("bad id {}: {}", value, e)))
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {}: {}", value, e)))
}

fn parse_date(value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| StoreError::Corrupt(format!("bad date {}: {}", value, e)))
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

impl RawTask {
    fn decode(self) -> Result<TaskRow, StoreError> {
        Ok(TaskRow {
            id: TaskId::from_uuid(parse_uuid(&self.id)?),
            title: self.title,
            status: self.status.parse()?,
            priority: self.priority.as_deref().map(str::parse::<Priority>).transpose()?,
            due_date: self.due_date.as_deref().map(parse_date).transpose()?,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

impl RawSubtask {
    fn decode(self) -> Result<Subtask, StoreError> {
        Ok(Subtask {
            id: SubtaskId::from_uuid(parse_uuid(&self.id)?),
            task_id: TaskId::from_uuid(parse_uuid(&self.task_id)?),
            title: self.title,
            status: self.status.parse()?,
            order_index: self.order_index,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

impl SqliteTaskStore {
    pub async fn new(base_dir: PathBuf, changes: ChangeFeed) -> Result<Self, StoreError> {
        let db_path = base_dir.join(DB_FILE);

        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to create task store dir: {}", e)))?;

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            tracing::debug!(path = %db_path.display(), "Opened SQLite task store");
            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            changes,
        })
    }

    fn load_subtasks(conn: &Connection, task_id: &str) -> Result<Vec<Subtask>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, task_id, title, status, order_index, created_at
             FROM subtasks
             WHERE task_id = ?1
             ORDER BY order_index ASC, created_at ASC, rowid ASC",
        )?;
        let raw = stmt
            .query_map(params![task_id], |row| {
                Ok(RawSubtask {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    title: row.get(2)?,
                    status: row.get(3)?,
                    order_index: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawSubtask::decode).collect()
    }

    fn load_task(conn: &Connection, raw: RawTask) -> Result<Task, StoreError> {
        let subtasks = Self::load_subtasks(conn, &raw.id)?;
        Ok(Task::from_row(raw.decode()?, subtasks))
    }

    fn insert_subtask(conn: &Connection, subtask: &Subtask) -> Result<(), StoreError> {
        conn.execute(
            "INSERT INTO subtasks (id, task_id, title, status, order_index, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                subtask.id.to_string(),
                subtask.task_id.to_string(),
                subtask.title,
                subtask.status.as_str(),
                subtask.order_index,
                subtask.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn touch(conn: &Connection, task_id: &str) -> Result<usize, StoreError> {
        Ok(conn.execute(
            "UPDATE tasks SET updated_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), task_id],
        )?)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    fn is_persistent(&self) -> bool {
        true
    }

    fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    async fn list_tasks(&self, limit: usize, offset: usize) -> Result<Vec<Task>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Task>, StoreError> {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM tasks
                 ORDER BY created_at DESC
                 LIMIT ?1 OFFSET ?2"
            ))?;
            let raw = stmt
                .query_map(params![limit as i64, offset as i64], raw_task)?
                .collect::<Result<Vec<_>, _>>()?;
            raw.into_iter()
                .map(|r| Self::load_task(&conn, r))
                .collect()
        })
        .await?
    }

    async fn fetch_task(&self, id: TaskId) -> Result<Task, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<Task, StoreError> {
            let conn = conn.blocking_lock();
            let raw = conn
                .query_row(
                    &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
                    params![id.to_string()],
                    raw_task,
                )
                .optional()?
                .ok_or(StoreError::TaskNotFound(id))?;
            Self::load_task(&conn, raw)
        })
        .await?
    }

    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let row = task.to_row();
        let subtasks = task.subtasks().to_vec();
        let id = task.id();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO tasks (id, title, status, priority, due_date, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    row.id.to_string(),
                    row.title,
                    row.status.as_str(),
                    row.priority.map(Priority::as_str),
                    row.due_date.map(format_date),
                    row.created_at.to_rfc3339(),
                    row.updated_at.to_rfc3339(),
                ],
            )?;
            for subtask in &subtasks {
                Self::insert_subtask(&tx, subtask)?;
            }
            tx.commit()?;
            Ok::<_, StoreError>(())
        })
        .await??;

        self.changes.publish(TaskChange::new(id, ChangeKind::Created));
        Ok(())
    }

    async fn update_task_details(&self, id: TaskId, patch: &TaskPatch) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let patch = patch.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = conn.blocking_lock();
            let id_str = id.to_string();
            if Self::touch(&conn, &id_str)? == 0 {
                return Err(StoreError::TaskNotFound(id));
            }
            if let Some(title) = &patch.title {
                conn.execute(
                    "UPDATE tasks SET title = ?1 WHERE id = ?2",
                    params![title, id_str],
                )?;
            }
            if let Some(priority) = patch.priority {
                conn.execute(
                    "UPDATE tasks SET priority = ?1 WHERE id = ?2",
                    params![priority.map(Priority::as_str), id_str],
                )?;
            }
            if let Some(due_date) = patch.due_date {
                conn.execute(
                    "UPDATE tasks SET due_date = ?1 WHERE id = ?2",
                    params![due_date.map(format_date), id_str],
                )?;
            }
            Ok(())
        })
        .await??;

        self.changes.publish(TaskChange::new(id, ChangeKind::Updated));
        Ok(())
    }

    async fn delete_task(&self, id: TaskId) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        let deleted = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let rows = conn.execute("DELETE FROM tasks WHERE id = ?1", params![id.to_string()])?;
            Ok::<_, StoreError>(rows > 0)
        })
        .await??;

        if deleted {
            self.changes.publish(TaskChange::new(id, ChangeKind::Deleted));
        }
        Ok(deleted)
    }

    async fn add_subtask(&self, subtask: &Subtask) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let owned = subtask.clone();

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = conn.blocking_lock();
            if Self::touch(&conn, &owned.task_id.to_string())? == 0 {
                return Err(StoreError::TaskNotFound(owned.task_id));
            }
            Self::insert_subtask(&conn, &owned)
        })
        .await??;

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
        let conn = self.conn.clone();
        let deleted = tokio::task::spawn_blocking(move || -> Result<bool, StoreError> {
            let conn = conn.blocking_lock();
            let task_str = task_id.to_string();
            if Self::touch(&conn, &task_str)? == 0 {
                return Err(StoreError::TaskNotFound(task_id));
            }
            let rows = conn.execute(
                "DELETE FROM subtasks WHERE id = ?1 AND task_id = ?2",
                params![subtask_id.to_string(), task_str],
            )?;
            Ok(rows > 0)
        })
        .await??;

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
        let conn = self.conn.clone();
        let task_id = tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let id_str = subtask_id.to_string();
            let task_id: Option<String> = conn
                .query_row(
                    "SELECT task_id FROM subtasks WHERE id = ?1",
                    params![id_str],
                    |row| row.get(0),
                )
                .optional()?;
            let task_id = task_id.ok_or(StoreError::SubtaskNotFound(subtask_id))?;

            conn.execute(
                "UPDATE subtasks SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id_str],
            )?;
            Self::touch(&conn, &task_id)?;
            Ok::<_, StoreError>(TaskId::from_uuid(parse_uuid(&task_id)?))
        })
        .await??;

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
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let conn = conn.blocking_lock();
            let rows = conn.execute(
                "UPDATE tasks SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), task_id.to_string()],
            )?;
            if rows == 0 {
                return Err(StoreError::TaskNotFound(task_id));
            }
            Ok(())
        })
        .await??;

        self.changes.publish(TaskChange::new(task_id, ChangeKind::Status));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteTaskStore {
        SqliteTaskStore::new(dir.path().to_path_buf(), ChangeFeed::default())
            .await
            .expect("Failed to open store")
    }

    fn sample_task() -> Task {
        let task = Task::new("Quarterly planning")
            .unwrap()
            .with_priority(Some(Priority::Low))
            .with_due_date(NaiveDate::from_ymd_opt(2026, 11, 2));
        let subtasks = vec![
            Subtask::new(task.id(), "Collect input", 0).unwrap(),
            Subtask::new(task.id(), "Draft", 1).unwrap(),
            Subtask::new(task.id(), "Review", 1).unwrap(),
        ];
        task.with_subtasks(subtasks)
    }

    #[tokio::test]
    async fn test_create_and_fetch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let task = sample_task();

        store.create_task(&task).await.expect("Failed to create task");
        let fetched = store.fetch_task(task.id()).await.expect("Failed to fetch task");

        assert_eq!(fetched.title(), "Quarterly planning");
        assert_eq!(fetched.priority(), Some(Priority::Low));
        assert_eq!(fetched.due_date(), NaiveDate::from_ymd_opt(2026, 11, 2));
        let titles: Vec<&str> = fetched.subtasks().iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["Collect input", "Draft", "Review"]);
    }

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let task = sample_task();
        {
            let store = open_store(&dir).await;
            store.create_task(&task).await.unwrap();
            store
                .persist_subtask_status(task.subtasks()[0].id, SubtaskStatus::Completed)
                .await
                .unwrap();
        }

        let store = open_store(&dir).await;
        assert!(store.is_persistent());
        let fetched = store.fetch_task(task.id()).await.unwrap();
        assert!(fetched.subtasks()[0].is_completed());
        assert_eq!(fetched.status(), TaskStatus::InProgress);
    }

    #[tokio::test]
    async fn test_delete_cascades_to_subtasks() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let task = sample_task();
        store.create_task(&task).await.unwrap();

        assert!(store.delete_task(task.id()).await.unwrap());
        let orphan = store
            .persist_subtask_status(task.subtasks()[0].id, SubtaskStatus::Completed)
            .await;
        assert!(matches!(orphan, Err(StoreError::SubtaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_manual_status_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let task = Task::new("Call vendor").unwrap();
        store.create_task(&task).await.unwrap();

        store
            .persist_task_status(task.id(), TaskStatus::Completed)
            .await
            .unwrap();
        let fetched = store.fetch_task(task.id()).await.unwrap();
        assert_eq!(fetched.status(), TaskStatus::Completed);

        let missing = store
            .persist_task_status(TaskId::new(), TaskStatus::Open)
            .await;
        assert!(matches!(missing, Err(StoreError::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_subtask_add_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let task = Task::new("Onboarding").unwrap();
        store.create_task(&task).await.unwrap();

        let subtask = Subtask::new(task.id(), "Laptop", 0).unwrap();
        store.add_subtask(&subtask).await.unwrap();
        assert!(store.fetch_task(task.id()).await.unwrap().has_subtasks());

        assert!(store.delete_subtask(task.id(), subtask.id).await.unwrap());
        assert!(!store.delete_subtask(task.id(), subtask.id).await.unwrap());
        assert!(!store.fetch_task(task.id()).await.unwrap().has_subtasks());
    }

    #[tokio::test]
    async fn test_update_details_clears_due_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        let task = sample_task();
        store.create_task(&task).await.unwrap();

        let patch = TaskPatch {
            title: Some("Q1 planning".to_string()),
            priority: None,
            due_date: Some(None),
        };
        store.update_task_details(task.id(), &patch).await.unwrap();

        let fetched = store.fetch_task(task.id()).await.unwrap();
        assert_eq!(fetched.title(), "Q1 planning");
        assert_eq!(fetched.priority(), Some(Priority::Low));
        assert_eq!(fetched.due_date(), None);
    }
}
