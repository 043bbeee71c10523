//! Change notifications for task records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::task::{SubtaskId, TaskId};

/// What happened to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    SubtaskAdded,
    SubtaskRemoved,
    SubtaskStatus,
    Status,
}

/// A single change notification. Carries no payload: subscribers re-fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskChange {
    pub task_id: TaskId,
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<SubtaskId>,
    pub at: DateTime<Utc>,
}

impl TaskChange {
    pub fn new(task_id: TaskId, kind: ChangeKind) -> Self {
        Self {
            task_id,
            kind,
            subtask_id: None,
            at: Utc::now(),
        }
    }

    pub fn for_subtask(task_id: TaskId, subtask_id: SubtaskId, kind: ChangeKind) -> Self {
        Self {
            subtask_id: Some(subtask_id),
            ..Self::new(task_id, kind)
        }
    }
}

/// Fan-out of task changes to any number of subscribers.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<TaskChange>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a change. Having no subscribers is not an error.
    pub fn publish(&self, change: TaskChange) {
        let _ = self.tx.send(change);
    }

    /// Subscribe to changes of a single task.
    pub fn subscribe(&self, task_id: TaskId) -> TaskSubscription {
        TaskSubscription {
            task_id,
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Changes for one task.
pub struct TaskSubscription {
    task_id: TaskId,
    rx: broadcast::Receiver<TaskChange>,
}

impl TaskSubscription {
    /// Wait for the next change to this task.
    ///
    /// Returns `None` once the feed is closed. Lagged events are dropped; a
    /// subscriber that lags should re-fetch on the next change it does see.
    pub async fn recv(&mut self) -> Option<TaskChange> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.task_id == self.task_id => return Some(change),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(task_id = %self.task_id, skipped, "Task subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscription_filters_by_task() {
        let feed = ChangeFeed::new(16);
        let watched = TaskId::new();
        let mut sub = feed.subscribe(watched);

        feed.publish(TaskChange::new(TaskId::new(), ChangeKind::Created));
        feed.publish(TaskChange::new(watched, ChangeKind::Status));

        let change = sub.recv().await.unwrap();
        assert_eq!(change.task_id, watched);
        assert_eq!(change.kind, ChangeKind::Status);
    }

    #[tokio::test]
    async fn test_subscription_survives_lag() {
        let feed = ChangeFeed::new(2);
        let watched = TaskId::new();
        let mut sub = feed.subscribe(watched);

        for _ in 0..5 {
            feed.publish(TaskChange::new(watched, ChangeKind::Updated));
        }
        feed.publish(TaskChange::new(watched, ChangeKind::Deleted));

        let mut last = None;
        while let Ok(Some(change)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), sub.recv()).await
        {
            last = Some(change.kind);
        }
        assert_eq!(last, Some(ChangeKind::Deleted));
    }

    #[tokio::test]
    async fn test_closed_feed_ends_subscription() {
        let feed = ChangeFeed::new(4);
        let mut sub = feed.subscribe(TaskId::new());
        drop(feed);
        assert!(sub.recv().await.is_none());
    }

    #[test]
    fn test_publish_without_subscribers() {
        let feed = ChangeFeed::default();
        feed.publish(TaskChange::new(TaskId::new(), ChangeKind::Created));
    }
}
