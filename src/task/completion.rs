//! Subtask sequencing and derived task status.
//!
//! Everything here is a pure function over a task snapshot: nothing is
//! persisted and nothing is remembered between calls. Callers persist the
//! returned values and re-fetch.
//!
//! # Sequencing rule
//! Subtasks are sorted by `order_index` (ties keep collection order). The
//! subtask at sorted position `i` is enabled iff every subtask at `0..i` is
//! completed, so the first subtask is always enabled and completing one
//! subtask can only ever enable later ones.

use serde::Serialize;

use super::subtask::{Subtask, SubtaskId, SubtaskStatus};
use super::task::{Task, TaskId, TaskStatus};

/// Subtasks sorted into completion order, with the first open position cached.
///
/// Sorting happens once in `new`; every lock check afterwards is a single
/// comparison against `first_open`.
#[derive(Debug)]
pub struct SubtaskSequence<'a> {
    ordered: Vec<&'a Subtask>,
    first_open: usize,
}

impl<'a> SubtaskSequence<'a> {
    pub fn new(subtasks: &'a [Subtask]) -> Self {
        let mut ordered: Vec<&'a Subtask> = subtasks.iter().collect();
        // stable: equal order_index keeps collection order
        ordered.sort_by_key(|s| s.order_index);
        let first_open = ordered
            .iter()
            .position(|s| !s.is_completed())
            .unwrap_or(ordered.len());
        Self {
            ordered,
            first_open,
        }
    }

    /// Subtasks in completion order.
    pub fn ordered(&self) -> &[&'a Subtask] {
        &self.ordered
    }

    /// Sorted position of `id`, if it is part of the sequence.
    pub fn position(&self, id: SubtaskId) -> Option<usize> {
        self.ordered.iter().position(|s| s.id == id)
    }

    pub fn is_enabled_at(&self, position: usize) -> bool {
        position < self.ordered.len() && position <= self.first_open
    }

    pub fn is_enabled(&self, id: SubtaskId) -> bool {
        self.position(id)
            .map(|p| self.is_enabled_at(p))
            .unwrap_or(false)
    }

    /// The earliest open subtask, i.e. the one every later subtask waits on.
    pub fn first_open(&self) -> Option<&'a Subtask> {
        self.ordered.get(self.first_open).copied()
    }
}

/// Whether `subtask` may currently be completed within `all_subtasks`.
///
/// A subtask that is not in `all_subtasks` is never enabled.
pub fn is_subtask_enabled(subtask: &Subtask, all_subtasks: &[Subtask]) -> bool {
    SubtaskSequence::new(all_subtasks).is_enabled(subtask.id)
}

/// Aggregate status for a subtask collection.
///
/// # Property
/// All open (including the empty collection) is `Open`, all completed is
/// `Completed`, anything mixed is `InProgress`.
pub fn derive_task_status(subtasks: &[Subtask]) -> TaskStatus {
    let completed = subtasks.iter().filter(|s| s.is_completed()).count();
    if completed == 0 {
        TaskStatus::Open
    } else if completed == subtasks.len() {
        TaskStatus::Completed
    } else {
        TaskStatus::InProgress
    }
}

/// Result of a permitted subtask toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToggleOutcome {
    pub subtask_id: SubtaskId,

    /// New status of the toggled subtask
    pub subtask_status: SubtaskStatus,

    /// Full subtask collection after the toggle, in collection order
    pub subtasks: Vec<Subtask>,

    /// Derived task status after the toggle
    pub task_status: TaskStatus,
}

/// Flip one subtask of `task` between open and completed.
///
/// # Errors
/// - `NotFound` if `subtask_id` is not one of the task's subtasks
/// - `Locked` if the subtask is open and a predecessor is still open.
///   Un-completing is always allowed.
pub fn toggle_subtask(task: &Task, subtask_id: SubtaskId) -> Result<ToggleOutcome, CompletionError> {
    let subtasks = task.subtasks();
    let index = subtasks
        .iter()
        .position(|s| s.id == subtask_id)
        .ok_or(CompletionError::NotFound {
            task_id: task.id(),
            subtask_id,
        })?;

    if !subtasks[index].is_completed() {
        let sequence = SubtaskSequence::new(subtasks);
        if !sequence.is_enabled(subtask_id) {
            // a disabled open subtask always has an open predecessor
            let blocked_by = sequence.first_open().map(|s| s.id).unwrap_or(subtask_id);
            return Err(CompletionError::Locked {
                subtask_id,
                blocked_by,
            });
        }
    }

    let mut updated = subtasks.to_vec();
    let subtask_status = updated[index].status.toggled();
    updated[index].status = subtask_status;
    let task_status = derive_task_status(&updated);

    Ok(ToggleOutcome {
        subtask_id,
        subtask_status,
        subtasks: updated,
        task_status,
    })
}

/// Return `task` with its status set to `status`.
///
/// # Errors
/// `NotApplicable` if the task has subtasks; its status is derived.
pub fn set_manual_status(task: &Task, status: TaskStatus) -> Result<Task, CompletionError> {
    let mut next = task.clone();
    match next.manual_status_mut() {
        Some(slot) => {
            *slot = status;
            Ok(next)
        }
        None => Err(CompletionError::NotApplicable { task_id: task.id() }),
    }
}

/// Policy rejections from the completion engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompletionError {
    #[error("Subtask {subtask_id} not found in task {task_id}")]
    NotFound {
        task_id: TaskId,
        subtask_id: SubtaskId,
    },

    #[error("Subtask {subtask_id} is locked until subtask {blocked_by} is completed")]
    Locked {
        subtask_id: SubtaskId,
        blocked_by: SubtaskId,
    },

    #[error("Task {task_id} has subtasks; its status is derived from them")]
    NotApplicable { task_id: TaskId },
}
