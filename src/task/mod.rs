//! Task module - defines tasks, subtasks, and the completion rules between them.
//!
//! Nothing here does I/O. Stores hand in snapshots, the engine in
//! [`completion`] answers with new snapshots, and callers persist them.

pub mod completion;
mod subtask;
pub mod task;

pub use completion::{
    derive_task_status, is_subtask_enabled, set_manual_status, toggle_subtask, CompletionError,
    SubtaskSequence, ToggleOutcome,
};
pub use subtask::{next_order_index, Subtask, SubtaskId, SubtaskStatus};
pub use task::{Priority, Progress, Task, TaskError, TaskId, TaskRow, TaskStatus};
