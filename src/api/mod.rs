//! HTTP API for the task board.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/tasks` - List tasks (`limit`, `offset`)
//! - `POST /api/tasks` - Create a task, optionally with subtasks
//! - `GET /api/tasks/{id}` - Get a task
//! - `PATCH /api/tasks/{id}` - Update title, priority or due date
//! - `DELETE /api/tasks/{id}` - Delete a task and its subtasks
//! - `POST /api/tasks/{id}/status` - Set the status of a task without subtasks
//! - `POST /api/tasks/{id}/subtasks` - Add a subtask
//! - `DELETE /api/tasks/{id}/subtasks/{subtask_id}` - Remove a subtask
//! - `POST /api/tasks/{id}/subtasks/{subtask_id}/toggle` - Complete or reopen a subtask
//! - `GET /api/tasks/{id}/stream` - Stream task snapshots via SSE

mod routes;
pub mod task_store;
mod tasks;
pub mod types;

pub use routes::{router, serve, AppState};
pub use types::*;
