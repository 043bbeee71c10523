//! Task and subtask endpoints.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    routing::{delete, get, post},
    Router,
};
use futures::stream::Stream;
use uuid::Uuid;

use super::routes::AppState;
use super::task_store::{ChangeKind, StoreError};
use super::types::*;
use crate::board::{BoardError, NewSubtask, NewTask};
use crate::task::{CompletionError, SubtaskId, Task, TaskId};

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route(
            "/:id",
            get(get_task).patch(update_task).delete(delete_task),
        )
        .route("/:id/status", post(set_status))
        .route("/:id/subtasks", post(add_subtask))
        .route("/:id/subtasks/:subtask_id", delete(remove_subtask))
        .route("/:id/subtasks/:subtask_id/toggle", post(toggle_subtask))
        .route("/:id/stream", get(stream_task))
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_body(status: StatusCode, error: impl ToString, task: Option<&Task>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            task: task.map(TaskResponse::from),
        }),
    )
}

/// Map a board error to a status code.
fn board_error(err: BoardError) -> ApiError {
    match &err {
        BoardError::Rejected { reason, .. } => {
            let status = match reason {
                CompletionError::Locked { .. } => StatusCode::CONFLICT,
                CompletionError::NotFound { .. } => StatusCode::NOT_FOUND,
                CompletionError::NotApplicable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            };
            error_body(status, reason, err.current_task())
        }
        BoardError::Invalid(e) => error_body(StatusCode::BAD_REQUEST, e, None),
        BoardError::Store(StoreError::TaskNotFound(_) | StoreError::SubtaskNotFound(_)) => {
            error_body(StatusCode::NOT_FOUND, &err, None)
        }
        BoardError::Store(StoreError::Conflict(_)) => error_body(StatusCode::CONFLICT, &err, None),
        BoardError::Store(e) => {
            tracing::error!("Task store failure: {}", e);
            error_body(StatusCode::INTERNAL_SERVER_ERROR, e, None)
        }
    }
}

fn task_json(task: &Task) -> Json<TaskResponse> {
    Json(TaskResponse::from(task))
}

/// List tasks, newest first.
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<TaskResponse>>, ApiError> {
    let tasks = state
        .board
        .list(query.limit(), query.offset())
        .await
        .map_err(board_error)?;
    Ok(Json(tasks.iter().map(TaskResponse::from).collect()))
}

/// Create a task, optionally with subtasks.
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewTask>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let task = state.board.create(req).await.map_err(board_error)?;
    Ok((StatusCode::CREATED, task_json(&task)))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state
        .board
        .get(TaskId::from_uuid(id))
        .await
        .map_err(board_error)?;
    Ok(task_json(&task))
}

/// Update title, priority or due date.
async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state
        .board
        .update_details(TaskId::from_uuid(id), req.into())
        .await
        .map_err(board_error)?;
    Ok(task_json(&task))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state
        .board
        .delete(TaskId::from_uuid(id))
        .await
        .map_err(board_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Set the status of a task without subtasks.
async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<SetStatusRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state
        .board
        .set_status(TaskId::from_uuid(id), req.status)
        .await
        .map_err(board_error)?;
    Ok(task_json(&task))
}

async fn add_subtask(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<NewSubtask>,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let task = state
        .board
        .add_subtask(TaskId::from_uuid(id), req)
        .await
        .map_err(board_error)?;
    Ok((StatusCode::CREATED, task_json(&task)))
}

async fn remove_subtask(
    State(state): State<Arc<AppState>>,
    Path((id, subtask_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state
        .board
        .remove_subtask(TaskId::from_uuid(id), SubtaskId::from_uuid(subtask_id))
        .await
        .map_err(board_error)?;
    Ok(task_json(&task))
}

/// Toggle a subtask between open and completed.
async fn toggle_subtask(
    State(state): State<Arc<AppState>>,
    Path((id, subtask_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = state
        .board
        .toggle_subtask(TaskId::from_uuid(id), SubtaskId::from_uuid(subtask_id))
        .await
        .map_err(board_error)?;
    Ok(task_json(&task))
}

fn task_event(task: &Task) -> Event {
    match Event::default()
        .event("task")
        .json_data(TaskResponse::from(task))
    {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!("Failed to encode task event: {}", e);
            Event::default().event("error").data(e.to_string())
        }
    }
}

/// Stream task snapshots via SSE.
///
/// Sends the current task first, then a fresh snapshot after every change.
/// Ends with a `deleted` event when the task goes away.
async fn stream_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let task_id = TaskId::from_uuid(id);
    // subscribe before the first fetch so no change falls in between
    let mut subscription = state.board.subscribe(task_id);
    let task = state.board.get(task_id).await.map_err(board_error)?;
    let board = state.board.clone();

    let stream = async_stream::stream! {
        yield Ok(task_event(&task));

        while let Some(change) = subscription.recv().await {
            if change.kind == ChangeKind::Deleted {
                yield Ok(Event::default().event("deleted").data(task_id.to_string()));
                break;
            }
            match board.get(task_id).await {
                Ok(task) => {
                    yield Ok(task_event(&task));
                }
                Err(BoardError::Store(StoreError::TaskNotFound(_))) => {
                    yield Ok(Event::default().event("deleted").data(task_id.to_string()));
                    break;
                }
                Err(e) => {
                    tracing::warn!("Failed to refresh task {} for stream: {}", task_id, e);
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
