//! `/api/queue*`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use crate::error::Error;
use crate::queue::{PooledTask, TaskInput};
use crate::state::AppState;

pub async fn snapshot(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.queue.snapshot().await;
    Json(json!({
        "queued": snapshot.queued,
        "running": snapshot.running,
        "stats": snapshot.stats,
    }))
}

pub async fn history(State(state): State<AppState>) -> Json<serde_json::Value> {
    let history = state.queue.history().await;
    Json(json!({ "history": history }))
}

pub async fn enqueue(
    State(state): State<AppState>,
    Json(input): Json<TaskInput>,
) -> Result<(StatusCode, Json<PooledTask>), Error> {
    if input.kind.trim().is_empty() {
        return Err(Error::Validation("type is required".to_string()));
    }
    let task = state.queue.enqueue(input).await;
    Ok((StatusCode::CREATED, Json(task)))
}

pub async fn clear_queued(State(state): State<AppState>) -> StatusCode {
    state.queue.clear_queued().await;
    StatusCode::OK
}

pub async fn clear_history(State(state): State<AppState>) -> StatusCode {
    state.queue.clear_history().await;
    StatusCode::OK
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    state.queue.cancel(&id).await?;
    Ok(StatusCode::OK)
}

pub async fn pause(State(state): State<AppState>) -> StatusCode {
    state.queue.pause().await;
    StatusCode::OK
}

pub async fn resume(State(state): State<AppState>) -> StatusCode {
    state.queue.resume().await;
    StatusCode::OK
}

pub async fn move_to_top(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    state.queue.move_to_top(&id).await?;
    Ok(StatusCode::OK)
}

pub async fn move_up(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    state.queue.move_up(&id).await?;
    Ok(StatusCode::OK)
}

pub async fn move_down(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    state.queue.move_down(&id).await?;
    Ok(StatusCode::OK)
}
