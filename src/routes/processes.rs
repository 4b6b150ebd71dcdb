//! `/api/processes*` and `/api/stats`.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::error::Error;
use crate::state::AppState;
use crate::store::{Process, ProcessFilter, ProcessPatch, ProcessStatus};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProcess {
    pub id: String,
    #[serde(default)]
    pub parent_process_id: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: ProcessStatus,
    pub start_time: chrono::DateTime<Utc>,
    #[serde(default)]
    pub end_time: Option<chrono::DateTime<Utc>>,
    #[serde(default)]
    pub prompt_preview: String,
    #[serde(default)]
    pub full_prompt: String,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub structured_result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: crate::store::ProcessMetadata,
}

pub async fn create(
    State(state): State<AppState>,
    Json(input): Json<CreateProcess>,
) -> Result<(StatusCode, Json<Process>), Error> {
    if input.id.trim().is_empty() || input.kind.trim().is_empty() {
        return Err(Error::Validation(
            "id, status, startTime and type are required".to_string(),
        ));
    }
    let process = Process {
        id: input.id,
        parent_process_id: input.parent_process_id,
        workspace_id: input.workspace_id,
        kind: input.kind,
        status: input.status,
        start_time: input.start_time,
        end_time: input.end_time,
        prompt_preview: input.prompt_preview,
        full_prompt: input.full_prompt,
        result: input.result,
        structured_result: input.structured_result,
        error: input.error,
        metadata: input.metadata,
    };
    let created = state.store.create(process).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let filter = ProcessFilter::from_query_params(
        params.get("workspace").map(String::as_str),
        params.get("status").map(String::as_str),
        params.get("type").map(String::as_str),
        params.get("since").map(String::as_str),
        params.get("limit").map(String::as_str),
        params.get("offset").map(String::as_str),
    );
    let (processes, total) = state.store.list(&filter).await;
    Json(json!({
        "processes": processes,
        "total": total,
        "limit": filter.limit,
        "offset": filter.offset,
    }))
}

pub async fn get_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    let process = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| Error::NotFound("Process not found".to_string()))?;
    Ok(Json(json!({ "process": process })))
}

pub async fn patch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ProcessPatch>,
) -> Result<Json<serde_json::Value>, Error> {
    let process = state.store.update(&id, patch).await?;
    Ok(Json(json!({ "process": process })))
}

pub async fn delete_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, Error> {
    state.store.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_bulk(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, Error> {
    let status_param = params
        .get("status")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Validation("status is required".to_string()))?;
    let statuses: Vec<ProcessStatus> = status_param
        .split(',')
        .filter_map(|s| match s {
            "queued" => Some(ProcessStatus::Queued),
            "running" => Some(ProcessStatus::Running),
            "completed" => Some(ProcessStatus::Completed),
            "failed" => Some(ProcessStatus::Failed),
            "cancelled" => Some(ProcessStatus::Cancelled),
            _ => None,
        })
        .collect();
    if statuses.is_empty() {
        return Err(Error::Validation("status is required".to_string()));
    }
    let removed = state.store.delete_by_status(&statuses).await;
    Ok(Json(json!({ "removed": removed })))
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    let current = state
        .store
        .get(&id)
        .await
        .ok_or_else(|| Error::NotFound("Process not found".to_string()))?;
    if current.status.is_terminal() {
        return Err(Error::Conflict("process is already terminal".to_string()));
    }
    let process = state
        .store
        .update(
            &id,
            ProcessPatch {
                status: Some(ProcessStatus::Cancelled),
                end_time: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(json!({ "process": process })))
}

pub async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.store.stats().await;
    Json(json!({
        "totalProcesses": stats.total_processes,
        "byStatus": stats.by_status,
        "byWorkspace": stats.by_workspace,
    }))
}
