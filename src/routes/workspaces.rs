//! `GET|POST /api/workspaces`.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::Error;
use crate::events::DomainEvent;
use crate::pipeline::graph::ComponentGraph;
use crate::queue::{Priority, TaskConfig, TaskInput, TaskPayload};
use crate::rebuild::{AffectedSet, RebuildController};
use crate::state::AppState;
use crate::workspace::Workspace;

/// Start (or restart) the rebuild controller watching `workspace.root_path`,
/// replacing any controller already registered for this workspace id.
/// Its callback enqueues a re-analysis task for exactly the affected
/// components, per the rebuild controller's contract.
async fn start_watching(state: &AppState, workspace: &Workspace) {
    if let Some(existing) = state.rebuild_controllers.write().await.remove(&workspace.id) {
        existing.stop();
    }

    let queue = state.queue.clone();
    let workspace_id = workspace.id.clone();
    let callback = Arc::new(move |affected: AffectedSet| {
        let queue = queue.clone();
        let workspace_id = workspace_id.clone();
        tokio::spawn(async move {
            queue
                .enqueue(TaskInput {
                    kind: "pipeline-reanalyze".to_string(),
                    priority: Priority::Normal,
                    payload: TaskPayload {
                        prompt: format!(
                            "Re-analyze affected components for workspace '{workspace_id}': {}",
                            affected.join(", ")
                        ),
                        extra: json!({ "workspaceId": workspace_id, "affected": affected }),
                    },
                    config: TaskConfig::default(),
                    display_name: Some(format!("rebuild: {workspace_id}")),
                })
                .await;
        });
    });

    let controller = RebuildController::start(
        PathBuf::from(&workspace.root_path),
        ComponentGraph::new(workspace.id.clone()),
        state.config.rebuild.debounce_ms,
        callback,
    );
    state
        .rebuild_controllers
        .write()
        .await
        .insert(workspace.id.clone(), Arc::new(controller));
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterWorkspace {
    pub id: String,
    pub name: String,
    pub root_path: String,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub pipelines_folder: Option<String>,
}

pub async fn list(State(state): State<AppState>) -> Json<serde_json::Value> {
    let workspaces = state.workspaces.list().await;
    Json(json!({ "workspaces": workspaces }))
}

pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<RegisterWorkspace>,
) -> Result<(StatusCode, Json<Workspace>), Error> {
    if input.id.trim().is_empty() || input.name.trim().is_empty() || input.root_path.trim().is_empty() {
        return Err(Error::Validation(
            "id, name and rootPath are required".to_string(),
        ));
    }
    let workspace = Workspace {
        id: input.id,
        name: input.name,
        root_path: input.root_path,
        color: input.color,
        pipelines_folder: input.pipelines_folder,
    };
    state.workspaces.register(workspace.clone()).await;
    start_watching(&state, &workspace).await;
    state
        .bus
        .publish(DomainEvent::WorkspaceRegistered { workspace: workspace.clone() });
    Ok((StatusCode::CREATED, Json(workspace)))
}
