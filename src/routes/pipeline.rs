//! `/api/pipeline*` — not part of the representative HTTP table, but the
//! Incremental Generator Pipeline needs some external trigger and result
//! surface; see DESIGN.md for why this pair was added rather than left
//! implicit.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::error::Error;
use crate::events::DomainEvent;
use crate::pipeline::phases::CacheMode;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunPipeline {
    pub project: String,
    pub root: String,
    #[serde(default)]
    pub mode: Option<String>,
}

fn parse_mode(mode: Option<&str>) -> Result<CacheMode, Error> {
    match mode {
        None | Some("normal") => Ok(CacheMode::Normal),
        Some("force") => Ok(CacheMode::Force),
        Some("only") => Ok(CacheMode::Only),
        Some(other) => Err(Error::Validation(format!("unknown cache mode '{other}'"))),
    }
}

pub async fn run(
    State(state): State<AppState>,
    Json(input): Json<RunPipeline>,
) -> Result<(StatusCode, Json<serde_json::Value>), Error> {
    if input.project.trim().is_empty() || input.root.trim().is_empty() {
        return Err(Error::Validation("project and root are required".to_string()));
    }
    let mode = parse_mode(input.mode.as_deref())?;

    let output = state.pipeline.run(&input.project, &input.root, mode).await?;

    state
        .bus
        .publish(DomainEvent::PipelineGraphUpdated { graph: output.graph.clone() });

    if let Some(controller) = state.rebuild_controllers.read().await.get(&input.project) {
        controller.update_graph(output.graph.clone()).await;
    }

    let output = std::sync::Arc::new(output);
    state
        .pipeline_outputs
        .write()
        .await
        .insert(input.project.clone(), output.clone());

    Ok((
        StatusCode::OK,
        Json(json!({ "graph": output.graph, "tree": output.tree })),
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    let output = state
        .pipeline_outputs
        .read()
        .await
        .get(&project)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("no pipeline output for project '{project}'")))?;
    Ok(Json(json!({ "graph": output.graph, "tree": output.tree })))
}
