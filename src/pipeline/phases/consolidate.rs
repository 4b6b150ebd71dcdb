//! Consolidate: reduce component count via rule-based grouping, then an
//! optional single AI call to assign categories.

use std::collections::BTreeMap;

use crate::error::Error;
use crate::pipeline::graph::ComponentGraph;
use crate::pipeline::invoker::{AiInvoker, InvokeOptions};
use crate::pipeline::parsing;

/// Below this many components there is nothing worth merging further.
const MERGE_THRESHOLD: usize = 40;

/// Merge any component with fewer than two key files into the component
/// whose `path` is its nearest ancestor, if one exists. Purely structural;
/// runs unconditionally before the optional AI categorization pass.
pub fn merge_small_components(mut graph: ComponentGraph) -> ComponentGraph {
    if graph.components.len() <= MERGE_THRESHOLD {
        return graph;
    }

    let mut by_path: BTreeMap<String, usize> = BTreeMap::new();
    for (idx, c) in graph.components.iter().enumerate() {
        by_path.insert(c.path.clone(), idx);
    }

    let small: Vec<String> = graph
        .components
        .iter()
        .filter(|c| c.key_files.len() < 2)
        .map(|c| c.id.clone())
        .collect();

    for id in small {
        let Some(component) = graph.get(&id) else {
            continue;
        };
        let parent_path = match component.path.rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => continue,
        };
        let Some(&parent_idx) = by_path.get(&parent_path) else {
            continue;
        };
        if graph.components[parent_idx].id == id {
            continue;
        }
        let Some(removed) = graph.components.iter().position(|c| c.id == id) else {
            continue;
        };
        let taken = graph.components.remove(removed);
        let parent_idx = graph
            .components
            .iter()
            .position(|c| c.path == parent_path)
            .unwrap();
        graph.components[parent_idx]
            .key_files
            .extend(taken.key_files);
    }

    graph.recompute_dependents();
    graph
}

/// Ask the model to assign a `category` to each surviving component. Applied
/// best-effort: an unparseable or partial response leaves components
/// uncategorized rather than failing the phase, since consolidation has no
/// per-unit failure concept to fall back on.
pub async fn assign_categories(
    mut graph: ComponentGraph,
    model: &str,
    invoker: &dyn AiInvoker,
) -> ComponentGraph {
    let ids = graph.sorted_ids();
    let prompt = format!(
        "Assign a short category name to each of these component ids, as a JSON object mapping id to category: {}",
        ids.join(", ")
    );
    let outcome = invoker
        .invoke(
            prompt,
            InvokeOptions {
                model: Some(model.to_string()),
                ..Default::default()
            },
            None,
        )
        .await;

    if !outcome.success {
        return graph;
    }
    let Some(parsed) = parsing::extract_json(&outcome.response) else {
        return graph;
    };
    let Some(map) = parsed.as_object() else {
        return graph;
    };

    let mut categories = Vec::new();
    for (id, category) in map {
        if let Some(category) = category.as_str() {
            if let Some(component) = graph.get_mut(id) {
                component.category = category.to_string();
                categories.push(category.to_string());
            }
        }
    }
    categories.sort();
    categories.dedup();
    graph.categories = categories;
    graph
}

pub async fn run(
    graph: ComponentGraph,
    model: &str,
    skip_ai: bool,
    invoker: &dyn AiInvoker,
) -> Result<ComponentGraph, Error> {
    let merged = merge_small_components(graph);
    if skip_ai {
        return Ok(merged);
    }
    Ok(assign_categories(merged, model, invoker).await)
}
