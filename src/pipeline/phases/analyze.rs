//! Analyze: fan out one read-only AI call per component to produce
//! `{ overview, keyConcepts, publicAPI, architecture, examples, dependencies,
//! diagram }`. Bounded by the pool's `maxSessions` via the shared fan-out
//! semaphore; one failed component does not abort the phase.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::pipeline::cache::{fingerprint, PhaseCache};
use crate::pipeline::graph::{Component, ComponentGraph};
use crate::pipeline::invoker::{AiInvoker, InvokeOptions};
use crate::pipeline::parsing;
use crate::pipeline::phases::CacheMode;

/// The subset of a component's identity that determines its analysis, i.e.
/// everything analyze itself does *not* populate. Used as the per-component
/// cache key so a cache hit never depends on the very output it would
/// produce.
#[derive(Serialize)]
struct AnalyzeKey<'a> {
    id: &'a str,
    path: &'a str,
    key_files: &'a [String],
    model: &'a str,
}

/// Tool permissions granted to analyze invocations: read-only, per the
/// phase's contract.
fn read_only_tools() -> Option<Vec<String>> {
    Some(vec!["read_file".to_string(), "list_directory".to_string()])
}

fn prompt_for(component: &Component) -> String {
    format!(
        "Analyze the component `{}` at path `{}` with key files: {}. \
         Respond with a JSON object: {{overview, keyConcepts, publicAPI, architecture, examples, dependencies, diagram}}.",
        component.name,
        component.path,
        component.key_files.join(", "),
    )
}

/// Apply one component's analysis. On invocation failure, the component is
/// returned with `unit_error` set rather than propagating the error, so the
/// phase can proceed with the remaining components.
async fn analyze_one(
    mut component: Component,
    model: &str,
    timeout_ms: Option<u64>,
    invoker: &dyn AiInvoker,
    cache: &PhaseCache,
    mode: CacheMode,
) -> Component {
    let key = AnalyzeKey {
        id: &component.id,
        path: &component.path,
        key_files: &component.key_files,
        model,
    };
    let Ok(digest) = fingerprint(&key) else {
        return analyze_one_uncached(component, model, timeout_ms, invoker).await;
    };

    if mode != CacheMode::Force {
        if let Some(cached) = cache.load(&digest).await {
            if let Ok(analyzed) = serde_json::from_value::<Component>(cached) {
                return analyzed;
            }
        }
    }

    if mode == CacheMode::Only {
        component.unit_error =
            Some(format!("useCache=only: no cached analysis for component {}", component.id));
        return component;
    }

    component = analyze_one_uncached(component, model, timeout_ms, invoker).await;
    if let Ok(serialized) = serde_json::to_value(&component) {
        let _ = cache.store(&digest, &serialized).await;
    }
    component
}

async fn analyze_one_uncached(
    mut component: Component,
    model: &str,
    timeout_ms: Option<u64>,
    invoker: &dyn AiInvoker,
) -> Component {
    let outcome = invoker
        .invoke(
            prompt_for(&component),
            InvokeOptions {
                model: Some(model.to_string()),
                timeout_ms,
                working_directory: None,
                tools: read_only_tools(),
            },
            None,
        )
        .await;

    if !outcome.success {
        component.unit_error = outcome.error.or_else(|| Some("analyze failed".to_string()));
        return component;
    }

    let Some(parsed) = parsing::extract_json(&outcome.response) else {
        component.unit_error = Some("could not locate a JSON document in the response".to_string());
        return component;
    };

    component.overview = parsing::optional_string_field(&parsed, "overview");
    component.key_concepts = parsing::string_array_field(&parsed, "keyConcepts");
    component.public_api = parsing::optional_string_field(&parsed, "publicAPI");
    component.architecture = parsing::optional_string_field(&parsed, "architecture");
    component.examples = parsing::parse_examples(&parsed);
    component.dependencies = parsing::string_array_field(&parsed, "dependencies");
    component.diagram = parsing::validate_diagram(
        parsed.get("diagram").and_then(serde_json::Value::as_str),
    );
    component
}

/// Run analysis over every live component in `graph`, replacing each with its
/// analyzed (or failed) counterpart, then recompute the bidirectional
/// dependency closure now that components may have declared new
/// dependencies. Order of `graph.components` after this call is unspecified;
/// callers needing determinism use `ComponentGraph::sorted_ids`.
pub async fn run(
    mut graph: ComponentGraph,
    model: &str,
    timeout_ms: Option<u64>,
    invoker: Arc<dyn AiInvoker>,
    fan_out_limit: Arc<Semaphore>,
    cache: PhaseCache,
    mode: CacheMode,
) -> ComponentGraph {
    let live_ids = graph.live_component_ids();
    let mut pending = Vec::new();
    for id in &live_ids {
        let component = graph.get(id).cloned().expect("id came from this graph");
        let invoker = invoker.clone();
        let limit = fan_out_limit.clone();
        let model = model.to_string();
        let cache = cache.clone();
        pending.push(tokio::spawn(async move {
            let _permit = limit.acquire_owned().await.expect("semaphore not closed");
            analyze_one(component, &model, timeout_ms, invoker.as_ref(), &cache, mode).await
        }));
    }

    for handle in pending {
        if let Ok(analyzed) = handle.await {
            if let Some(slot) = graph.get_mut(&analyzed.id) {
                *slot = analyzed;
            }
        }
    }

    graph.recompute_dependents();
    graph
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::Complexity;
    use futures::future::BoxFuture;

    struct StubInvoker {
        response: String,
        fail: bool,
    }

    impl AiInvoker for StubInvoker {
        fn invoke(
            &self,
            _prompt: String,
            _options: InvokeOptions,
            _sink: Option<Box<dyn crate::pipeline::invoker::StreamSink>>,
        ) -> BoxFuture<'static, crate::pipeline::invoker::InvokeOutcome> {
            let response = self.response.clone();
            let fail = self.fail;
            Box::pin(async move {
                if fail {
                    crate::pipeline::invoker::InvokeOutcome::failed("boom")
                } else {
                    crate::pipeline::invoker::InvokeOutcome::ok(response, None)
                }
            })
        }
    }

    fn component(id: &str) -> Component {
        Component {
            id: id.to_string(),
            name: id.to_string(),
            category: "uncategorized".to_string(),
            path: format!("repo/{id}"),
            purpose: String::new(),
            complexity: Complexity::Medium,
            key_files: vec![format!("{id}/lib.rs")],
            dependencies: Vec::new(),
            dependents: Vec::new(),
            overview: None,
            key_concepts: Vec::new(),
            public_api: None,
            architecture: None,
            examples: Vec::new(),
            diagram: None,
            unit_error: None,
        }
    }

    #[tokio::test]
    async fn successful_response_populates_analysis_fields() {
        let mut graph = ComponentGraph::new("demo");
        graph.components.push(component("auth"));
        let invoker: Arc<dyn AiInvoker> = Arc::new(StubInvoker {
            response: r#"{"overview":"does auth","keyConcepts":["jwt"],"dependencies":[]}"#
                .to_string(),
            fail: false,
        });
        let limit = Arc::new(Semaphore::new(2));
        let dir = tempfile::tempdir().unwrap();
        let cache = PhaseCache::new(dir.path(), "analyze");

        let graph = run(graph, "default", None, invoker, limit, cache, CacheMode::Normal).await;
        let auth = graph.get("auth").unwrap();
        assert_eq!(auth.overview.as_deref(), Some("does auth"));
        assert_eq!(auth.key_concepts, vec!["jwt".to_string()]);
        assert!(!auth.is_failed());
    }

    #[tokio::test]
    async fn failed_invocation_marks_the_unit_failed_without_aborting() {
        let mut graph = ComponentGraph::new("demo");
        graph.components.push(component("auth"));
        graph.components.push(component("api"));
        let invoker: Arc<dyn AiInvoker> = Arc::new(StubInvoker {
            response: String::new(),
            fail: true,
        });
        let limit = Arc::new(Semaphore::new(2));
        let dir = tempfile::tempdir().unwrap();
        let cache = PhaseCache::new(dir.path(), "analyze");

        let graph = run(graph, "default", None, invoker, limit, cache, CacheMode::Normal).await;
        assert!(graph.get("auth").unwrap().is_failed());
        assert!(graph.get("api").unwrap().is_failed());
    }
}
