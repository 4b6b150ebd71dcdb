//! Write: fan out one no-tools AI call per live component to produce its
//! Markdown article. Bounded by the same fan-out semaphore as analyze.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;

use crate::pipeline::cache::{fingerprint, PhaseCache};
use crate::pipeline::graph::{Component, ComponentGraph};
use crate::pipeline::invoker::{AiInvoker, InvokeOptions};
use crate::pipeline::phases::CacheMode;

/// The subset of a component's analyzed state that determines its article,
/// used as the per-component cache key.
#[derive(Serialize)]
struct WriteKey<'a> {
    id: &'a str,
    overview: &'a Option<String>,
    key_concepts: &'a [String],
    public_api: &'a Option<String>,
    model: &'a str,
}

fn prompt_for(component: &Component) -> String {
    let concepts = component.key_concepts.join(", ");
    format!(
        "Write a Markdown article documenting the `{}` component. Overview: {}. Key concepts: {}. \
         Public API: {}. Respond with Markdown only, no surrounding commentary.",
        component.name,
        component.overview.as_deref().unwrap_or(""),
        concepts,
        component.public_api.as_deref().unwrap_or(""),
    )
}

/// One component's rendered article, or `None` if the component was already
/// marked failed upstream (write never runs for a failed unit) or the write
/// invocation itself failed.
async fn write_one(
    component: &Component,
    model: &str,
    invoker: &dyn AiInvoker,
    cache: &PhaseCache,
    mode: CacheMode,
) -> Option<String> {
    let key = WriteKey {
        id: &component.id,
        overview: &component.overview,
        key_concepts: &component.key_concepts,
        public_api: &component.public_api,
        model,
    };
    let Ok(digest) = fingerprint(&key) else {
        return write_one_uncached(component, model, invoker).await;
    };

    if mode != CacheMode::Force {
        if let Some(cached) = cache.load(&digest).await {
            if let Some(article) = cached.as_str() {
                return Some(article.to_string());
            }
        }
    }

    if mode == CacheMode::Only {
        return None;
    }

    let article = write_one_uncached(component, model, invoker).await;
    if let Some(article) = &article {
        let _ = cache
            .store(&digest, &serde_json::Value::String(article.clone()))
            .await;
    }
    article
}

async fn write_one_uncached(
    component: &Component,
    model: &str,
    invoker: &dyn AiInvoker,
) -> Option<String> {
    let outcome = invoker
        .invoke(
            prompt_for(component),
            InvokeOptions {
                model: Some(model.to_string()),
                timeout_ms: None,
                working_directory: None,
                tools: Some(Vec::new()),
            },
            None,
        )
        .await;
    outcome.success.then_some(outcome.response)
}

/// Articles keyed by component id, in no particular map order — callers
/// requiring determinism iterate `graph.live_component_ids()` against this
/// map rather than relying on its own ordering.
pub async fn run(
    graph: &ComponentGraph,
    model: &str,
    invoker: Arc<dyn AiInvoker>,
    fan_out_limit: Arc<Semaphore>,
    cache: PhaseCache,
    mode: CacheMode,
) -> BTreeMap<String, String> {
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
            let article = write_one(&component, &model, invoker.as_ref(), &cache, mode).await;
            (component.id, article)
        }));
    }

    let mut articles = BTreeMap::new();
    for handle in pending {
        if let Ok((id, Some(article))) = handle.await {
            articles.insert(id, article);
        }
    }
    articles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::Complexity;
    use futures::future::BoxFuture;

    struct StubInvoker;

    impl AiInvoker for StubInvoker {
        fn invoke(
            &self,
            prompt: String,
            _options: InvokeOptions,
            _sink: Option<Box<dyn crate::pipeline::invoker::StreamSink>>,
        ) -> BoxFuture<'static, crate::pipeline::invoker::InvokeOutcome> {
            Box::pin(async move {
                crate::pipeline::invoker::InvokeOutcome::ok(format!("# Article\n{prompt}"), None)
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
            key_files: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            overview: Some("does a thing".to_string()),
            key_concepts: Vec::new(),
            public_api: None,
            architecture: None,
            examples: Vec::new(),
            diagram: None,
            unit_error: None,
        }
    }

    #[tokio::test]
    async fn writes_one_article_per_live_component() {
        let mut graph = ComponentGraph::new("demo");
        graph.components.push(component("auth"));
        let mut failed = component("api");
        failed.unit_error = Some("analyze failed".to_string());
        graph.components.push(failed);

        let invoker: Arc<dyn AiInvoker> = Arc::new(StubInvoker);
        let limit = Arc::new(Semaphore::new(2));
        let dir = tempfile::tempdir().unwrap();
        let cache = PhaseCache::new(dir.path(), "write");

        let articles = run(&graph, "default", invoker, limit, cache, CacheMode::Normal).await;
        assert_eq!(articles.len(), 1);
        assert!(articles.contains_key("auth"));
        assert!(!articles.contains_key("api"));
    }
}
