//! Change-Driven Rebuild Controller: translates file-system events into a
//! minimal set of affected pipeline components.
//!
//! Watching is grounded on `notify` (the same crate family the retrieval
//! pack's `watch`-style tooling depends on for recursive filesystem
//! notifications). The debounce/fire loop follows the teacher's
//! single-task-with-`select!` style seen in `ws/mod.rs`'s connection loop and
//! `main.rs`'s periodic sweep task: one task owns a `tokio::time::sleep`
//! deadline that gets pushed out on every incoming event and fires once
//! things go quiet.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, warn};

use crate::pipeline::graph::ComponentGraph;
use crate::pipeline::{is_ignored, normalize_to_forward_slashes};

/// Affected component ids from one settled debounce window, already
/// deduplicated.
pub type AffectedSet = Vec<String>;

/// A callback invoked once per settled debounce window with a non-empty
/// affected set. Registered at construction time; expected to enqueue
/// re-analysis of exactly these components.
pub trait RebuildCallback: Send + Sync + 'static {
    fn on_affected(&self, affected: AffectedSet);
}

impl<F> RebuildCallback for F
where
    F: Fn(AffectedSet) + Send + Sync + 'static,
{
    fn on_affected(&self, affected: AffectedSet) {
        self(affected)
    }
}

/// Compute the affected component ids for a set of changed paths against a
/// graph: a component is affected if its `path` is a prefix of the change, or
/// if the change is one of its `keyFiles`. Deduplicated, sorted for
/// determinism.
pub fn affected_components(graph: &ComponentGraph, changed: &BTreeSet<String>) -> AffectedSet {
    let mut affected = BTreeSet::new();
    for path in changed {
        let path = normalize_to_forward_slashes(path);
        if is_ignored(Path::new(&path)) {
            continue;
        }
        for component in &graph.components {
            if path.starts_with(&component.path)
                || component.key_files.iter().any(|kf| kf == &path)
            {
                affected.insert(component.id.clone());
            }
        }
    }
    affected.into_iter().collect()
}

/// Debounced watcher driving [`RebuildCallback`] firings, holding the
/// last-known graph so an affected set can be computed without a caller
/// round-trip.
pub struct RebuildController {
    graph: Arc<RwLock<ComponentGraph>>,
    // Kept alive for the controller's lifetime; dropping it stops watching.
    _watcher: Option<RecommendedWatcher>,
    debounce_task: tokio::task::JoinHandle<()>,
}

impl RebuildController {
    /// Start watching `root` recursively. If the platform cannot start a
    /// recursive watch, logs one startup error and returns a controller that
    /// stays inert (the debounce task still runs, just never receives
    /// events) rather than failing construction — per the platform-tolerance
    /// contract.
    pub fn start(
        root: PathBuf,
        graph: ComponentGraph,
        debounce_ms: u64,
        callback: Arc<dyn RebuildCallback>,
    ) -> Self {
        let graph = Arc::new(RwLock::new(graph));
        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();

        let watcher = build_watcher(root, tx);

        let debounce_task = {
            let graph = graph.clone();
            tokio::spawn(debounce_loop(rx, debounce_ms, graph, callback))
        };

        Self {
            graph,
            _watcher: watcher,
            debounce_task,
        }
    }

    /// Replace the last-known graph, e.g. after a pipeline run completes.
    pub async fn update_graph(&self, graph: ComponentGraph) {
        *self.graph.write().await = graph;
    }

    pub fn stop(&self) {
        self.debounce_task.abort();
    }
}

fn build_watcher(root: PathBuf, tx: mpsc::UnboundedSender<PathBuf>) -> Option<RecommendedWatcher> {
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<Event>| match res
    {
        Ok(event) => {
            for path in event.paths {
                let _ = tx.send(path);
            }
        }
        Err(e) => error!(error = %e, "file watcher error"),
    }) {
        Ok(w) => w,
        Err(e) => {
            error!(error = %e, path = %root.display(), "rebuild controller could not start a watcher");
            return None;
        }
    };

    if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
        error!(error = %e, path = %root.display(), "rebuild controller could not watch root recursively");
        return None;
    }

    Some(watcher)
}

async fn debounce_loop(
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    debounce_ms: u64,
    graph: Arc<RwLock<ComponentGraph>>,
    callback: Arc<dyn RebuildCallback>,
) {
    let debounce = Duration::from_millis(debounce_ms);
    let mut pending: BTreeSet<String> = BTreeSet::new();

    loop {
        let path = if pending.is_empty() {
            match rx.recv().await {
                Some(path) => path,
                None => return,
            }
        } else {
            tokio::select! {
                path = rx.recv() => match path {
                    Some(path) => path,
                    None => return,
                },
                () = tokio::time::sleep(debounce) => {
                    let changed = std::mem::take(&mut pending);
                    let graph = graph.read().await;
                    let affected = affected_components(&graph, &changed);
                    if !affected.is_empty() {
                        callback.on_affected(affected);
                    }
                    continue;
                }
            }
        };

        if let Some(path) = path.to_str() {
            pending.insert(path.to_string());
        } else {
            warn!("ignoring non-UTF8 changed path");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::{Complexity, Component};

    fn component(id: &str, path: &str, key_files: &[&str]) -> Component {
        Component {
            id: id.to_string(),
            name: id.to_string(),
            category: "uncategorized".to_string(),
            path: path.to_string(),
            purpose: String::new(),
            complexity: Complexity::Medium,
            key_files: key_files.iter().map(|s| s.to_string()).collect(),
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

    #[test]
    fn a_path_prefix_change_affects_exactly_its_component() {
        let mut graph = ComponentGraph::new("demo");
        graph
            .components
            .push(component("auth", "src/auth", &["src/auth/jwt.ts"]));
        graph
            .components
            .push(component("api", "src/api", &["src/api/routes.ts"]));

        let mut changed = BTreeSet::new();
        changed.insert("src/auth/login.ts".to_string());

        let affected = affected_components(&graph, &changed);
        assert_eq!(affected, vec!["auth".to_string()]);
    }

    #[test]
    fn a_key_file_change_outside_the_path_prefix_still_matches() {
        let mut graph = ComponentGraph::new("demo");
        graph
            .components
            .push(component("shared", "src/shared", &["config/shared.json"]));

        let mut changed = BTreeSet::new();
        changed.insert("config/shared.json".to_string());

        let affected = affected_components(&graph, &changed);
        assert_eq!(affected, vec!["shared".to_string()]);
    }

    #[test]
    fn ignored_paths_never_affect_any_component() {
        let mut graph = ComponentGraph::new("demo");
        graph.components.push(component("auth", "", &[]));

        let mut changed = BTreeSet::new();
        changed.insert("node_modules/pkg/index.js".to_string());

        let affected = affected_components(&graph, &changed);
        assert!(affected.is_empty());
    }

    #[tokio::test]
    async fn debounced_changes_coalesce_into_one_callback() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let mut graph = ComponentGraph::new("demo");
        graph
            .components
            .push(component("auth", "src/auth", &["src/auth/jwt.ts"]));

        let calls = Arc::new(AtomicUsize::new(0));
        let last: Arc<RwLock<AffectedSet>> = Arc::new(RwLock::new(Vec::new()));
        struct Recorder {
            calls: Arc<AtomicUsize>,
            last: Arc<RwLock<AffectedSet>>,
        }
        impl RebuildCallback for Recorder {
            fn on_affected(&self, affected: AffectedSet) {
                self.calls.fetch_add(1, Ordering::SeqCst);
                let last = self.last.clone();
                tokio::spawn(async move {
                    *last.write().await = affected;
                });
            }
        }
        let callback = Arc::new(Recorder {
            calls: calls.clone(),
            last: last.clone(),
        });

        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
        let graph = Arc::new(RwLock::new(graph));
        let handle = tokio::spawn(debounce_loop(rx, 50, graph, callback));

        tx.send(PathBuf::from("src/auth/login.ts")).unwrap();
        tx.send(PathBuf::from("src/auth/session.ts")).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1, "sibling changes coalesce");
        assert_eq!(*last.read().await, vec!["auth".to_string()]);

        handle.abort();
    }
}
