//! Workspace registry.
//!
//! A `Workspace` is mutable metadata over an immutable identity: callers can
//! rename or recolor a workspace, but its `id` and `root_path` never change
//! underneath a running process that references it. Modeled the same way the
//! teacher's `SessionManager` owns its map — a single `RwLock<HashMap<...>>`,
//! reads taking a shared lock, mutations taking an exclusive one.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub root_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipelines_folder: Option<String>,
}

#[derive(Clone)]
pub struct WorkspaceRegistry {
    inner: Arc<RwLock<HashMap<String, Workspace>>>,
}

impl WorkspaceRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a workspace. Overwrites any existing entry with the same id
    /// (re-registration is how clients update metadata).
    pub async fn register(&self, workspace: Workspace) {
        self.inner
            .write()
            .await
            .insert(workspace.id.clone(), workspace);
    }

    pub async fn get(&self, id: &str) -> Option<Workspace> {
        self.inner.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Workspace> {
        let map = self.inner.read().await;
        let mut out: Vec<Workspace> = map.values().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }
}

impl Default for WorkspaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_list_returns_sorted() {
        let registry = WorkspaceRegistry::new();
        registry
            .register(Workspace {
                id: "ws-2".to_string(),
                name: "b".to_string(),
                root_path: "/b".to_string(),
                color: None,
                pipelines_folder: None,
            })
            .await;
        registry
            .register(Workspace {
                id: "ws-1".to_string(),
                name: "frontend".to_string(),
                root_path: "/f".to_string(),
                color: None,
                pipelines_folder: None,
            })
            .await;

        let all = registry.list().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "ws-1");
        assert_eq!(all[1].id, "ws-2");
    }

    #[tokio::test]
    async fn reregistering_overwrites_metadata() {
        let registry = WorkspaceRegistry::new();
        registry
            .register(Workspace {
                id: "ws-1".to_string(),
                name: "old".to_string(),
                root_path: "/f".to_string(),
                color: None,
                pipelines_folder: None,
            })
            .await;
        registry
            .register(Workspace {
                id: "ws-1".to_string(),
                name: "new".to_string(),
                root_path: "/f".to_string(),
                color: Some("#fff".to_string()),
                pipelines_folder: None,
            })
            .await;

        let ws = registry.get("ws-1").await.unwrap();
        assert_eq!(ws.name, "new");
        assert_eq!(ws.color.as_deref(), Some("#fff"));
    }
}
