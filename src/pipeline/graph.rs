//! The `ComponentGraph` artifact produced by the discover phase and refined
//! by every phase after it.
//!
//! `dependents` is a derived field: it is never hand-maintained by a phase,
//! it is recomputed from `dependencies` by [`ComponentGraph::recompute_dependents`]
//! so the bidirectional-closure invariant can never drift out of sync.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeExample {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: String,
    pub name: String,
    pub category: String,
    pub path: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default = "default_complexity")]
    pub complexity: Complexity,
    #[serde(default)]
    pub key_files: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub dependents: Vec<String>,

    // Populated by the analyze phase; absent right after discover.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(default)]
    pub key_concepts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_api: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(default)]
    pub examples: Vec<CodeExample>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagram: Option<String>,

    /// Set when a per-unit fan-out step failed for this component; downstream
    /// phases exclude it from their own fan-out rather than aborting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_error: Option<String>,
}

fn default_complexity() -> Complexity {
    Complexity::Medium
}

impl Component {
    pub fn is_failed(&self) -> bool {
        self.unit_error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentGraph {
    pub project: String,
    #[serde(default)]
    pub categories: Vec<String>,
    pub components: Vec<Component>,
}

impl ComponentGraph {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            categories: Vec::new(),
            components: Vec::new(),
        }
    }

    /// Component ids in deterministic sort order, used everywhere downstream
    /// fan-out needs a stable iteration order so repeated runs on identical
    /// inputs produce byte-identical output.
    pub fn sorted_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.components.iter().map(|c| c.id.clone()).collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.id == id)
    }

    /// Units still eligible for the next phase's fan-out.
    pub fn live_component_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .components
            .iter()
            .filter(|c| !c.is_failed())
            .map(|c| c.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Rebuild `dependents` from `dependencies` so `dependents[x] ∋ y ⟺
    /// dependencies[y] ∋ x` holds exactly, dropping any reference to a
    /// nonexistent component id.
    pub fn recompute_dependents(&mut self) {
        let known: std::collections::HashSet<String> =
            self.components.iter().map(|c| c.id.clone()).collect();

        for c in &mut self.components {
            c.dependencies.retain(|d| known.contains(d));
        }

        let mut dependents: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for c in &self.components {
            for dep in &c.dependencies {
                dependents.entry(dep.clone()).or_default().push(c.id.clone());
            }
        }

        for c in &mut self.components {
            let mut list = dependents.remove(&c.id).unwrap_or_default();
            list.sort();
            list.dedup();
            c.dependents = list;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(id: &str, deps: &[&str]) -> Component {
        Component {
            id: id.to_string(),
            name: id.to_string(),
            category: "core".to_string(),
            path: format!("src/{id}"),
            purpose: String::new(),
            complexity: Complexity::Medium,
            key_files: Vec::new(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
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
    fn recompute_dependents_is_the_exact_inverse_of_dependencies() {
        let mut graph = ComponentGraph::new("demo");
        graph.components.push(component("api", &["auth"]));
        graph.components.push(component("auth", &[]));
        graph.recompute_dependents();

        assert_eq!(graph.get("auth").unwrap().dependents, vec!["api".to_string()]);
        assert!(graph.get("api").unwrap().dependents.is_empty());
    }

    #[test]
    fn recompute_dependents_drops_references_to_unknown_components() {
        let mut graph = ComponentGraph::new("demo");
        graph.components.push(component("api", &["ghost"]));
        graph.recompute_dependents();

        assert!(graph.get("api").unwrap().dependencies.is_empty());
    }

    #[test]
    fn live_component_ids_excludes_failed_units_and_is_sorted() {
        let mut graph = ComponentGraph::new("demo");
        graph.components.push(component("zeta", &[]));
        graph.components.push(component("alpha", &[]));
        graph.get_mut("zeta").unwrap().unit_error = Some("boom".to_string());

        assert_eq!(graph.live_component_ids(), vec!["alpha".to_string()]);
    }
}
