//! Assemble: combine the graph and written articles into a serialized
//! output tree. Pure function, no AI, no I/O — callers decide how to persist
//! the result.

use std::collections::BTreeMap;

use crate::pipeline::graph::ComponentGraph;

/// One file in the generated output tree: a relative path and its content.
pub type OutputTree = BTreeMap<String, String>;

/// `index.md` plus one `<component-id>.md` per live component with an
/// article. Components without an article (excluded by a prior phase
/// failure) are listed in the index but produce no file of their own.
/// Iteration order follows `ComponentGraph::live_component_ids`, so the same
/// graph and articles always assemble to the same byte-identical tree.
pub fn run(graph: &ComponentGraph, articles: &BTreeMap<String, String>) -> OutputTree {
    let mut tree = OutputTree::new();

    let mut index = format!("# {}\n\n", graph.project);
    for id in graph.live_component_ids() {
        let component = graph.get(&id).expect("id came from this graph");
        let has_article = articles.contains_key(&id);
        if has_article {
            index.push_str(&format!("- [{}]({}.md)\n", component.name, id));
            tree.insert(format!("{id}.md"), articles[&id].clone());
        } else {
            index.push_str(&format!("- {} (no article)\n", component.name));
        }
    }
    tree.insert("index.md".to_string(), index);
    tree
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::graph::{Complexity, Component};

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
    fn assembles_an_index_and_one_file_per_articled_component() {
        let mut graph = ComponentGraph::new("demo");
        graph.components.push(component("auth"));
        graph.components.push(component("api"));
        let mut articles = BTreeMap::new();
        articles.insert("auth".to_string(), "# Auth".to_string());

        let tree = run(&graph, &articles);
        assert_eq!(tree.get("auth.md"), Some(&"# Auth".to_string()));
        assert!(!tree.contains_key("api.md"));
        assert!(tree["index.md"].contains("auth"));
        assert!(tree["index.md"].contains("no article"));
    }

    #[test]
    fn assembly_is_deterministic_across_runs() {
        let mut graph = ComponentGraph::new("demo");
        graph.components.push(component("zeta"));
        graph.components.push(component("alpha"));
        let mut articles = BTreeMap::new();
        articles.insert("zeta".to_string(), "z".to_string());
        articles.insert("alpha".to_string(), "a".to_string());

        let first = run(&graph, &articles);
        let second = run(&graph, &articles);
        assert_eq!(first, second);
    }
}
