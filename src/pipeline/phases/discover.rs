//! Discover: scan a source tree into an initial `ComponentGraph`. Pure
//! function of the tree's file digests plus scan configuration; no AI.

use std::collections::BTreeMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::error::Error;
use crate::pipeline::graph::{Component, ComponentGraph};
use crate::pipeline::is_ignored;

/// SHA-256 hex digest of every non-ignored file under `root`, keyed by its
/// path relative to `root` with forward slashes. The cache key for this
/// phase is computed over this map, so any source edit changes the fingerprint.
pub fn file_digests(root: &Path) -> Result<BTreeMap<String, String>, Error> {
    let mut digests = BTreeMap::new();
    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        if is_ignored(Path::new(&relative)) {
            continue;
        }
        let bytes = std::fs::read(entry.path())
            .map_err(|e| Error::Internal(format!("failed to read {relative}: {e}")))?;
        let digest = Sha256::digest(&bytes);
        digests.insert(relative, format!("{digest:x}"));
    }
    Ok(digests)
}

/// Group files into one component per top-level directory under `root`
/// (files directly in `root` form a single `root` component). This is the
/// rule-based seed the consolidate phase further reduces.
pub fn run(project: &str, root: &str, file_digests: &BTreeMap<String, String>) -> ComponentGraph {
    let mut by_top_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in file_digests.keys() {
        let top = path
            .split('/')
            .next()
            .filter(|_| path.contains('/'))
            .unwrap_or("root")
            .to_string();
        by_top_dir.entry(top).or_default().push(path.clone());
    }

    let mut graph = ComponentGraph::new(project);
    for (dir, mut files) in by_top_dir {
        files.sort();
        graph.components.push(Component {
            id: dir.clone(),
            name: dir.clone(),
            category: "uncategorized".to_string(),
            path: if dir == "root" {
                root.to_string()
            } else {
                format!("{root}/{dir}")
            },
            purpose: String::new(),
            complexity: crate::pipeline::graph::Complexity::Medium,
            key_files: files,
            dependencies: Vec::new(),
            dependents: Vec::new(),
            overview: None,
            key_concepts: Vec::new(),
            public_api: None,
            architecture: None,
            examples: Vec::new(),
            diagram: None,
            unit_error: None,
        });
    }
    graph.recompute_dependents();
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_files_by_top_level_directory() {
        let mut digests = BTreeMap::new();
        digests.insert("src/auth/jwt.rs".to_string(), "d1".to_string());
        digests.insert("src/api/routes.rs".to_string(), "d2".to_string());
        digests.insert("README.md".to_string(), "d3".to_string());

        let graph = run("demo", "/repo", &digests);
        let ids = graph.sorted_ids();
        assert_eq!(ids, vec!["root".to_string(), "src".to_string()]);
        let src = graph.get("src").unwrap();
        assert_eq!(src.key_files.len(), 2);
    }

    #[test]
    fn file_digests_skips_ignored_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg.js"), b"x").unwrap();
        std::fs::write(dir.path().join("lib.rs"), b"fn main() {}").unwrap();

        let digests = file_digests(dir.path()).unwrap();
        assert_eq!(digests.len(), 1);
        assert!(digests.contains_key("lib.rs"));
    }
}
