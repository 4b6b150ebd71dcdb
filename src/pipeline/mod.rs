//! The incremental generator pipeline: a five-phase batch transform of a
//! source tree into a structured knowledge artifact, with per-phase
//! content-addressed caching and fan-out bounded by the session pool.

pub mod cache;
pub mod graph;
pub mod invoker;
pub mod parsing;
pub mod phases;

use std::path::Path;

/// Directory and dotfile names never worth scanning or watching: VCS
/// metadata, dependency trees, and build output. Shared by the discover
/// phase's tree walk and the rebuild controller's change filter so the two
/// never disagree about what counts as source.
const IGNORED_DIR_NAMES: &[&str] = &[
    "node_modules",
    ".git",
    "target",
    "dist",
    "build",
    ".cache",
    "__pycache__",
    ".venv",
];

const IGNORED_EXTENSIONS: &[&str] = &[
    "lock", "log", "map", "min.js", "svg", "png", "jpg", "jpeg", "gif", "ico", "woff", "woff2",
];

/// True if `path` should be excluded from discovery/rebuild consideration:
/// it sits under an ignored directory, is a dotfile other than a handful of
/// recognized config files, or carries a generated-output extension.
pub fn is_ignored(path: &Path) -> bool {
    for component in path.components() {
        let name = component.as_os_str().to_string_lossy();
        if IGNORED_DIR_NAMES.contains(&name.as_ref()) {
            return true;
        }
        if name.starts_with('.') && !is_recognized_dotfile(&name) {
            return true;
        }
    }
    if let Some(file_name) = path.file_name().map(|n| n.to_string_lossy()) {
        if IGNORED_EXTENSIONS
            .iter()
            .any(|ext| file_name.ends_with(&format!(".{ext}")))
        {
            return true;
        }
    }
    false
}

fn is_recognized_dotfile(name: &str) -> bool {
    matches!(
        name,
        ".gitignore" | ".env.example" | ".editorconfig" | "." | ".."
    )
}

/// Forward-slash-normalized form of a path, used so rebuild-controller change
/// paths and discovered component paths compare equal across platforms.
pub fn normalize_to_forward_slashes(path: &str) -> String {
    path.replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn is_ignored_excludes_vendored_and_vcs_directories() {
        assert!(is_ignored(&PathBuf::from("node_modules/left-pad/index.js")));
        assert!(is_ignored(&PathBuf::from(".git/HEAD")));
        assert!(is_ignored(&PathBuf::from("target/debug/build.d")));
    }

    #[test]
    fn is_ignored_excludes_generated_extensions_but_keeps_source() {
        assert!(is_ignored(&PathBuf::from("dist/bundle.min.js")));
        assert!(!is_ignored(&PathBuf::from("src/lib.rs")));
    }

    #[test]
    fn is_ignored_keeps_recognized_dotfiles() {
        assert!(!is_ignored(&PathBuf::from(".gitignore")));
        assert!(is_ignored(&PathBuf::from(".env.local")));
    }
}
