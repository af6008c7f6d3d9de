//! Repository-relative path helpers
//!
//! Status records are keyed by paths relative to the repository root, always
//! `/`-separated. The root itself is `"."`.

use std::path::{Component, Path, PathBuf};

/// Relative path of the repository root
pub const ROOT: &str = ".";

/// Name of git's metadata directory, never reported as a child
pub const GIT_DIR: &str = ".git";

/// Whether `path` names the repository root
pub fn is_root(path: &str) -> bool {
    path == ROOT || path.is_empty()
}

/// Absolute filesystem path for a repository-relative path
pub fn absolute_path(repo_root: &Path, relative: &str) -> PathBuf {
    if is_root(relative) {
        repo_root.to_path_buf()
    } else {
        repo_root.join(relative)
    }
}

/// Repository-relative path for an absolute path, or None when the path is
/// outside the repository
pub fn relative_path(repo_root: &Path, absolute: &Path) -> Option<String> {
    let stripped = absolute.strip_prefix(repo_root).ok()?;
    let parts: Vec<String> = stripped
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        Some(ROOT.to_string())
    } else {
        Some(parts.join("/"))
    }
}

/// Parent directory of a relative path; None for the root
pub fn parent(path: &str) -> Option<String> {
    if is_root(path) {
        return None;
    }
    match path.trim_end_matches('/').rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => Some(parent.to_string()),
        _ => Some(ROOT.to_string()),
    }
}

/// Join a child name onto a relative directory path
pub fn join(dir: &str, name: &str) -> String {
    if is_root(dir) {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

/// Number of path components below the root (root is 0)
pub fn depth(path: &str) -> usize {
    if is_root(path) {
        0
    } else {
        path.trim_end_matches('/').matches('/').count() + 1
    }
}

/// Sort paths so the deepest come first and the root comes last
pub fn sort_deepest_first(paths: &mut [String]) {
    paths.sort_by(|a, b| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));
}

/// Whether `path` lies inside git's own metadata directory
pub fn is_git_internal(path: &str) -> bool {
    path == GIT_DIR || path.starts_with(".git/")
}
