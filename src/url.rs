// src/url.rs

//! Download URL resolution for the supported deployment modes
//!
//! - empty base: the relative path is published as-is
//! - `local`: `file://` URL under the repository root
//! - `file://<dir>`: `file://` URL under that directory
//! - `http://localhost` / `http://127.0.0.1`: local HTTP deployment
//! - anything else: remote HTTP(S) base

use crate::config::RepositoryConfig;
use std::path::{Path, PathBuf};

const FILE_SCHEME: &str = "file://";
const LOCAL_HTTP_PREFIXES: [&str; 2] = ["http://localhost", "http://127.0.0.1"];

/// Map a stored relative path to the URL published in the manifest
pub fn resolve(relative_path: &str, config: &RepositoryConfig, repo_root: &Path) -> String {
    resolve_with_base(relative_path, &config.base_url, repo_root)
}

pub fn resolve_with_base(relative_path: &str, base_url: &str, repo_root: &Path) -> String {
    let relative = relative_path.replace('\\', "/");

    if base_url.is_empty() {
        return relative;
    }

    if base_url == "local" {
        return file_url(&repo_root.join(relative.trim_start_matches('/')));
    }

    if let Some(base_path) = base_url.strip_prefix(FILE_SCHEME) {
        return file_url(&Path::new(base_path).join(relative.trim_start_matches('/')));
    }

    // Local HTTP and remote bases share the join rule
    join_url(base_url, &relative)
}

/// Map a published URL back to a file on disk
///
/// Returns `None` for remote HTTP URLs, which cannot be checked locally.
pub fn local_path(url: &str, config: &RepositoryConfig, repo_root: &Path) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix(FILE_SCHEME) {
        return Some(PathBuf::from(path));
    }

    if !url.contains("://") {
        return Some(join_relative(repo_root, url));
    }

    let base = config.base_url.as_str();
    if LOCAL_HTTP_PREFIXES.iter().any(|p| base.starts_with(p)) {
        let base = base.strip_suffix('/').unwrap_or(base);
        if let Some(rest) = url.strip_prefix(base) {
            return Some(join_relative(repo_root, rest));
        }
    }

    None
}

fn join_url(base: &str, relative: &str) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    let relative = relative.strip_prefix('/').unwrap_or(relative);
    format!("{}/{}", base, relative)
}

fn join_relative(root: &Path, relative: &str) -> PathBuf {
    relative
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .fold(root.to_path_buf(), |path, part| path.join(part))
}

fn file_url(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!(
        "{}{}",
        FILE_SCHEME,
        absolute.to_string_lossy().replace('\\', "/")
    )
}
