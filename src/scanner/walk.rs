// src/scanner/walk.rs

//! Depth-first directory traversal with explicit subtree skipping

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Visitor's answer for a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    SkipSubtree,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    pub recursive: bool,
    pub follow_symlinks: bool,
}

/// Something found during the walk
#[derive(Debug)]
pub enum WalkEvent<'a> {
    Directory { path: &'a Path, relative: &'a Path },
    File { path: &'a Path, relative: &'a Path },
    /// An entry below the root could not be read
    Error(walkdir::Error),
}

/// Walk `root` in sorted depth-first order, calling `visit` for each entry
///
/// Only a root that is missing or not a directory is a hard failure; errors
/// on entries below it are reported through `WalkEvent::Error`. Symlinks are
/// reported only when `follow_symlinks` is set.
pub fn walk<F>(root: &Path, options: WalkOptions, mut visit: F) -> Result<()>
where
    F: FnMut(WalkEvent<'_>) -> Visit,
{
    let meta = fs::metadata(root).map_err(|e| Error::fs(root, e))?;
    if !meta.is_dir() {
        return Err(Error::Validation(format!(
            "{} is not a directory",
            root.display()
        )));
    }

    let max_depth = if options.recursive { usize::MAX } else { 1 };
    let mut walker = WalkDir::new(root)
        .follow_links(options.follow_symlinks)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter();

    while let Some(next) = walker.next() {
        let entry = match next {
            Ok(entry) => entry,
            Err(err) => {
                visit(WalkEvent::Error(err));
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            if visit(WalkEvent::Directory { path, relative }) == Visit::SkipSubtree {
                walker.skip_current_dir();
            }
        } else if file_type.is_file() {
            visit(WalkEvent::File { path, relative });
        }
    }

    Ok(())
}
