// src/scanner/filter.rs

//! Include/exclude glob filtering for scan candidates

use crate::error::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::Path;

/// Include patterns are checked before exclude patterns; each pattern is
/// tried against both the file name and the path relative to the scan root.
#[derive(Debug, Clone)]
pub struct PathFilter {
    include: GlobSet,
    exclude: GlobSet,
    include_all: bool,
}

impl PathFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
            include_all: include.is_empty(),
        })
    }

    /// Whether a file should be considered at all
    pub fn accepts(&self, relative: &Path) -> bool {
        let included = self.include_all || matches(&self.include, relative);
        included && !matches(&self.exclude, relative)
    }

    /// Whether a directory's whole subtree is excluded
    pub fn excludes_dir(&self, relative: &Path) -> bool {
        matches(&self.exclude, relative)
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern).case_insensitive(true).build()?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn matches(set: &GlobSet, relative: &Path) -> bool {
    let by_name = relative
        .file_name()
        .map(|name| set.is_match(Path::new(name)))
        .unwrap_or(false);
    by_name || set.is_match(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_include_then_exclude() {
        let filter = PathFilter::new(
            &strings(&["*.apk", "*.xapk"]),
            &strings(&["*beta*", "old/**"]),
        )
        .unwrap();

        assert!(filter.accepts(Path::new("app.apk")));
        assert!(filter.accepts(Path::new("nested/APP.APK")));
        assert!(filter.accepts(Path::new("bundle.xapk")));
        assert!(!filter.accepts(Path::new("notes.txt")));
        assert!(!filter.accepts(Path::new("app-beta.apk")));
        assert!(!filter.accepts(Path::new("old/app.apk")));
    }

    #[test]
    fn test_empty_include_accepts_everything() {
        let filter = PathFilter::new(&[], &strings(&["*.tmp"])).unwrap();
        assert!(filter.accepts(Path::new("whatever.bin")));
        assert!(!filter.accepts(Path::new("partial.tmp")));
    }

    #[test]
    fn test_excluded_directories() {
        let filter = PathFilter::new(&strings(&["*.apk"]), &strings(&["archive"])).unwrap();
        assert!(filter.excludes_dir(Path::new("archive")));
        assert!(filter.excludes_dir(Path::new("mirror/archive")));
        assert!(!filter.excludes_dir(Path::new("current")));
    }

    #[test]
    fn test_invalid_pattern_is_error() {
        assert!(PathFilter::new(&strings(&["[unclosed"]), &[]).is_err());
    }
}
