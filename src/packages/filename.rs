// src/packages/filename.rs

//! Identity from file names, for repositories that skip full parsing
//!
//! Accepts `<packageId>_<versionCode>[_anything].<ext>`.

use super::traits::{ApkParser, PackageMetadata};
use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct FileNameParser;

impl ApkParser for FileNameParser {
    fn parse(&self, path: &Path) -> Result<PackageMetadata> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::Parsing(format!("Unreadable file name: {}", path.display())))?;

        let mut segments = stem.split('_');
        let package_id = segments.next().unwrap_or_default();
        let version_code = segments.next().and_then(|s| s.parse::<u64>().ok());

        let version_code = match version_code {
            Some(code) if package_id.contains('.') => code,
            _ => {
                return Err(Error::Parsing(format!(
                    "Cannot derive package id and version code from {}",
                    path.display()
                )));
            }
        };

        let size_bytes = fs::metadata(path).map_err(|e| Error::fs(path, e))?.len();

        Ok(PackageMetadata {
            package_id: package_id.to_string(),
            version: version_code.to_string(),
            version_code,
            size_bytes,
            ..Default::default()
        })
    }
}
