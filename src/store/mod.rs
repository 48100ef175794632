// src/store/mod.rs

//! Metadata store
//!
//! This module owns the on-disk repository layout:
//! - `apks/<normalizedFileName>`: stored package artifacts
//! - `infos/<stem>.json`: one `PackageVersionRecord` per artifact
//! - `infos/<stem>.<ext>`: optional icon next to its record
//! - `icons/`: reserved for exported icon sets
//!
//! All writes go through a temporary file in the destination directory
//! followed by a rename, so an interrupted scan never leaves a torn record.

pub mod models;

pub use models::{PackageVersionRecord, resolve_app_name};

use crate::error::{Error, Result};
use crate::packages::IconData;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const APKS_DIR: &str = "apks";
pub const INFOS_DIR: &str = "infos";
pub const ICONS_DIR: &str = "icons";

/// Directories every repository must contain
pub const REQUIRED_DIRS: [&str; 3] = [APKS_DIR, INFOS_DIR, ICONS_DIR];

/// A record file that could not be decoded
#[derive(Debug)]
pub struct InvalidRecord {
    pub path: PathBuf,
    pub error: String,
}

/// Everything found under `infos/`
#[derive(Debug, Default)]
pub struct StoreContents {
    pub records: Vec<PackageVersionRecord>,
    pub invalid: Vec<InvalidRecord>,
}

/// JSON-file backed record store rooted at a repository directory
#[derive(Debug, Clone)]
pub struct MetadataStore {
    root: PathBuf,
}

impl MetadataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn apks_dir(&self) -> PathBuf {
        self.root.join(APKS_DIR)
    }

    pub fn infos_dir(&self) -> PathBuf {
        self.root.join(INFOS_DIR)
    }

    pub fn icons_dir(&self) -> PathBuf {
        self.root.join(ICONS_DIR)
    }

    /// Canonical storage path for a normalized file name
    pub fn apk_path(&self, normalized_file_name: &str) -> PathBuf {
        self.apks_dir().join(normalized_file_name)
    }

    /// Like `apk_path`, but refuses names that would leave `apks/`
    pub fn artifact_path(&self, normalized_file_name: &str) -> Result<PathBuf> {
        let contained = !normalized_file_name.is_empty()
            && !normalized_file_name.contains(['/', '\\'])
            && normalized_file_name != "."
            && normalized_file_name != "..";
        if !contained {
            return Err(Error::Validation(format!(
                "'{}' is not a plain file name",
                normalized_file_name
            )));
        }
        Ok(self.apk_path(normalized_file_name))
    }

    /// Resolve a `/`-separated repository-relative path
    ///
    /// Parent (`..`) components are refused so a record can never point
    /// outside the repository root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in relative.split(['/', '\\']) {
            match part {
                "" | "." => {}
                ".." => {
                    return Err(Error::Validation(format!(
                        "'{}' escapes the repository root",
                        relative
                    )));
                }
                part => path.push(part),
            }
        }
        Ok(path)
    }

    /// Create the repository directories. Safe to call repeatedly.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in REQUIRED_DIRS {
            let path = self.root.join(dir);
            fs::create_dir_all(&path).map_err(|e| Error::fs(&path, e))?;
        }
        Ok(())
    }

    /// Persist a record, writing its icon first when one is supplied
    pub fn save(&self, record: &mut PackageVersionRecord, icon: Option<&IconData>) -> Result<()> {
        if let Some(icon) = icon {
            let relative = format!("{}/{}.{}", INFOS_DIR, record.stem(), icon.extension);
            write_atomic(&self.resolve(&relative)?, &icon.bytes)?;
            record.relative_icon_path = Some(relative);
        }

        let json = serde_json::to_vec_pretty(record)?;
        let path = self.resolve(&record.relative_info_path)?;
        write_atomic(&path, &json)?;

        debug!("Saved record {}", path.display());
        Ok(())
    }

    pub fn load(&self, path: &Path) -> Result<PackageVersionRecord> {
        let data = fs::read(path).map_err(|e| Error::fs(path, e))?;
        serde_json::from_slice(&data)
            .map_err(|e| Error::Parsing(format!("Invalid record {}: {}", path.display(), e)))
    }

    /// Read every record under `infos/`, collecting undecodable files
    ///
    /// Records are returned sorted by info path so callers see a stable order.
    pub fn load_all(&self) -> Result<StoreContents> {
        let infos = self.infos_dir();
        let mut contents = StoreContents::default();

        let entries = match fs::read_dir(&infos) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(contents),
            Err(e) => return Err(Error::fs(&infos, e)),
        };

        let mut paths = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| Error::fs(&infos, e))?.path();
            if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            match self.load(&path) {
                Ok(record) => contents.records.push(record),
                Err(e) => {
                    warn!("Skipping unreadable record: {}", e);
                    contents.invalid.push(InvalidRecord {
                        path,
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(contents)
    }

    /// Delete a record's info file and icon; the stored artifact is left alone
    pub fn remove(&self, record: &PackageVersionRecord) -> Result<()> {
        let mut paths = vec![self.resolve(&record.relative_info_path)?];
        if let Some(icon) = &record.relative_icon_path {
            paths.push(self.resolve(icon)?);
        }

        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::fs(&path, e)),
            }
        }
        Ok(())
    }
}

/// Write bytes to `path` via a temporary sibling and rename
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = parent_dir(path)?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| Error::fs(parent, e))?;
    temp.write_all(data).map_err(|e| Error::fs(path, e))?;
    temp.persist(path).map_err(|e| Error::fs(path, e.error))?;
    Ok(())
}

/// Copy a file to `dest` via a temporary sibling and rename
///
/// Returns the number of bytes copied.
pub fn copy_atomic(src: &Path, dest: &Path) -> Result<u64> {
    let parent = parent_dir(dest)?;
    let mut input = File::open(src).map_err(|e| Error::fs(src, e))?;
    let mut temp = NamedTempFile::new_in(parent).map_err(|e| Error::fs(parent, e))?;
    let copied = io::copy(&mut input, temp.as_file_mut()).map_err(|e| Error::fs(dest, e))?;
    temp.as_file().sync_all().map_err(|e| Error::fs(dest, e))?;
    temp.persist(dest).map_err(|e| Error::fs(dest, e.error))?;
    Ok(copied)
}

fn parent_dir(path: &Path) -> Result<&Path> {
    path.parent()
        .ok_or_else(|| Error::Validation(format!("{} has no parent directory", path.display())))
}
