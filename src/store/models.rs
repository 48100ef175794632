// src/store/models.rs

//! Persisted package records
//!
//! One `PackageVersionRecord` exists per physical package file. It is the
//! unit of truth; the manifest is derived from these records.

use crate::normalize::normalize;
use crate::packages::{ContainerKind, PackageMetadata, SignatureInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Placeholder when no localized name is known
pub const UNKNOWN_APP_NAME: &str = "Unknown";

/// Resolve a localized name map: `default`, then `en`, then the first locale
pub fn resolve_app_name(names: &BTreeMap<String, String>) -> &str {
    ["default", "en"]
        .iter()
        .filter_map(|locale| names.get(*locale))
        .chain(names.values())
        .map(String::as_str)
        .find(|name| !name.trim().is_empty())
        .unwrap_or(UNKNOWN_APP_NAME)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersionRecord {
    pub package_id: String,
    #[serde(default)]
    pub app_name: BTreeMap<String, String>,
    pub version: String,
    pub version_code: u64,
    pub size_bytes: u64,
    #[serde(default)]
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<SignatureInfo>,
    #[serde(default)]
    pub min_sdk: Option<u32>,
    #[serde(default)]
    pub target_sdk: Option<u32>,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(default)]
    pub abis: Vec<String>,
    pub container: ContainerKind,
    pub original_file_name: String,
    pub normalized_file_name: String,
    pub relative_file_path: String,
    pub relative_info_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_icon_path: Option<String>,
    pub added_at: DateTime<Utc>,
    /// Source file mtime at the last (re)scan
    pub updated_at: DateTime<Utc>,
}

impl PackageVersionRecord {
    /// Build a record from parser output
    ///
    /// `sha256` is the digest computed by the caller over the source bytes.
    pub fn from_metadata(
        metadata: &PackageMetadata,
        original_file_name: &str,
        container: ContainerKind,
        sha256: String,
        source_mtime: DateTime<Utc>,
    ) -> Self {
        let normalized_file_name = normalize(metadata, container);
        let stored_container = ContainerKind::from_path(Path::new(&normalized_file_name));

        Self {
            package_id: metadata.package_id.clone(),
            app_name: metadata.app_name.clone(),
            version: metadata.version.clone(),
            version_code: metadata.version_code,
            size_bytes: metadata.size_bytes,
            sha256,
            signature: metadata.signature.clone(),
            min_sdk: metadata.min_sdk,
            target_sdk: metadata.target_sdk,
            permissions: metadata.permissions.iter().cloned().collect(),
            features: metadata.features.iter().cloned().collect(),
            abis: metadata.abis.clone(),
            container: stored_container,
            original_file_name: original_file_name.to_string(),
            relative_file_path: format!("{}/{}", super::APKS_DIR, normalized_file_name),
            relative_info_path: format!("{}/{}.json", super::INFOS_DIR, stem(&normalized_file_name)),
            relative_icon_path: None,
            normalized_file_name,
            added_at: Utc::now(),
            updated_at: source_mtime,
        }
    }

    pub fn display_name(&self) -> &str {
        resolve_app_name(&self.app_name)
    }

    /// Full certificate digest, if the package was signed
    pub fn signature_digest(&self) -> Option<&str> {
        self.signature
            .as_ref()
            .map(|s| s.sha256.as_str())
            .filter(|d| !d.trim().is_empty())
    }

    /// First eight characters of the certificate digest
    pub fn short_signature(&self) -> Option<&str> {
        self.signature.as_ref().and_then(|s| s.short_digest())
    }

    /// File stem shared by the stored package, its info file and its icon
    pub fn stem(&self) -> &str {
        stem(&self.normalized_file_name)
    }
}

fn stem(file_name: &str) -> &str {
    file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem)
}
