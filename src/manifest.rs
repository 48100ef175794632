// src/manifest.rs

//! Manifest synthesis
//!
//! The manifest (`apkhub_manifest.json`) is a fully derived view of the
//! metadata store: records are grouped by package id and keyed by version.
//! It can always be discarded and rebuilt with `synthesize`.

use crate::config::{RepositoryConfig, SignatureHandling};
use crate::error::{Error, Result};
use crate::packages::SignatureInfo;
use crate::store::{PackageVersionRecord, write_atomic};
use crate::url;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// File name of the manifest inside a repository root
pub const MANIFEST_FILE: &str = "apkhub_manifest.json";

pub const SCHEMA_VERSION: &str = "1.0";

/// Variant tag for a version kept beside a differently-signed canonical one
pub const ALT_SIGNATURE_VARIANT: &str = "alt-sig";

/// Key fragment used in place of a certificate prefix for unsigned packages
const UNSIGNED_KEY: &str = "unsigned";

/// One version of a package as published in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionView {
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
    pub file_name: String,
    pub download_url: String,
    #[serde(default)]
    pub info_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<String>,
    pub added_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Empty for canonical versions, "alt-sig" for marked signature variants
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub signature_variant: String,
}

impl VersionView {
    fn from_record(record: &PackageVersionRecord, config: &RepositoryConfig, root: &Path) -> Self {
        Self {
            version: record.version.clone(),
            version_code: record.version_code,
            size_bytes: record.size_bytes,
            sha256: record.sha256.clone(),
            signature: record.signature.clone(),
            min_sdk: record.min_sdk,
            target_sdk: record.target_sdk,
            permissions: record.permissions.clone(),
            features: record.features.clone(),
            abis: record.abis.clone(),
            file_name: record.normalized_file_name.clone(),
            download_url: url::resolve(&record.relative_file_path, config, root),
            info_path: record.relative_info_path.clone(),
            icon_path: record.relative_icon_path.clone(),
            added_at: record.added_at,
            updated_at: record.updated_at,
            signature_variant: String::new(),
        }
    }

    pub fn signature_digest(&self) -> Option<&str> {
        self.signature
            .as_ref()
            .map(|s| s.sha256.as_str())
            .filter(|d| !d.trim().is_empty())
    }

    pub fn is_signature_variant(&self) -> bool {
        !self.signature_variant.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIndexEntry {
    pub package_id: String,
    #[serde(default)]
    pub name: BTreeMap<String, String>,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionView>,
    /// Key of the highest non-variant version; empty if there is none
    #[serde(default)]
    pub latest: String,
}

impl PackageIndexEntry {
    /// Point `latest` at the highest versionCode among non-variant versions
    pub fn recompute_latest(&mut self) {
        self.latest = self
            .versions
            .iter()
            .filter(|(_, v)| !v.is_signature_variant())
            .max_by(|(ka, a), (kb, b)| {
                a.version_code
                    .cmp(&b.version_code)
                    .then(a.updated_at.cmp(&b.updated_at))
                    .then(ka.cmp(kb))
            })
            .map(|(key, _)| key.clone())
            .unwrap_or_default();
    }

    pub fn latest_version(&self) -> Option<&VersionView> {
        self.versions.get(&self.latest)
    }

    pub fn display_name(&self) -> &str {
        crate::store::resolve_app_name(&self.name)
    }
}

/// Trust block identifying who published the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestSignature {
    pub signer: String,
    pub fingerprint: String,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIndex {
    #[serde(rename = "version")]
    pub schema_version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub packages: BTreeMap<String, PackageIndexEntry>,
    #[serde(default)]
    pub total_package_versions: usize,
    #[serde(default)]
    pub total_size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ManifestSignature>,
}

impl ManifestIndex {
    pub fn new(config: &RepositoryConfig) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            name: config.name.clone(),
            description: config.description.clone(),
            updated_at: Utc::now(),
            packages: BTreeMap::new(),
            total_package_versions: 0,
            total_size_bytes: 0,
            signature: config.signer.as_ref().map(|signer| ManifestSignature {
                signer: signer.id.clone(),
                fingerprint: signer.fingerprint.clone(),
                signed_at: Utc::now(),
            }),
        }
    }

    /// Recompute the aggregate counters from `packages`
    pub fn recompute_totals(&mut self) {
        let versions = self.packages.values().flat_map(|p| p.versions.values());
        let (count, size) = versions.fold((0usize, 0u64), |(count, size), v| {
            (count + 1, size + v.size_bytes)
        });
        self.total_package_versions = count;
        self.total_size_bytes = size;
    }

    /// Iterate `(package id, version key, version)` over every version
    pub fn versions(&self) -> impl Iterator<Item = (&str, &str, &VersionView)> {
        self.packages.iter().flat_map(|(id, entry)| {
            entry
                .versions
                .iter()
                .map(move |(key, view)| (id.as_str(), key.as_str(), view))
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|e| Error::fs(path, e))?;
        serde_json::from_slice(&data).map_err(|e| {
            Error::Configuration(format!("Invalid manifest {}: {}", path.display(), e))
        })
    }

    /// Write the manifest as pretty-printed JSON, atomically
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(path, &json)?;
        info!(
            "Wrote manifest {} ({} packages, {} versions)",
            path.display(),
            self.packages.len(),
            self.total_package_versions
        );
        Ok(())
    }
}

/// Rebuild the manifest from every known record
///
/// Records are processed in a canonical order, so the same record set always
/// produces the same `packages` and totals.
pub fn synthesize(
    records: &[PackageVersionRecord],
    config: &RepositoryConfig,
    repo_root: &Path,
) -> ManifestIndex {
    let mut manifest = ManifestIndex::new(config);

    let mut by_package: BTreeMap<&str, BTreeMap<String, Vec<&PackageVersionRecord>>> =
        BTreeMap::new();
    for record in records {
        by_package
            .entry(record.package_id.as_str())
            .or_default()
            .entry(version_key(record))
            .or_default()
            .push(record);
    }

    for (package_id, groups) in by_package {
        let mut entry = PackageIndexEntry {
            package_id: package_id.to_string(),
            ..Default::default()
        };

        let mut name_source: Option<&PackageVersionRecord> = None;
        for (key, mut group) in groups {
            group.sort_by(|a, b| newest_last(a, b));
            let group = dedup_content(group);

            for record in &group {
                let better_name = name_source.is_none_or(|current| {
                    (record.version_code, record.updated_at)
                        > (current.version_code, current.updated_at)
                });
                if better_name && !record.app_name.is_empty() {
                    name_source = Some(record);
                }
            }

            place_group(&mut entry, &key, group, config, repo_root);
        }

        if let Some(source) = name_source {
            entry.name = source.app_name.clone();
        }
        entry.recompute_latest();
        debug!(
            "Package {}: {} version(s), latest '{}'",
            entry.package_id,
            entry.versions.len(),
            entry.latest
        );
        manifest.packages.insert(entry.package_id.clone(), entry);
    }

    manifest.recompute_totals();
    manifest
}

fn version_key(record: &PackageVersionRecord) -> String {
    if record.version.trim().is_empty() {
        record.version_code.to_string()
    } else {
        record.version.clone()
    }
}

fn newest_last(a: &PackageVersionRecord, b: &PackageVersionRecord) -> std::cmp::Ordering {
    a.updated_at
        .cmp(&b.updated_at)
        .then(a.added_at.cmp(&b.added_at))
        .then(a.normalized_file_name.cmp(&b.normalized_file_name))
}

/// Drop records that are the same artifact, keeping the newest of each
fn dedup_content(group: Vec<&PackageVersionRecord>) -> Vec<&PackageVersionRecord> {
    let mut kept: Vec<&PackageVersionRecord> = Vec::with_capacity(group.len());
    for record in group.into_iter().rev() {
        let duplicate = kept.iter().any(|k| {
            k.normalized_file_name == record.normalized_file_name
                || (!k.sha256.is_empty() && k.sha256 == record.sha256)
        });
        if duplicate {
            debug!("Skipping duplicate artifact {}", record.normalized_file_name);
        } else {
            kept.push(record);
        }
    }
    kept.reverse();
    kept
}

/// Assign manifest keys to all records sharing one display version
///
/// `group` is ordered oldest to newest.
fn place_group(
    entry: &mut PackageIndexEntry,
    key: &str,
    group: Vec<&PackageVersionRecord>,
    config: &RepositoryConfig,
    root: &Path,
) {
    let signatures: BTreeSet<Option<&str>> = group.iter().map(|r| r.signature_digest()).collect();

    if signatures.len() <= 1 {
        place_same_signer(entry, key, &group, config, root);
        return;
    }

    match config.signature_handling {
        SignatureHandling::Mark => {
            let Some(newest) = group.last() else {
                return;
            };
            let canonical_sig = newest.signature_digest();
            let (same, other): (Vec<_>, Vec<_>) = group
                .iter()
                .copied()
                .partition(|r| r.signature_digest() == canonical_sig);

            place_same_signer(entry, key, &same, config, root);
            for record in other {
                let alt_key = unique_key(entry, &suffixed_key(key, record));
                let mut view = VersionView::from_record(record, config, root);
                view.signature_variant = ALT_SIGNATURE_VARIANT.to_string();
                entry.versions.insert(alt_key, view);
            }
        }
        SignatureHandling::Separate => {
            for record in group {
                let sig_key = unique_key(entry, &suffixed_key(key, record));
                entry
                    .versions
                    .insert(sig_key, VersionView::from_record(record, config, root));
            }
        }
        SignatureHandling::Reject => {
            let Some(existing) = group.first() else {
                return;
            };
            let kept_sig = existing.signature_digest();
            let (kept, rejected): (Vec<_>, Vec<_>) = group
                .iter()
                .copied()
                .partition(|r| r.signature_digest() == kept_sig);
            for record in rejected {
                warn!(
                    "Rejecting {} {}: signed by a different certificate than the existing version",
                    record.package_id, record.normalized_file_name
                );
            }
            place_same_signer(entry, key, &kept, config, root);
        }
    }
}

/// Newest record takes the canonical key; other artifacts get suffixed keys
fn place_same_signer(
    entry: &mut PackageIndexEntry,
    key: &str,
    group: &[&PackageVersionRecord],
    config: &RepositoryConfig,
    root: &Path,
) {
    let Some((newest, rest)) = group.split_last() else {
        return;
    };

    let canonical = unique_key(entry, key);
    entry
        .versions
        .insert(canonical, VersionView::from_record(newest, config, root));

    for record in rest {
        let mut extra = suffixed_key(key, record);
        if let Some(abi) = record.abis.first() {
            extra = format!("{}_{}", extra, abi);
        }
        let extra = unique_key(entry, &extra);
        entry
            .versions
            .insert(extra, VersionView::from_record(record, config, root));
    }
}

fn suffixed_key(key: &str, record: &PackageVersionRecord) -> String {
    format!("{}_{}", key, record.short_signature().unwrap_or(UNSIGNED_KEY))
}

/// First free key of `base`, `base_2`, `base_3`, ...
fn unique_key(entry: &PackageIndexEntry, base: &str) -> String {
    if !entry.versions.contains_key(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|candidate| !entry.versions.contains_key(candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{ContainerKind, PackageMetadata};
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn record(
        package_id: &str,
        version: &str,
        version_code: u64,
        signature: Option<&str>,
        sha: &str,
        mtime: i64,
    ) -> PackageVersionRecord {
        let meta = PackageMetadata {
            package_id: package_id.to_string(),
            app_name: [("en".to_string(), format!("{} app", package_id))].into(),
            version: version.to_string(),
            version_code,
            size_bytes: version_code * 100,
            signature: signature.map(SignatureInfo::new),
            ..Default::default()
        };
        let mut record = PackageVersionRecord::from_metadata(
            &meta,
            &format!("{}-{}-{}.apk", package_id, version, sha),
            ContainerKind::Apk,
            sha.repeat(8),
            at(mtime),
        );
        record.added_at = at(mtime);
        record
    }

    fn config(handling: SignatureHandling) -> RepositoryConfig {
        RepositoryConfig {
            name: "Test Repo".to_string(),
            base_url: "https://cdn.example.org/repo/".to_string(),
            signature_handling: handling,
            ..Default::default()
        }
    }

    #[test]
    fn test_groups_and_totals() {
        let records = vec![
            record("org.a", "1.0", 10, Some("aaaaaaaaff"), "01", 0),
            record("org.a", "1.1", 11, Some("aaaaaaaaff"), "02", 1),
            record("org.b", "2.0", 20, None, "03", 2),
        ];

        let manifest = synthesize(&records, &config(SignatureHandling::Mark), Path::new("/r"));

        assert_eq!(manifest.schema_version, SCHEMA_VERSION);
        assert_eq!(manifest.name, "Test Repo");
        assert_eq!(manifest.packages.len(), 2);
        assert_eq!(manifest.total_package_versions, 3);
        assert_eq!(manifest.total_size_bytes, 1000 + 1100 + 2000);

        let a = &manifest.packages["org.a"];
        assert_eq!(a.latest, "1.1");
        assert_eq!(a.display_name(), "org.a app");
        assert_eq!(
            a.versions["1.0"].download_url,
            "https://cdn.example.org/repo/apks/org.a_10_aaaaaaaa.apk"
        );
    }

    #[test]
    fn test_latest_skips_signature_variants() {
        let mut entry = PackageIndexEntry::default();
        for code in [5u64, 7, 3] {
            let rec = record("org.a", &code.to_string(), code, None, "0a", code as i64);
            let mut view = VersionView::from_record(&rec, &RepositoryConfig::default(), Path::new("/r"));
            if code == 7 {
                view.signature_variant = ALT_SIGNATURE_VARIANT.to_string();
            }
            entry.versions.insert(code.to_string(), view);
        }

        entry.recompute_latest();
        assert_eq!(entry.latest, "5");
        assert_eq!(entry.latest_version().unwrap().version_code, 5);
    }

    #[test]
    fn test_latest_empty_when_only_variants() {
        let mut entry = PackageIndexEntry::default();
        let rec = record("org.a", "1", 1, None, "0a", 0);
        let mut view = VersionView::from_record(&rec, &RepositoryConfig::default(), Path::new("/r"));
        view.signature_variant = ALT_SIGNATURE_VARIANT.to_string();
        entry.versions.insert("1".to_string(), view);

        entry.recompute_latest();
        assert!(entry.latest.is_empty());
        assert!(entry.latest_version().is_none());
    }

    #[test]
    fn test_mark_keeps_newest_canonical() {
        let records = vec![
            record("org.a", "1.0", 10, Some("11111111aa"), "01", 0),
            record("org.a", "1.0", 10, Some("22222222bb"), "02", 50),
        ];

        let manifest = synthesize(&records, &config(SignatureHandling::Mark), Path::new("/r"));
        let entry = &manifest.packages["org.a"];

        assert_eq!(entry.versions.len(), 2);
        let canonical = &entry.versions["1.0"];
        assert_eq!(canonical.signature_digest(), Some("22222222bb"));
        assert!(!canonical.is_signature_variant());

        let alt = &entry.versions["1.0_11111111"];
        assert_eq!(alt.signature_variant, ALT_SIGNATURE_VARIANT);
        assert_eq!(entry.latest, "1.0");
    }

    #[test]
    fn test_separate_suffixes_both() {
        let records = vec![
            record("org.a", "1.0", 10, Some("11111111aa"), "01", 0),
            record("org.a", "1.0", 10, Some("22222222bb"), "02", 50),
        ];

        let manifest = synthesize(&records, &config(SignatureHandling::Separate), Path::new("/r"));
        let entry = &manifest.packages["org.a"];

        let keys: Vec<&str> = entry.versions.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["1.0_11111111", "1.0_22222222"]);
        assert!(entry.versions.values().all(|v| !v.is_signature_variant()));
        assert_eq!(entry.latest, "1.0_22222222");
    }

    #[test]
    fn test_reject_keeps_existing() {
        let records = vec![
            record("org.a", "1.0", 10, Some("11111111aa"), "01", 0),
            record("org.a", "1.0", 10, Some("22222222bb"), "02", 50),
        ];

        let manifest = synthesize(&records, &config(SignatureHandling::Reject), Path::new("/r"));
        let entry = &manifest.packages["org.a"];

        assert_eq!(entry.versions.len(), 1);
        assert_eq!(entry.versions["1.0"].signature_digest(), Some("11111111aa"));
        assert_eq!(manifest.total_package_versions, 1);
    }

    #[test]
    fn test_same_signer_collision_gets_suffix() {
        let mut arm = record("org.a", "1.0", 10, Some("11111111aa"), "01", 0);
        arm.abis = vec!["arm64-v8a".to_string()];
        arm.normalized_file_name = "org.a_10_11111111_arm64v8a.apk".to_string();
        let mut x86 = record("org.a", "1.0", 10, Some("11111111aa"), "02", 10);
        x86.abis = vec!["x86".to_string()];
        x86.normalized_file_name = "org.a_10_11111111_x86.apk".to_string();

        let manifest = synthesize(&[arm, x86], &config(SignatureHandling::Mark), Path::new("/r"));
        let entry = &manifest.packages["org.a"];

        assert_eq!(entry.versions["1.0"].abis, vec!["x86".to_string()]);
        assert_eq!(entry.versions["1.0_11111111_arm64-v8a"].abis, vec!["arm64-v8a".to_string()]);
    }

    #[test]
    fn test_identical_content_listed_once() {
        let first = record("org.a", "1.0", 10, None, "01", 0);
        let mut second = first.clone();
        second.original_file_name = "copy.apk".to_string();
        second.updated_at = at(99);

        let manifest = synthesize(&[first, second], &config(SignatureHandling::Mark), Path::new("/r"));
        assert_eq!(manifest.total_package_versions, 1);
    }

    #[test]
    fn test_synthesis_is_repeatable() {
        let records = vec![
            record("org.b", "2.0", 20, Some("33333333cc"), "03", 5),
            record("org.a", "1.0", 10, Some("11111111aa"), "01", 0),
            record("org.a", "1.0", 10, Some("22222222bb"), "02", 50),
        ];
        let cfg = config(SignatureHandling::Mark);

        let first = synthesize(&records, &cfg, Path::new("/r"));
        let mut reversed = records.clone();
        reversed.reverse();
        let second = synthesize(&reversed, &cfg, Path::new("/r"));

        assert_eq!(
            serde_json::to_vec(&first.packages).unwrap(),
            serde_json::to_vec(&second.packages).unwrap()
        );
        assert_eq!(first.total_package_versions, second.total_package_versions);
        assert_eq!(first.total_size_bytes, second.total_size_bytes);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(MANIFEST_FILE);
        let mut cfg = config(SignatureHandling::Mark);
        cfg.signer = Some(crate::config::SignerConfig {
            id: "release".to_string(),
            fingerprint: "AB:CD".to_string(),
        });

        let manifest = synthesize(
            &[record("org.a", "1.0", 10, None, "01", 0)],
            &cfg,
            dir.path(),
        );
        manifest.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"version\": \"1.0\""));

        let loaded = ManifestIndex::load(&path).unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.signature.unwrap().fingerprint, "AB:CD");
    }
}
