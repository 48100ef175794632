// src/verify.rs

//! Repository verification and safe auto-fixing
//!
//! Cross-checks the manifest against the filesystem, the metadata store and
//! the configured trust policy. Discrepancies are the verifier's normal
//! output; only failing to read the manifest itself is an error.

use crate::config::{Config, SignaturePolicy};
use crate::error::{Error, Result, Severity};
use crate::hash;
use crate::manifest::{MANIFEST_FILE, ManifestIndex, VersionView};
use crate::store::{MetadataStore, REQUIRED_DIRS};
use crate::url;
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IssueKind {
    InvalidConfig,
    MissingDirectory,
    MissingManifest,
    InvalidManifest,
    ManifestNameMismatch,
    UnsignedManifest,
    UntrustedManifest,
    MissingFile,
    MissingChecksum,
    ChecksumMismatch,
    UntrustedSignature,
    ApkCountMismatch,
    OrphanedFile,
    InvalidMetadata,
    MissingMetadata,
    MissingIcon,
    EmptyDirectory,
}

/// One discrepancy found by the verifier
///
/// `fixable` means a supported remediation exists, not that auto-fix will
/// apply it unattended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub description: String,
    pub file: Option<PathBuf>,
    pub fixable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Also check record and icon population
    pub deep: bool,
    /// Apply safe repairs afterwards; honored by `Repository::verify`
    pub auto_fix: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationStats {
    pub missing: usize,
    pub corrupted: usize,
    pub orphaned: usize,
    pub invalid_metadata: usize,
    pub missing_icons: usize,
    pub untrusted: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub issues: Vec<Issue>,
    pub stats: VerificationStats,
    /// Package versions checked
    pub total_files: usize,
    /// Package versions without warnings or errors
    pub valid_files: usize,
}

impl VerificationResult {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    pub fn has_errors(&self) -> bool {
        self.count(Severity::Error) > 0
    }

    pub fn is_clean(&self) -> bool {
        self.issues.iter().all(|i| i.severity == Severity::Info)
    }

    fn push(
        &mut self,
        kind: IssueKind,
        severity: Severity,
        description: String,
        file: Option<PathBuf>,
        fixable: bool,
    ) {
        debug!("{} {:?}: {}", severity, kind, description);
        self.issues.push(Issue {
            kind,
            severity,
            description,
            file,
            fixable,
        });
    }
}

/// What auto-fix did, issue by issue
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FixReport {
    pub fixed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// Repaired by rebuilding the manifest; settled by the caller
    pub pending_resynthesis: Vec<String>,
}

impl FixReport {
    /// Settle the issues that depended on a manifest rebuild
    pub fn resynthesized(&mut self, outcome: std::result::Result<(), String>) {
        let pending = std::mem::take(&mut self.pending_resynthesis);
        match outcome {
            Ok(()) => self.fixed.extend(pending),
            Err(e) => self
                .failed
                .extend(pending.into_iter().map(|p| format!("{} ({})", p, e))),
        }
    }
}

/// A verification run and, when auto-fix was requested, its repairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub result: VerificationResult,
    pub fixes: Option<FixReport>,
}

pub struct Verifier<'a> {
    config: &'a Config,
    store: &'a MetadataStore,
}

impl<'a> Verifier<'a> {
    pub fn new(config: &'a Config, store: &'a MetadataStore) -> Self {
        Self { config, store }
    }

    fn policy_severity(&self) -> Severity {
        match self.config.repository.signature_policy {
            SignaturePolicy::Strict => Severity::Error,
            SignaturePolicy::Lenient => Severity::Warning,
        }
    }

    pub fn verify(&self, options: VerifyOptions) -> Result<VerificationResult> {
        info!("Verifying repository at {}", self.store.root().display());
        let mut result = VerificationResult::default();

        self.check_config(&mut result);
        self.check_directories(&mut result);
        let manifest = self.check_manifest(&mut result)?;

        if let Some(manifest) = &manifest {
            self.check_versions(manifest, &mut result);
        }
        self.check_orphans(manifest.as_ref(), &mut result)?;

        if options.deep {
            self.check_population(manifest.as_ref(), &mut result)?;
        }

        info!(
            "Verification finished: {}/{} valid, {} error(s), {} warning(s)",
            result.valid_files,
            result.total_files,
            result.count(Severity::Error),
            result.count(Severity::Warning)
        );
        Ok(result)
    }

    fn check_config(&self, result: &mut VerificationResult) {
        if let Err(e) = self.config.validate() {
            result.push(
                IssueKind::InvalidConfig,
                Severity::Error,
                e.to_string(),
                None,
                false,
            );
        }
    }

    fn check_directories(&self, result: &mut VerificationResult) {
        for dir in REQUIRED_DIRS {
            let path = self.store.root().join(dir);
            if !path.is_dir() {
                result.push(
                    IssueKind::MissingDirectory,
                    Severity::Error,
                    format!("Directory {}/ is missing", dir),
                    Some(path),
                    true,
                );
            }
        }
    }

    fn check_manifest(&self, result: &mut VerificationResult) -> Result<Option<ManifestIndex>> {
        let path = self.store.root().join(MANIFEST_FILE);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                result.push(
                    IssueKind::MissingManifest,
                    Severity::Error,
                    format!("{} does not exist", MANIFEST_FILE),
                    Some(path),
                    true,
                );
                return Ok(None);
            }
            Err(e) => return Err(Error::fs(&path, e)),
        };

        let manifest: ManifestIndex = match serde_json::from_slice(&data) {
            Ok(manifest) => manifest,
            Err(e) => {
                result.push(
                    IssueKind::InvalidManifest,
                    Severity::Error,
                    format!("{} cannot be parsed: {}", MANIFEST_FILE, e),
                    Some(path),
                    true,
                );
                return Ok(None);
            }
        };

        let repo = &self.config.repository;
        if manifest.name != repo.name {
            result.push(
                IssueKind::ManifestNameMismatch,
                Severity::Warning,
                format!(
                    "Manifest name '{}' does not match configured name '{}'",
                    manifest.name, repo.name
                ),
                Some(path.clone()),
                true,
            );
        }

        if repo.verify_signatures {
            match &manifest.signature {
                None => result.push(
                    IssueKind::UnsignedManifest,
                    self.policy_severity(),
                    "Manifest carries no signer fingerprint".to_string(),
                    Some(path),
                    false,
                ),
                Some(signature) if !repo.trusted_keys.is_empty() => {
                    if !repo.is_trusted(&signature.fingerprint) {
                        result.stats.untrusted += 1;
                        result.push(
                            IssueKind::UntrustedManifest,
                            self.policy_severity(),
                            format!(
                                "Manifest signer {} ({}) is not in trusted_keys",
                                signature.signer, signature.fingerprint
                            ),
                            Some(path),
                            true,
                        );
                    }
                }
                Some(_) => {}
            }
        }

        Ok(Some(manifest))
    }

    fn check_versions(&self, manifest: &ManifestIndex, result: &mut VerificationResult) {
        let repo = &self.config.repository;

        for (package_id, key, view) in manifest.versions() {
            result.total_files += 1;
            let issues_before = result.issues.len();
            let label = format!("{} {}", package_id, key);
            let path = self.version_path(view);

            if !path.is_file() {
                result.stats.missing += 1;
                result.push(
                    IssueKind::MissingFile,
                    Severity::Error,
                    format!("{}: package file is missing", label),
                    Some(path),
                    false,
                );
                continue;
            }

            if repo.verify_signatures {
                self.check_digest(&label, &path, view, result);
            }

            if repo.verify_signatures && !repo.trusted_keys.is_empty() {
                let trusted = view.signature_digest().is_some_and(|d| repo.is_trusted(d));
                if !trusted {
                    result.stats.untrusted += 1;
                    let description = match view.signature_digest() {
                        Some(digest) => format!("{}: certificate {} is not trusted", label, digest),
                        None => format!("{}: package is unsigned", label),
                    };
                    result.push(
                        IssueKind::UntrustedSignature,
                        self.policy_severity(),
                        description,
                        Some(path),
                        true,
                    );
                }
            }

            let problems = result.issues[issues_before..]
                .iter()
                .any(|i| i.severity != Severity::Info);
            if !problems {
                result.valid_files += 1;
            }
        }
    }

    fn check_digest(&self, label: &str, path: &Path, view: &VersionView, result: &mut VerificationResult) {
        if view.sha256.trim().is_empty() {
            result.stats.invalid_metadata += 1;
            result.push(
                IssueKind::MissingChecksum,
                self.policy_severity(),
                format!("{}: no sha256 recorded", label),
                Some(path.to_path_buf()),
                false,
            );
            return;
        }

        match hash::verify_file(path, &view.sha256) {
            Ok(()) => {}
            Err(Error::Integrity(message)) => {
                result.stats.corrupted += 1;
                result.push(
                    IssueKind::ChecksumMismatch,
                    Severity::Error,
                    format!("{}: {}", label, message),
                    Some(path.to_path_buf()),
                    false,
                );
            }
            Err(e) => {
                result.stats.corrupted += 1;
                result.push(
                    IssueKind::ChecksumMismatch,
                    Severity::Error,
                    format!("{}: cannot hash file: {}", label, e),
                    Some(path.to_path_buf()),
                    false,
                );
            }
        }
    }

    /// Filesystem location of a version, following its download URL when local
    fn version_path(&self, view: &VersionView) -> PathBuf {
        url::local_path(&view.download_url, &self.config.repository, self.store.root())
            .unwrap_or_else(|| self.store.apk_path(&view.file_name))
    }

    fn check_orphans(
        &self,
        manifest: Option<&ManifestIndex>,
        result: &mut VerificationResult,
    ) -> Result<()> {
        let apks = self.store.apks_dir();
        let on_disk = match list_files(&apks) {
            Ok(files) => files,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(Error::fs(&apks, e)),
        };

        if let Some(manifest) = manifest {
            if on_disk.len() != manifest.total_package_versions {
                result.push(
                    IssueKind::ApkCountMismatch,
                    Severity::Info,
                    format!(
                        "{} file(s) in apks/, manifest lists {} version(s)",
                        on_disk.len(),
                        manifest.total_package_versions
                    ),
                    None,
                    true,
                );
            }
        }

        let mut referenced: HashSet<String> = manifest
            .map(|m| m.versions().map(|(_, _, v)| v.file_name.clone()).collect())
            .unwrap_or_default();
        let contents = self.store.load_all()?;
        referenced.extend(contents.records.into_iter().map(|r| r.normalized_file_name));

        for path in on_disk {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if !referenced.contains(&name) {
                result.stats.orphaned += 1;
                result.push(
                    IssueKind::OrphanedFile,
                    Severity::Warning,
                    format!("apks/{} is not referenced by any record", name),
                    Some(path),
                    true,
                );
            }
        }
        Ok(())
    }

    fn check_population(
        &self,
        manifest: Option<&ManifestIndex>,
        result: &mut VerificationResult,
    ) -> Result<()> {
        let contents = self.store.load_all()?;

        for invalid in &contents.invalid {
            result.stats.invalid_metadata += 1;
            result.push(
                IssueKind::InvalidMetadata,
                Severity::Error,
                invalid.error.clone(),
                Some(invalid.path.clone()),
                false,
            );
        }

        for record in &contents.records {
            if let Some(icon) = &record.relative_icon_path {
                let path = match self.store.resolve(icon) {
                    Ok(path) => path,
                    Err(e) => {
                        result.stats.invalid_metadata += 1;
                        result.push(
                            IssueKind::InvalidMetadata,
                            Severity::Error,
                            format!("{} {}: {}", record.package_id, record.version, e),
                            None,
                            false,
                        );
                        continue;
                    }
                };
                if !path.is_file() {
                    result.stats.missing_icons += 1;
                    result.push(
                        IssueKind::MissingIcon,
                        Severity::Info,
                        format!("{} {}: icon is missing", record.package_id, record.version),
                        Some(path),
                        false,
                    );
                }
            }
        }

        let Some(manifest) = manifest else {
            return Ok(());
        };

        if contents.records.is_empty() && manifest.total_package_versions > 0 {
            result.push(
                IssueKind::EmptyDirectory,
                Severity::Warning,
                format!(
                    "infos/ holds no records but the manifest lists {} version(s)",
                    manifest.total_package_versions
                ),
                Some(self.store.infos_dir()),
                true,
            );
        }

        for (package_id, key, view) in manifest.versions() {
            if view.info_path.is_empty() {
                continue;
            }
            let path = match self.store.resolve(&view.info_path) {
                Ok(path) => path,
                Err(e) => {
                    result.stats.invalid_metadata += 1;
                    result.push(
                        IssueKind::InvalidMetadata,
                        Severity::Error,
                        format!("{} {}: {}", package_id, key, e),
                        None,
                        false,
                    );
                    continue;
                }
            };
            if !path.is_file() {
                result.stats.invalid_metadata += 1;
                result.push(
                    IssueKind::MissingMetadata,
                    Severity::Warning,
                    format!("{} {}: record {} is missing", package_id, key, view.info_path),
                    Some(path),
                    true,
                );
            }
        }
        Ok(())
    }

    /// Apply the statically safe repairs
    ///
    /// Creates missing directories and deletes orphaned files the caller
    /// confirms one by one. Manifest problems are queued for the rebuild the
    /// caller runs afterwards; trust problems are never changed here.
    pub fn fix(
        &self,
        result: &VerificationResult,
        confirm: &mut dyn FnMut(&Issue) -> bool,
    ) -> FixReport {
        let mut report = FixReport::default();

        for issue in result.issues.iter().filter(|i| i.fixable) {
            match issue.kind {
                IssueKind::MissingDirectory => {
                    let Some(path) = &issue.file else {
                        continue;
                    };
                    match fs::create_dir_all(path) {
                        Ok(()) => report.fixed.push(format!("Created {}", path.display())),
                        Err(e) => report
                            .failed
                            .push(format!("Cannot create {}: {}", path.display(), e)),
                    }
                }
                IssueKind::OrphanedFile => {
                    let Some(path) = &issue.file else {
                        continue;
                    };
                    if !confirm(issue) {
                        report.skipped.push(format!("Kept {}", path.display()));
                        continue;
                    }
                    match fs::remove_file(path) {
                        Ok(()) => {
                            info!("Deleted orphaned file {}", path.display());
                            report.fixed.push(format!("Deleted {}", path.display()));
                        }
                        Err(e) => report
                            .failed
                            .push(format!("Cannot delete {}: {}", path.display(), e)),
                    }
                }
                IssueKind::MissingManifest
                | IssueKind::InvalidManifest
                | IssueKind::ManifestNameMismatch
                | IssueKind::ApkCountMismatch
                | IssueKind::MissingMetadata
                | IssueKind::EmptyDirectory => {
                    report.pending_resynthesis.push(issue.description.clone());
                }
                IssueKind::UntrustedManifest | IssueKind::UntrustedSignature => {
                    warn!("Not changing trust configuration: {}", issue.description);
                    report.skipped.push(format!(
                        "{} (update trusted_keys or replace the package)",
                        issue.description
                    ));
                }
                _ => report.skipped.push(issue.description.clone()),
            }
        }

        report
    }
}

fn list_files(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
