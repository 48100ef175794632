// src/repository/mod.rs

//! Repository management
//!
//! `Repository` ties the configuration, metadata store, scanner, manifest
//! synthesizer and verifier to one repository root. Records and the manifest
//! are updated by separate calls: scanning never rebuilds the manifest.

use crate::config::{CONFIG_FILE, Config};
use crate::error::{Error, Result};
use crate::manifest::{MANIFEST_FILE, ManifestIndex, synthesize};
use crate::packages::ApkParser;
use crate::scanner::{AddOptions, AddOutcome, ScanOptions, ScanOutcome, Scanner};
use crate::store::{MetadataStore, PackageVersionRecord};
use crate::verify::{FixReport, Issue, VerificationResult, Verifier, VerifyOptions, VerifyReport};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanOptions {
    /// Distinct version codes to keep per package; `None` uses the config
    pub keep_versions: Option<usize>,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct CleanReport {
    pub removed: Vec<PackageVersionRecord>,
    pub freed_bytes: u64,
    pub dry_run: bool,
}

/// Counts taken from the metadata store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryStats {
    pub packages: usize,
    pub versions: usize,
    pub total_size_bytes: u64,
    pub invalid_records: usize,
}

#[derive(Debug)]
pub struct Repository {
    config: Config,
    store: MetadataStore,
}

impl Repository {
    /// Create the repository layout and configuration file
    ///
    /// Re-running on an initialized root keeps the existing configuration.
    pub fn init(root: impl Into<PathBuf>, config: Config) -> Result<Self> {
        let root = root.into();
        let store = MetadataStore::new(&root);
        store.ensure_layout()?;

        let config_path = root.join(CONFIG_FILE);
        let config = if config_path.exists() {
            info!("{} already exists, keeping it", config_path.display());
            Config::load(&config_path)?
        } else {
            config.validate()?;
            config.save(&config_path)?;
            config
        };

        info!("Initialized repository '{}' at {}", config.repository.name, root.display());
        Ok(Self { config, store })
    }

    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::fs(
                &root,
                io::Error::new(io::ErrorKind::NotFound, "repository root does not exist"),
            ));
        }

        let config = Config::load_or_default(&root)?;
        config.validate()?;
        debug!("Opened repository '{}' at {}", config.repository.name, root.display());
        Ok(Self {
            config,
            store: MetadataStore::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root().join(MANIFEST_FILE)
    }

    /// A scanner bound to this repository, for callers that want progress
    pub fn scanner<'a>(&'a self, parser: &'a dyn ApkParser) -> Scanner<'a> {
        Scanner::new(
            &self.store,
            &self.config.scanning,
            &self.config.repository,
            parser,
        )
    }

    pub fn scan(
        &self,
        source: &Path,
        parser: &dyn ApkParser,
        options: ScanOptions,
    ) -> Result<ScanOutcome> {
        self.store.ensure_layout()?;
        let existing = self.store.load_all()?.records;
        self.scanner(parser).scan(source, existing, options)
    }

    pub fn add(
        &self,
        file: &Path,
        parser: &dyn ApkParser,
        options: AddOptions,
    ) -> Result<AddOutcome> {
        self.store.ensure_layout()?;
        let existing = self.store.load_all()?.records;
        self.scanner(parser).add(file, existing, options)
    }

    /// Rebuild the manifest from every record and write it atomically
    pub fn update_manifest(&self) -> Result<ManifestIndex> {
        let contents = self.store.load_all()?;
        if !contents.invalid.is_empty() {
            warn!(
                "{} record(s) could not be read and are left out of the manifest",
                contents.invalid.len()
            );
        }

        let manifest = synthesize(&contents.records, &self.config.repository, self.root());
        manifest.save(&self.manifest_path())?;
        Ok(manifest)
    }

    pub fn load_manifest(&self) -> Result<ManifestIndex> {
        ManifestIndex::load(&self.manifest_path())
    }

    /// Check the repository, then repair it if `options.auto_fix` is set
    ///
    /// `confirm` is only consulted by the repair step.
    pub fn verify(
        &self,
        options: VerifyOptions,
        confirm: &mut dyn FnMut(&Issue) -> bool,
    ) -> Result<VerifyReport> {
        let result = Verifier::new(&self.config, &self.store).verify(options)?;
        let fixes = if options.auto_fix && !result.is_clean() {
            Some(self.fix(&result, confirm))
        } else {
            None
        };
        Ok(VerifyReport { result, fixes })
    }

    /// Apply safe repairs, then rebuild the manifest
    ///
    /// `confirm` is asked once per orphaned file before it is deleted.
    pub fn fix(
        &self,
        result: &VerificationResult,
        confirm: &mut dyn FnMut(&Issue) -> bool,
    ) -> FixReport {
        let mut report = Verifier::new(&self.config, &self.store).fix(result, confirm);
        let rebuilt = self.update_manifest().map(|_| ()).map_err(|e| e.to_string());
        if let Err(e) = &rebuilt {
            warn!("Manifest rebuild after fix failed: {}", e);
        }
        report.resynthesized(rebuilt);
        report
    }

    /// Delete versions beyond the newest `keep_versions` version codes per package
    ///
    /// A limit of 0 keeps everything. Unless this is a dry run, the manifest
    /// is rebuilt when anything was removed.
    pub fn clean(&self, options: CleanOptions) -> Result<CleanReport> {
        let keep = options
            .keep_versions
            .unwrap_or(self.config.repository.keep_versions);
        let mut report = CleanReport {
            dry_run: options.dry_run,
            ..Default::default()
        };
        if keep == 0 {
            info!("keep_versions is 0, nothing to clean");
            return Ok(report);
        }

        let records = self.store.load_all()?.records;
        report.removed = expired(records, keep);

        for record in &report.removed {
            report.freed_bytes += record.size_bytes;
            if options.dry_run {
                info!(
                    "Would remove {} {} ({})",
                    record.package_id, record.version, record.normalized_file_name
                );
                continue;
            }

            let apk = self.store.artifact_path(&record.normalized_file_name)?;
            match fs::remove_file(&apk) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} was already gone", apk.display());
                }
                Err(e) => return Err(Error::fs(&apk, e)),
            }
            self.store.remove(record)?;
            info!(
                "Removed {} {} ({})",
                record.package_id, record.version, record.normalized_file_name
            );
        }

        if !options.dry_run && !report.removed.is_empty() {
            self.update_manifest()?;
        }
        Ok(report)
    }

    pub fn stats(&self) -> Result<RepositoryStats> {
        let contents = self.store.load_all()?;
        let packages: BTreeSet<&str> = contents
            .records
            .iter()
            .map(|r| r.package_id.as_str())
            .collect();

        Ok(RepositoryStats {
            packages: packages.len(),
            versions: contents.records.len(),
            total_size_bytes: contents.records.iter().map(|r| r.size_bytes).sum(),
            invalid_records: contents.invalid.len(),
        })
    }
}

/// Records outside the newest `keep` version codes of their package
fn expired(records: Vec<PackageVersionRecord>, keep: usize) -> Vec<PackageVersionRecord> {
    let mut by_package: BTreeMap<String, Vec<PackageVersionRecord>> = BTreeMap::new();
    for record in records {
        by_package
            .entry(record.package_id.clone())
            .or_default()
            .push(record);
    }

    let mut expired = Vec::new();
    for (_, records) in by_package {
        let codes: BTreeSet<u64> = records.iter().map(|r| r.version_code).collect();
        let kept: BTreeSet<u64> = codes.into_iter().rev().take(keep).collect();
        expired.extend(
            records
                .into_iter()
                .filter(|r| !kept.contains(&r.version_code)),
        );
    }
    expired
}
