// src/scanner/mod.rs

//! Incremental directory scanner
//!
//! Walks a source tree, classifies every candidate file and ingests new or
//! changed packages into the repository:
//! 1. repository-owned (normalized) names are skipped
//! 2. incremental: unchanged mtime for a known original name is skipped
//! 3. incremental: content already held by any record is skipped
//! 4. otherwise the file is parsed, stored and its record written
//!
//! One bad file never aborts a scan; per-file errors are collected in the
//! outcome. The manifest is not rebuilt here.

pub mod filter;
pub mod walk;

use crate::config::{RepositoryConfig, ScanningConfig, SignatureHandling};
use crate::error::{Error, Result};
use crate::hash;
use crate::normalize::explain_normalized;
use crate::packages::{ApkParser, ContainerKind, FileNameParser};
use crate::store::{self, MetadataStore, PackageVersionRecord};
use chrono::{DateTime, Utc};
use filter::PathFilter;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walk::{Visit, WalkEvent, WalkOptions};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Re-parse every candidate instead of trusting mtimes and digests
    pub full_scan: bool,
    /// Log every file at info level
    pub show_progress: bool,
}

/// How a single candidate file was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    New,
    Updated,
    Unchanged,
    /// Already a repository artifact
    Skipped,
    /// Conflicting signature under the `reject` policy
    Rejected,
    Failed,
}

/// Progress report passed to the scan callback
#[derive(Debug)]
pub struct ScanProgress<'a> {
    /// 1-based position among candidate files
    pub index: usize,
    pub path: &'a Path,
    pub status: FileStatus,
}

/// A per-file failure that did not stop the scan
#[derive(Debug)]
pub struct ScanError {
    pub path: PathBuf,
    pub error: Error,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub new: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub rejected: usize,
    pub errors: Vec<ScanError>,
}

impl ScanOutcome {
    fn record(&mut self, status: FileStatus) {
        match status {
            FileStatus::New => self.new += 1,
            FileStatus::Updated => self.updated += 1,
            FileStatus::Unchanged => self.unchanged += 1,
            FileStatus::Skipped => self.skipped += 1,
            FileStatus::Rejected => self.rejected += 1,
            FileStatus::Failed => {}
        }
    }

    /// Whether any record was written
    pub fn changed(&self) -> bool {
        self.new + self.updated > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddOptions {
    /// Move the source into the repository instead of copying it
    pub move_file: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddStatus {
    New,
    Updated,
    /// Identical content is already stored; nothing was written
    Duplicate,
}

#[derive(Debug)]
pub struct AddOutcome {
    pub record: PackageVersionRecord,
    pub status: AddStatus,
}

/// Records known to the scanner, keyed by normalized file name
#[derive(Debug, Default)]
struct KnownRecords {
    records: HashMap<String, PackageVersionRecord>,
    by_original: HashMap<String, String>,
}

impl KnownRecords {
    fn new(existing: Vec<PackageVersionRecord>) -> Self {
        let mut known = Self::default();
        for record in existing {
            known.insert(record);
        }
        known
    }

    fn by_original_name(&self, name: &str) -> Option<&PackageVersionRecord> {
        self.by_original
            .get(name)
            .and_then(|normalized| self.records.get(normalized))
    }

    fn by_normalized_name(&self, name: &str) -> Option<&PackageVersionRecord> {
        self.records.get(name)
    }

    fn has_digest(&self, sha256: &str) -> Option<&PackageVersionRecord> {
        self.records.values().find(|r| r.sha256 == sha256)
    }

    /// Record from another source file that already owns this normalized name
    fn identity_collision(&self, record: &PackageVersionRecord) -> Option<&PackageVersionRecord> {
        self.records
            .get(&record.normalized_file_name)
            .filter(|r| r.original_file_name != record.original_file_name)
    }

    /// Record signed differently from an existing one of the same version
    fn signature_conflict(&self, record: &PackageVersionRecord) -> Option<&PackageVersionRecord> {
        self.records.values().find(|r| {
            r.package_id == record.package_id
                && r.version == record.version
                && r.original_file_name != record.original_file_name
                && r.signature_digest() != record.signature_digest()
        })
    }

    fn insert(&mut self, record: PackageVersionRecord) {
        if let Some(previous) = self.by_original.get(&record.original_file_name).cloned() {
            if previous != record.normalized_file_name {
                self.records.remove(&previous);
            }
        }
        if let Some(replaced) = self.records.get(&record.normalized_file_name) {
            let stale = replaced.original_file_name.clone();
            self.by_original.remove(&stale);
        }
        self.by_original.insert(
            record.original_file_name.clone(),
            record.normalized_file_name.clone(),
        );
        self.records
            .insert(record.normalized_file_name.clone(), record);
    }
}

/// Drives parsing and storage for a source directory or a single file
pub struct Scanner<'a> {
    store: &'a MetadataStore,
    scanning: &'a ScanningConfig,
    repository: &'a RepositoryConfig,
    parser: &'a dyn ApkParser,
    progress: Option<Box<dyn FnMut(&ScanProgress<'_>) + 'a>>,
}

impl<'a> Scanner<'a> {
    pub fn new(
        store: &'a MetadataStore,
        scanning: &'a ScanningConfig,
        repository: &'a RepositoryConfig,
        parser: &'a dyn ApkParser,
    ) -> Self {
        Self {
            store,
            scanning,
            repository,
            parser,
            progress: None,
        }
    }

    /// Register a callback invoked once per candidate file
    pub fn on_progress(mut self, callback: impl FnMut(&ScanProgress<'_>) + 'a) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    fn parser(&self) -> &dyn ApkParser {
        if self.scanning.parse_apk_info {
            self.parser
        } else {
            &FileNameParser
        }
    }

    /// Scan `source_dir` against the records already in the store
    ///
    /// Fails only if the walk cannot start; everything else lands in
    /// `ScanOutcome::errors`.
    pub fn scan(
        &mut self,
        source_dir: &Path,
        existing: Vec<PackageVersionRecord>,
        options: ScanOptions,
    ) -> Result<ScanOutcome> {
        info!(
            "Scanning {} ({} scan, {} known records)",
            source_dir.display(),
            if options.full_scan { "full" } else { "incremental" },
            existing.len()
        );

        let filter = PathFilter::new(&self.scanning.include_pattern, &self.scanning.exclude_pattern)?;
        let owned_dirs = self.owned_dirs();
        let walk_options = WalkOptions {
            recursive: self.scanning.recursive,
            follow_symlinks: self.scanning.follow_symlinks,
        };

        let mut candidates = Vec::new();
        let mut outcome = ScanOutcome::default();
        walk::walk(source_dir, walk_options, |event| match event {
            WalkEvent::Directory { path, relative } => {
                if is_hidden(relative) || filter.excludes_dir(relative) || is_owned(path, &owned_dirs) {
                    debug!("Skipping directory {}", path.display());
                    Visit::SkipSubtree
                } else {
                    Visit::Continue
                }
            }
            WalkEvent::File { path, relative } => {
                if filter.accepts(relative) {
                    candidates.push(path.to_path_buf());
                }
                Visit::Continue
            }
            WalkEvent::Error(err) => {
                warn!("Cannot read entry during scan: {}", err);
                let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                outcome.errors.push(ScanError {
                    path,
                    error: Error::Walk(err),
                });
                Visit::Continue
            }
        })?;

        let mut known = KnownRecords::new(existing);
        for (i, path) in candidates.iter().enumerate() {
            let status = match self.process_file(path, &mut known, options) {
                Ok(status) => status,
                Err(error) => {
                    warn!("Failed to process {}: {}", path.display(), error);
                    outcome.errors.push(ScanError {
                        path: path.clone(),
                        error,
                    });
                    FileStatus::Failed
                }
            };
            outcome.record(status);

            if options.show_progress {
                info!("[{}/{}] {:?} {}", i + 1, candidates.len(), status, path.display());
            }
            if let Some(progress) = self.progress.as_mut() {
                progress(&ScanProgress {
                    index: i + 1,
                    path,
                    status,
                });
            }
        }

        info!(
            "Scan finished: {} new, {} updated, {} unchanged, {} skipped, {} rejected, {} error(s)",
            outcome.new,
            outcome.updated,
            outcome.unchanged,
            outcome.skipped,
            outcome.rejected,
            outcome.errors.len()
        );
        Ok(outcome)
    }

    fn process_file(
        &self,
        path: &Path,
        known: &mut KnownRecords,
        options: ScanOptions,
    ) -> Result<FileStatus> {
        let name = file_name(path)?;

        let judgement = explain_normalized(&name);
        if judgement.normalized {
            debug!("{} looks normalized ({}: {})", name, judgement.rule, judgement.reason);
            return Ok(FileStatus::Skipped);
        }

        let mtime = source_mtime(path)?;
        if !options.full_scan {
            if let Some(record) = known.by_original_name(&name) {
                if mtime <= record.updated_at {
                    debug!("{} unchanged since last scan", name);
                    return Ok(FileStatus::Unchanged);
                }
            }
        }

        let sha256 = hash::sha256_file(path)?;
        if !options.full_scan {
            if let Some(record) = known.has_digest(&sha256) {
                debug!("{} has the same content as {}", name, record.normalized_file_name);
                return Ok(FileStatus::Unchanged);
            }
        }

        let metadata = self.parser().parse(path)?;
        metadata.validate()?;
        let mut record = PackageVersionRecord::from_metadata(
            &metadata,
            &name,
            ContainerKind::from_path(path),
            sha256,
            mtime,
        );

        if let Some(holder) = known.identity_collision(&record) {
            warn!(
                "Ignoring {}: {} is already stored from {} with different content",
                name, record.normalized_file_name, holder.original_file_name
            );
            return Ok(FileStatus::Unchanged);
        }

        if self.repository.signature_handling == SignatureHandling::Reject {
            if let Some(existing) = known.signature_conflict(&record) {
                warn!(
                    "Rejecting {}: {} {} is already stored with a different signature ({})",
                    name, record.package_id, record.version, existing.normalized_file_name
                );
                return Ok(FileStatus::Rejected);
            }
        }

        let previous = known
            .by_original_name(&name)
            .or_else(|| known.by_normalized_name(&record.normalized_file_name))
            .cloned();
        if let Some(previous) = &previous {
            record.added_at = previous.added_at;
        }

        let dest = self.store.artifact_path(&record.normalized_file_name)?;
        if !holds(&dest, &record.sha256)? {
            store::copy_atomic(path, &dest)?;
            debug!("Stored {} as {}", name, record.normalized_file_name);
        }

        self.store.save(&mut record, metadata.icon.as_ref())?;
        if let Some(previous) = &previous {
            if previous.relative_info_path != record.relative_info_path {
                self.store.remove(previous)?;
            }
        }

        known.insert(record);
        Ok(if previous.is_some() {
            FileStatus::Updated
        } else {
            FileStatus::New
        })
    }

    /// Ingest a single file, optionally moving it into the repository
    pub fn add(
        &self,
        path: &Path,
        existing: Vec<PackageVersionRecord>,
        options: AddOptions,
    ) -> Result<AddOutcome> {
        let name = file_name(path)?;
        let sha256 = hash::sha256_file(path)?;
        let known = KnownRecords::new(existing);

        if let Some(record) = known.has_digest(&sha256) {
            info!("{} is already stored as {}", name, record.normalized_file_name);
            return Ok(AddOutcome {
                record: record.clone(),
                status: AddStatus::Duplicate,
            });
        }

        let metadata = self.parser().parse(path)?;
        metadata.validate()?;
        let mut record = PackageVersionRecord::from_metadata(
            &metadata,
            &name,
            ContainerKind::from_path(path),
            sha256,
            source_mtime(path)?,
        );

        if let Some(holder) = known.identity_collision(&record) {
            warn!(
                "{} is already stored from {} with different content; keeping it",
                holder.normalized_file_name, holder.original_file_name
            );
            return Ok(AddOutcome {
                record: holder.clone(),
                status: AddStatus::Duplicate,
            });
        }

        if self.repository.signature_handling == SignatureHandling::Reject {
            if let Some(existing) = known.signature_conflict(&record) {
                return Err(Error::Integrity(format!(
                    "{} {} is already stored with a different signature ({})",
                    record.package_id, record.version, existing.normalized_file_name
                )));
            }
        }

        let previous = known
            .by_original_name(&name)
            .or_else(|| known.by_normalized_name(&record.normalized_file_name))
            .cloned();
        if let Some(previous) = &previous {
            record.added_at = previous.added_at;
        }

        let dest = self.store.artifact_path(&record.normalized_file_name)?;
        if !holds(&dest, &record.sha256)? {
            if options.move_file {
                move_into(path, &dest, &record.sha256)?;
            } else {
                store::copy_atomic(path, &dest)?;
            }
        } else if options.move_file {
            warn!(
                "{} already holds this content; leaving {} in place",
                dest.display(),
                path.display()
            );
        }

        self.store.save(&mut record, metadata.icon.as_ref())?;
        if let Some(previous) = &previous {
            if previous.relative_info_path != record.relative_info_path {
                self.store.remove(previous)?;
            }
        }

        info!("Added {} {} as {}", record.package_id, record.version, record.normalized_file_name);
        let status = if previous.is_some() {
            AddStatus::Updated
        } else {
            AddStatus::New
        };
        Ok(AddOutcome { record, status })
    }

    /// Repository directories that must never be re-ingested
    fn owned_dirs(&self) -> Vec<PathBuf> {
        [self.store.apks_dir(), self.store.infos_dir(), self.store.icons_dir()]
            .into_iter()
            .filter_map(|dir| dir.canonicalize().ok())
            .collect()
    }
}

/// Move a file, falling back to copy-then-delete across filesystems
///
/// The source is removed only after the copy's digest matches.
pub fn move_into(src: &Path, dest: &Path, sha256: &str) -> Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => {
            debug!("Moved {} to {}", src.display(), dest.display());
            Ok(())
        }
        Err(e) => {
            debug!("Rename failed ({}), copying {} instead", e, src.display());
            store::copy_atomic(src, dest)?;
            hash::verify_file(dest, sha256)?;
            fs::remove_file(src).map_err(|e| Error::fs(src, e))?;
            Ok(())
        }
    }
}

/// Whether `dest` exists with exactly this content
fn holds(dest: &Path, sha256: &str) -> Result<bool> {
    if !dest.is_file() {
        return Ok(false);
    }
    Ok(hash::sha256_file(dest)?.eq_ignore_ascii_case(sha256))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| Error::Validation(format!("{} has no file name", path.display())))
}

fn source_mtime(path: &Path) -> Result<DateTime<Utc>> {
    let meta = fs::metadata(path).map_err(|e| Error::fs(path, e))?;
    Ok(meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now()))
}

fn is_hidden(relative: &Path) -> bool {
    relative
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn is_owned(path: &Path, owned: &[PathBuf]) -> bool {
    if owned.is_empty() {
        return false;
    }
    path.canonicalize()
        .map(|p| owned.contains(&p))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::{PackageMetadata, SignatureInfo};
    use std::cell::Cell;

    /// Parser that derives identity from the file content: `pkg|code|sig`
    struct ContentParser {
        calls: Cell<usize>,
    }

    impl ContentParser {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }
    }

    impl ApkParser for ContentParser {
        fn parse(&self, path: &Path) -> Result<PackageMetadata> {
            self.calls.set(self.calls.get() + 1);
            let text = fs::read_to_string(path).map_err(|e| Error::fs(path, e))?;
            let mut parts = text.trim().split('|');
            let (Some(id), Some(code)) = (parts.next(), parts.next()) else {
                return Err(Error::Parsing(format!("bad package {}", path.display())));
            };
            let version_code: u64 = code
                .parse()
                .map_err(|_| Error::Parsing(format!("bad version code in {}", path.display())))?;
            Ok(PackageMetadata {
                package_id: id.to_string(),
                version: format!("1.{}", version_code),
                version_code,
                size_bytes: text.len() as u64,
                signature: parts.next().map(SignatureInfo::new),
                ..Default::default()
            })
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        source: PathBuf,
        store: MetadataStore,
        scanning: ScanningConfig,
        repository: RepositoryConfig,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("incoming");
        fs::create_dir_all(&source).unwrap();
        let store = MetadataStore::new(dir.path().join("repo"));
        store.ensure_layout().unwrap();
        Fixture {
            _dir: dir,
            source,
            store,
            scanning: ScanningConfig::default(),
            repository: RepositoryConfig::default(),
        }
    }

    fn scan(f: &Fixture, parser: &ContentParser, options: ScanOptions) -> ScanOutcome {
        let existing = f.store.load_all().unwrap().records;
        Scanner::new(&f.store, &f.scanning, &f.repository, parser)
            .scan(&f.source, existing, options)
            .unwrap()
    }

    #[test]
    fn test_incremental_rescan_is_idempotent() {
        let f = fixture();
        fs::write(f.source.join("one.apk"), "org.example.one|1|aaaaaaaa11").unwrap();
        fs::write(f.source.join("two.apk"), "org.example.two|2").unwrap();
        let parser = ContentParser::new();

        let first = scan(&f, &parser, ScanOptions::default());
        assert_eq!((first.new, first.updated, first.unchanged), (2, 0, 0));
        assert!(f.store.apk_path("org.example.one_1_aaaaaaaa.apk").is_file());

        let second = scan(&f, &parser, ScanOptions::default());
        assert_eq!((second.new, second.updated, second.unchanged), (0, 0, 2));
        assert_eq!(parser.calls.get(), 2);
    }

    #[test]
    fn test_duplicate_content_stored_once() {
        let f = fixture();
        fs::write(f.source.join("a.apk"), "org.example.dup|3").unwrap();
        fs::write(f.source.join("b.apk"), "org.example.dup|3").unwrap();
        let parser = ContentParser::new();

        let outcome = scan(&f, &parser, ScanOptions::default());
        assert_eq!(outcome.new, 1);
        assert_eq!(outcome.unchanged, 1);
        assert_eq!(f.store.load_all().unwrap().records.len(), 1);
    }

    #[test]
    fn test_parse_failure_is_isolated() {
        let f = fixture();
        fs::write(f.source.join("1.apk"), "org.example.a|1").unwrap();
        fs::write(f.source.join("2.apk"), "garbage").unwrap();
        fs::write(f.source.join("3.apk"), "org.example.c|3").unwrap();
        let parser = ContentParser::new();

        let outcome = scan(&f, &parser, ScanOptions::default());
        assert_eq!(outcome.new, 2);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].path.ends_with("2.apk"));
        assert!(matches!(outcome.errors[0].error, Error::Parsing(_)));

        let records = f.store.load_all().unwrap().records;
        assert_eq!(records.len(), 2);
        for record in &records {
            assert!(f.store.resolve(&record.relative_file_path).unwrap().is_file());
        }
    }

    #[test]
    fn test_normalized_names_and_filters_skipped() {
        let mut f = fixture();
        f.scanning.exclude_pattern = vec!["*beta*".to_string()];
        fs::write(f.source.join("com.foo.bar_0_deadbeef.apk"), "com.foo.bar|0").unwrap();
        fs::write(f.source.join("app-beta.apk"), "org.example.beta|1").unwrap();
        fs::write(f.source.join("readme.txt"), "org.example.txt|1").unwrap();
        fs::create_dir_all(f.source.join(".cache")).unwrap();
        fs::write(f.source.join(".cache/hidden.apk"), "org.example.hidden|1").unwrap();
        let parser = ContentParser::new();

        let outcome = scan(&f, &parser, ScanOptions::default());
        assert_eq!(outcome.skipped, 1);
        assert_eq!(outcome.new, 0);
        assert_eq!(parser.calls.get(), 0);
    }

    #[test]
    fn test_changed_file_updates_record() {
        let f = fixture();
        let path = f.source.join("app.apk");
        fs::write(&path, "org.example.app|1").unwrap();
        let parser = ContentParser::new();
        scan(&f, &parser, ScanOptions::default());
        let before = f.store.load_all().unwrap().records;

        fs::write(&path, "org.example.app|2").unwrap();
        let outcome = scan(&f, &parser, ScanOptions { full_scan: true, show_progress: false });
        assert_eq!(outcome.updated, 1);

        let after = f.store.load_all().unwrap().records;
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].version_code, 2);
        assert_eq!(after[0].added_at, before[0].added_at);
        // The superseded artifact stays on disk for the verifier to report
        assert!(f.store.apk_path("org.example.app_1.apk").is_file());
    }

    #[test]
    fn test_reject_policy_skips_conflicting_signature() {
        let mut f = fixture();
        f.repository.signature_handling = SignatureHandling::Reject;
        fs::write(f.source.join("a.apk"), "org.example.app|1|11111111aa").unwrap();
        fs::write(f.source.join("b.apk"), "org.example.app|1|22222222bb").unwrap();
        let parser = ContentParser::new();

        let outcome = scan(&f, &parser, ScanOptions::default());
        assert_eq!(outcome.new, 1);
        assert_eq!(outcome.rejected, 1);
    }

    #[test]
    fn test_progress_callback_sees_every_candidate() {
        let f = fixture();
        fs::write(f.source.join("a.apk"), "org.example.a|1").unwrap();
        fs::write(f.source.join("b.apk"), "org.example.b|1").unwrap();
        let parser = ContentParser::new();
        let existing = f.store.load_all().unwrap().records;

        let mut seen = Vec::new();
        Scanner::new(&f.store, &f.scanning, &f.repository, &parser)
            .on_progress(|p| seen.push((p.index, p.status)))
            .scan(&f.source, existing, ScanOptions::default())
            .unwrap();

        assert_eq!(seen, vec![(1, FileStatus::New), (2, FileStatus::New)]);
    }

    #[test]
    fn test_add_moves_file() {
        let f = fixture();
        let path = f.source.join("app.apk");
        fs::write(&path, "org.example.app|5").unwrap();
        let parser = ContentParser::new();
        let scanner = Scanner::new(&f.store, &f.scanning, &f.repository, &parser);

        let outcome = scanner
            .add(&path, Vec::new(), AddOptions { move_file: true })
            .unwrap();
        assert_eq!(outcome.status, AddStatus::New);
        assert!(!path.exists());
        assert!(f.store.apk_path("org.example.app_5.apk").is_file());

        let records = f.store.load_all().unwrap().records;
        fs::write(&path, "org.example.app|5").unwrap();
        let again = scanner.add(&path, records, AddOptions::default()).unwrap();
        assert_eq!(again.status, AddStatus::Duplicate);
    }

    #[test]
    fn test_same_identity_from_different_bytes_keeps_first() {
        let f = fixture();
        let c1 = "org.example.same|4|aaaaaaaa11\n";
        fs::write(f.source.join("a.apk"), c1).unwrap();
        fs::write(f.source.join("b.apk"), format!("{}\n", c1)).unwrap();
        let parser = ContentParser::new();

        let first = scan(&f, &parser, ScanOptions::default());
        assert_eq!((first.new, first.updated, first.unchanged), (1, 0, 1));

        let second = scan(&f, &parser, ScanOptions::default());
        assert_eq!((second.new, second.updated), (0, 0));

        let records = f.store.load_all().unwrap().records;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].original_file_name, "a.apk");
        let stored = hash::sha256_file(&f.store.apk_path("org.example.same_4_aaaaaaaa.apk")).unwrap();
        assert_eq!(records[0].sha256, stored);

        let scanner = Scanner::new(&f.store, &f.scanning, &f.repository, &parser);
        let added = scanner
            .add(&f.source.join("b.apk"), records, AddOptions { move_file: true })
            .unwrap();
        assert_eq!(added.status, AddStatus::Duplicate);
        assert_eq!(added.record.original_file_name, "a.apk");
        assert!(f.source.join("b.apk").exists());
    }

    #[test]
    fn test_changed_bytes_replace_stored_artifact() {
        let f = fixture();
        let path = f.source.join("app.apk");
        fs::write(&path, "org.example.app|1").unwrap();
        let parser = ContentParser::new();
        scan(&f, &parser, ScanOptions::default());

        fs::write(&path, "org.example.app|1\n").unwrap();
        let outcome = scan(&f, &parser, ScanOptions { full_scan: true, show_progress: false });
        assert_eq!(outcome.updated, 1);

        let records = f.store.load_all().unwrap().records;
        let stored = hash::sha256_file(&f.store.apk_path("org.example.app_1.apk")).unwrap();
        assert_eq!(records[0].sha256, stored);
    }

    #[test]
    fn test_path_like_package_id_stays_out_of_repository() {
        let f = fixture();
        fs::write(f.source.join("evil.apk"), "../../escaped.app|1").unwrap();
        fs::write(f.source.join("good.apk"), "org.example.good|1").unwrap();
        let parser = ContentParser::new();

        let outcome = scan(&f, &parser, ScanOptions::default());
        assert_eq!(outcome.new, 1);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].path.ends_with("evil.apk"));
        assert!(matches!(outcome.errors[0].error, Error::Parsing(_)));

        let outside = f._dir.path();
        assert!(!outside.join("escaped.app_1.apk").exists());
        assert!(!outside.join("escaped.app_1.json").exists());

        let scanner = Scanner::new(&f.store, &f.scanning, &f.repository, &parser);
        let err = scanner
            .add(&f.source.join("evil.apk"), Vec::new(), AddOptions::default())
            .unwrap_err();
        assert!(matches!(err, Error::Parsing(_)));
        assert!(!outside.join("escaped.app_1.apk").exists());
    }

    #[test]
    fn test_scanning_repository_root_skips_owned_dirs() {
        let mut f = fixture();
        fs::write(f.source.join("app.apk"), "org.example.app|1").unwrap();
        let parser = ContentParser::new();
        scan(&f, &parser, ScanOptions::default());

        fs::write(f.store.apks_dir().join("stray.apk"), "org.example.stray|1").unwrap();
        fs::write(f.store.root().join("loose.apk"), "org.example.loose|2").unwrap();
        f.source = f.store.root().to_path_buf();

        let outcome = scan(&f, &parser, ScanOptions::default());
        assert_eq!((outcome.new, outcome.skipped), (1, 0));
        assert_eq!(parser.calls.get(), 2);

        let mut ids: Vec<_> = f
            .store
            .load_all()
            .unwrap()
            .records
            .into_iter()
            .map(|r| r.package_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["org.example.app", "org.example.loose"]);
    }

    #[test]
    fn test_move_into_verifies_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.apk");
        let dest = dir.path().join("dest.apk");
        fs::write(&src, b"bytes").unwrap();

        move_into(&src, &dest, &hash::sha256_bytes(b"bytes")).unwrap();
        assert!(!src.exists());
        assert_eq!(fs::read(&dest).unwrap(), b"bytes");
    }
}
