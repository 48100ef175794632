// src/main.rs

use anyhow::Result;
use apkhub::Repository;
use apkhub::config::Config;
use apkhub::packages::{ApkParser, CommandParser, FileNameParser};
use apkhub::repository::CleanOptions;
use apkhub::scanner::{AddOptions, ScanOptions};
use apkhub::verify::{Issue, VerifyOptions};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "apkhub")]
#[command(author, version, about = "Content-addressed Android package repository manager", long_about = None)]
struct Cli {
    /// Repository root directory
    #[arg(short, long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Command that prints package metadata as JSON for a given file
    #[arg(long, global = true, env = "APKHUB_PARSER")]
    parser: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the repository layout and apkhub.toml
    Init {
        /// Repository display name
        #[arg(long)]
        name: Option<String>,
        /// Base URL for download links ("local", file://, http(s)://)
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Ingest new and changed packages from a directory
    Scan {
        /// Directory to scan
        dir: PathBuf,
        /// Re-parse every file instead of trusting mtimes and digests
        #[arg(long)]
        full: bool,
        /// Report every file
        #[arg(short, long)]
        progress: bool,
    },
    /// Add a single package file
    Add {
        /// Path to the package file
        file: PathBuf,
        /// Move the file into the repository instead of copying it
        #[arg(long = "move")]
        move_file: bool,
    },
    /// Rebuild apkhub_manifest.json from the stored records
    Build,
    /// Check the manifest against files, records and trust settings
    Verify {
        /// Also check records and icons
        #[arg(long)]
        deep: bool,
        /// Apply safe repairs and rebuild the manifest
        #[arg(long)]
        fix: bool,
        /// Delete orphaned files without asking
        #[arg(short, long, requires = "fix")]
        yes: bool,
    },
    /// Delete old versions beyond a per-package limit
    Clean {
        /// Version codes to keep per package (default: repository.keep_versions)
        #[arg(long)]
        keep: Option<usize>,
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },
    /// List packages in the manifest
    List,
}

/// Pick the metadata source for scan and add
fn select_parser(command: Option<&str>) -> Result<Box<dyn ApkParser>> {
    match command {
        Some(command) => Ok(Box::new(CommandParser::from_command_line(command)?)),
        None => {
            warn!("No --parser configured; reading package identity from file names");
            Ok(Box::new(FileNameParser))
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Ask on stdin before deleting an orphaned file
fn confirm_on_stdin(issue: &Issue) -> bool {
    let target = issue
        .file
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| issue.description.clone());
    print!("Delete {}? [y/N] ", target);
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(_) => false,
    }
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", size, UNITS[unit])
    }
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Init { name, base_url }) => {
            let mut config = Config::default();
            if let Some(name) = name {
                config.repository.name = name;
            }
            if let Some(base_url) = base_url {
                config.repository.base_url = base_url;
            }

            let repo = Repository::init(&cli.repo, config)?;
            println!(
                "Initialized repository '{}' at {}",
                repo.config().repository.name,
                repo.root().display()
            );
            Ok(())
        }
        Some(Commands::Scan {
            dir,
            full,
            progress,
        }) => {
            let repo = Repository::open(&cli.repo)?;
            let parser = select_parser(cli.parser.as_deref())?;
            let outcome = repo.scan(
                &dir,
                parser.as_ref(),
                ScanOptions {
                    full_scan: full,
                    show_progress: progress,
                },
            )?;

            println!("Scan complete:");
            println!("  New:       {}", outcome.new);
            println!("  Updated:   {}", outcome.updated);
            println!("  Unchanged: {}", outcome.unchanged);
            println!("  Skipped:   {}", outcome.skipped);
            if outcome.rejected > 0 {
                println!("  Rejected:  {}", outcome.rejected);
            }
            if !outcome.errors.is_empty() {
                println!("  Errors:    {}", outcome.errors.len());
                for error in &outcome.errors {
                    println!("    {}: {}", error.path.display(), error.error);
                }
            }
            if outcome.changed() {
                println!("Run 'apkhub build' to update the manifest");
            }
            Ok(())
        }
        Some(Commands::Add { file, move_file }) => {
            let repo = Repository::open(&cli.repo)?;
            let parser = select_parser(cli.parser.as_deref())?;
            let outcome = repo.add(&file, parser.as_ref(), AddOptions { move_file })?;

            println!(
                "{:?}: {} {} ({}) as {}",
                outcome.status,
                outcome.record.package_id,
                outcome.record.version,
                outcome.record.version_code,
                outcome.record.normalized_file_name
            );
            Ok(())
        }
        Some(Commands::Build) => {
            let repo = Repository::open(&cli.repo)?;
            let manifest = repo.update_manifest()?;
            println!(
                "Manifest written to {}: {} packages, {} versions, {}",
                repo.manifest_path().display(),
                manifest.packages.len(),
                manifest.total_package_versions,
                format_size(manifest.total_size_bytes)
            );
            Ok(())
        }
        Some(Commands::Verify { deep, fix, yes }) => {
            let repo = Repository::open(&cli.repo)?;
            let options = VerifyOptions {
                deep,
                auto_fix: fix,
            };
            let report = if yes {
                repo.verify(options, &mut |_: &Issue| true)?
            } else {
                repo.verify(options, &mut confirm_on_stdin)?
            };
            let result = &report.result;

            for issue in &result.issues {
                let marker = if issue.fixable { " (fixable)" } else { "" };
                println!("[{}] {}{}", issue.severity, issue.description, marker);
            }
            let stats = &result.stats;
            println!(
                "Verified {}/{} versions: {} missing, {} corrupted, {} orphaned, {} invalid metadata, {} missing icons, {} untrusted",
                result.valid_files,
                result.total_files,
                stats.missing,
                stats.corrupted,
                stats.orphaned,
                stats.invalid_metadata,
                stats.missing_icons,
                stats.untrusted
            );

            if fix {
                let Some(report) = &report.fixes else {
                    info!("Nothing to fix");
                    return Ok(());
                };
                for line in &report.fixed {
                    println!("Fixed: {}", line);
                }
                for line in &report.skipped {
                    println!("Skipped: {}", line);
                }
                for line in &report.failed {
                    println!("Failed: {}", line);
                }
                info!("Re-run 'apkhub verify' to confirm the repairs");
                return Ok(());
            }

            if result.has_errors() {
                return Err(anyhow::anyhow!(
                    "verification found {} error(s)",
                    result.count(apkhub::Severity::Error)
                ));
            }
            Ok(())
        }
        Some(Commands::Clean { keep, dry_run }) => {
            let repo = Repository::open(&cli.repo)?;
            let report = repo.clean(CleanOptions {
                keep_versions: keep,
                dry_run,
            })?;

            let verb = if report.dry_run { "Would remove" } else { "Removed" };
            for record in &report.removed {
                println!(
                    "{} {} {} ({})",
                    verb, record.package_id, record.version, record.normalized_file_name
                );
            }
            println!(
                "{} {} version(s), {}",
                verb,
                report.removed.len(),
                format_size(report.freed_bytes)
            );
            Ok(())
        }
        Some(Commands::List) => {
            let repo = Repository::open(&cli.repo)?;
            let manifest = repo.load_manifest()?;

            if manifest.packages.is_empty() {
                println!("No packages in {}", manifest.name);
                return Ok(());
            }
            for entry in manifest.packages.values() {
                let latest = entry
                    .latest_version()
                    .map(|v| format!("{} ({})", v.version, v.version_code))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{}  {}  latest {}  [{} version(s)]",
                    entry.package_id,
                    entry.display_name(),
                    latest,
                    entry.versions.len()
                );
            }
            println!(
                "{} packages, {} versions, {}",
                manifest.packages.len(),
                manifest.total_package_versions,
                format_size(manifest.total_size_bytes)
            );
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("APKHub v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'apkhub --help' for usage information");
            Ok(())
        }
    }
}
