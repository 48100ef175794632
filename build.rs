// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("apkhub")
        .version(env!("CARGO_PKG_VERSION"))
        .author("APKHub Contributors")
        .about("Content-addressed Android package repository manager")
        .subcommand_required(false)
        .arg(
            Arg::new("repo")
                .short('r')
                .long("repo")
                .value_name("DIR")
                .default_value(".")
                .global(true)
                .help("Repository root directory"),
        )
        .arg(
            Arg::new("parser")
                .long("parser")
                .value_name("CMD")
                .env("APKHUB_PARSER")
                .global(true)
                .help("Command that prints package metadata as JSON for a given file"),
        )
        .subcommand(
            Command::new("init")
                .about("Create the repository layout and apkhub.toml")
                .arg(Arg::new("name").long("name").help("Repository display name"))
                .arg(
                    Arg::new("base_url")
                        .long("base-url")
                        .help("Base URL for download links (\"local\", file://, http(s)://)"),
                ),
        )
        .subcommand(
            Command::new("scan")
                .about("Ingest new and changed packages from a directory")
                .arg(Arg::new("dir").required(true).help("Directory to scan"))
                .arg(
                    Arg::new("full")
                        .long("full")
                        .action(ArgAction::SetTrue)
                        .help("Re-parse every file instead of trusting mtimes and digests"),
                )
                .arg(
                    Arg::new("progress")
                        .short('p')
                        .long("progress")
                        .action(ArgAction::SetTrue)
                        .help("Report every file"),
                ),
        )
        .subcommand(
            Command::new("add")
                .about("Add a single package file")
                .arg(Arg::new("file").required(true).help("Path to the package file"))
                .arg(
                    Arg::new("move")
                        .long("move")
                        .action(ArgAction::SetTrue)
                        .help("Move the file into the repository instead of copying it"),
                ),
        )
        .subcommand(
            Command::new("build").about("Rebuild apkhub_manifest.json from the stored records"),
        )
        .subcommand(
            Command::new("verify")
                .about("Check the manifest against files, records and trust settings")
                .arg(
                    Arg::new("deep")
                        .long("deep")
                        .action(ArgAction::SetTrue)
                        .help("Also check records and icons"),
                )
                .arg(
                    Arg::new("fix")
                        .long("fix")
                        .action(ArgAction::SetTrue)
                        .help("Apply safe repairs and rebuild the manifest"),
                )
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .action(ArgAction::SetTrue)
                        .requires("fix")
                        .help("Delete orphaned files without asking"),
                ),
        )
        .subcommand(
            Command::new("clean")
                .about("Delete old versions beyond a per-package limit")
                .arg(
                    Arg::new("keep")
                        .long("keep")
                        .value_name("N")
                        .help("Version codes to keep per package (default: repository.keep_versions)"),
                )
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Only report what would be removed"),
                ),
        )
        .subcommand(Command::new("list").about("List packages in the manifest"))
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("apkhub.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
