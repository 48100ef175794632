// src/lib.rs

//! APKHub repository engine
//!
//! Turns a directory of Android package files into a content-addressed
//! repository with a derived JSON manifest.
//!
//! # Architecture
//!
//! - Records first: one JSON record per stored artifact under `infos/`
//! - Derived manifest: `apkhub_manifest.json` is rebuilt wholesale from records
//! - Content addressing: artifacts are stored under normalized names in `apks/`
//! - Incremental scans: unchanged files and known content are never re-parsed
//! - Verification: the manifest is checked against files, records and trust

pub mod config;
mod error;
pub mod hash;
pub mod manifest;
pub mod normalize;
pub mod packages;
pub mod repository;
pub mod scanner;
pub mod store;
pub mod url;
pub mod verify;

pub use error::{Error, Result, Severity};
pub use repository::Repository;
