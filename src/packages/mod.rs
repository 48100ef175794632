// src/packages/mod.rs

//! Package metadata capability
//!
//! Binary APK/XAPK/APKM parsing lives outside this crate. The scanner
//! consumes it through the `ApkParser` trait; `CommandParser` delegates to
//! an external tool and `FileNameParser` reads identity from file names.

pub mod command;
pub mod filename;
pub mod traits;

pub use command::CommandParser;
pub use filename::FileNameParser;
pub use traits::{ApkParser, ContainerKind, IconData, PackageMetadata, SignatureInfo};
