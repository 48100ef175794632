// src/packages/command.rs

//! External command parser
//!
//! Runs `<program> [args...] <package path>` and decodes a JSON document
//! from its standard output:
//!
//! ```json
//! {
//!   "package_id": "org.example.app",
//!   "app_name": {"default": "Example", "de": "Beispiel"},
//!   "version": "1.2.0",
//!   "version_code": 120,
//!   "signature": {"sha256": "ab12..."},
//!   "abis": ["arm64-v8a"],
//!   "icon_path": "/tmp/icon.png"
//! }
//! ```

use super::traits::{ApkParser, IconData, PackageMetadata, SignatureInfo};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, warn};

/// Parser output as emitted by the external tool
#[derive(Debug, Deserialize)]
struct ParserOutput {
    package_id: String,
    #[serde(default)]
    app_name: BTreeMap<String, String>,
    version: String,
    version_code: u64,
    #[serde(default)]
    min_sdk: Option<u32>,
    #[serde(default)]
    target_sdk: Option<u32>,
    #[serde(default)]
    size_bytes: Option<u64>,
    #[serde(default)]
    sha256: Option<String>,
    #[serde(default)]
    signature: Option<SignatureInfo>,
    #[serde(default)]
    permissions: Vec<String>,
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    abis: Vec<String>,
    #[serde(default)]
    icon_path: Option<PathBuf>,
}

/// Delegates parsing to an external program
#[derive(Debug, Clone)]
pub struct CommandParser {
    program: String,
    args: Vec<String>,
}

impl CommandParser {
    /// Build a parser from a shell-like command line (split on whitespace)
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Validation("Parser command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    fn decode(&self, path: &Path, stdout: &[u8]) -> Result<PackageMetadata> {
        let output: ParserOutput = serde_json::from_slice(stdout).map_err(|e| {
            Error::Parsing(format!("Invalid parser output for {}: {}", path.display(), e))
        })?;

        let size_bytes = match output.size_bytes {
            Some(size) => size,
            None => fs::metadata(path).map_err(|e| Error::fs(path, e))?.len(),
        };

        let icon = match output.icon_path {
            Some(icon_path) => {
                let extension = icon_path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("png")
                    .to_string();
                match fs::read(&icon_path) {
                    Ok(bytes) => Some(IconData { bytes, extension }),
                    Err(e) => {
                        warn!(
                            "Ignoring unreadable icon {} for {}: {}",
                            icon_path.display(),
                            path.display(),
                            e
                        );
                        None
                    }
                }
            }
            None => None,
        };

        let metadata = PackageMetadata {
            package_id: output.package_id,
            app_name: output.app_name,
            version: output.version,
            version_code: output.version_code,
            min_sdk: output.min_sdk,
            target_sdk: output.target_sdk,
            size_bytes,
            sha256: output.sha256,
            signature: output.signature,
            permissions: output.permissions,
            features: output.features,
            abis: output.abis,
            icon,
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

impl ApkParser for CommandParser {
    fn parse(&self, path: &Path) -> Result<PackageMetadata> {
        debug!("Running parser {} for {}", self.program, path.display());

        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|e| Error::Parsing(format!("Failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(Error::Parsing(format!(
                "{} failed for {} ({}): {}",
                self.program,
                path.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        self.decode(path, &output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_command_rejected() {
        assert!(matches!(
            CommandParser::from_command_line("   "),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_decode_fills_size_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let apk = dir.path().join("app.apk");
        std::fs::write(&apk, vec![0u8; 42]).unwrap();

        let parser = CommandParser::from_command_line("apk-info --json").unwrap();
        let meta = parser
            .decode(
                &apk,
                br#"{"package_id":"org.example.app","version":"1.0","version_code":10,
                     "app_name":{"en":"Example"},"abis":["arm64-v8a"]}"#,
            )
            .unwrap();

        assert_eq!(meta.package_id, "org.example.app");
        assert_eq!(meta.version_code, 10);
        assert_eq!(meta.size_bytes, 42);
        assert_eq!(meta.abis, vec!["arm64-v8a".to_string()]);
        assert!(meta.icon.is_none());
    }

    #[test]
    fn test_decode_rejects_path_like_package_id() {
        let parser = CommandParser::from_command_line("apk-info").unwrap();
        let result = parser.decode(
            Path::new("x.apk"),
            br#"{"package_id":"../../escaped.app","version":"1","version_code":1,"size_bytes":1}"#,
        );
        assert!(matches!(result, Err(Error::Parsing(_))));

        let result = parser.decode(
            Path::new("x.apk"),
            br#"{"package_id":"  ","version":"1","version_code":1,"size_bytes":1}"#,
        );
        assert!(matches!(result, Err(Error::Parsing(_))));
    }

    #[test]
    fn test_unreadable_icon_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.png");
        let json = format!(
            r#"{{"package_id":"org.example.app","version":"1","version_code":1,"size_bytes":1,"icon_path":{}}}"#,
            serde_json::to_string(&missing).unwrap()
        );

        let parser = CommandParser::from_command_line("apk-info").unwrap();
        let meta = parser.decode(Path::new("x.apk"), json.as_bytes()).unwrap();
        assert_eq!(meta.package_id, "org.example.app");
        assert!(meta.icon.is_none());
    }

    #[test]
    fn test_decode_garbage_is_parse_error() {
        let parser = CommandParser::from_command_line("apk-info").unwrap();
        let result = parser.decode(Path::new("x.apk"), b"not json");
        assert!(matches!(result, Err(Error::Parsing(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_command_is_parse_error() {
        let parser = CommandParser::from_command_line("false").unwrap();
        let result = parser.parse(Path::new("x.apk"));
        assert!(matches!(result, Err(Error::Parsing(_))));
    }
}
