// src/config.rs

//! Repository configuration
//!
//! Loaded from `apkhub.toml` at the repository root. Every field has a
//! default so a missing file yields a usable configuration.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

/// File name of the configuration file inside a repository root
pub const CONFIG_FILE: &str = "apkhub.toml";

/// What to do when two records share a version but differ in signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureHandling {
    /// Keep the newest under the canonical key, tag the other "alt-sig"
    #[default]
    Mark,
    /// Store both under signature-suffixed keys
    Separate,
    /// Keep the existing record, discard the incoming one
    Reject,
}

/// How hard the verifier treats trust problems
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignaturePolicy {
    Strict,
    #[default]
    Lenient,
}

/// Identity stamped into the manifest's signature block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfig {
    pub id: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    pub name: String,
    pub description: String,
    /// Empty, "local", a `file://` URL or an HTTP(S) base
    pub base_url: String,
    /// Versions kept per package by `clean`; 0 keeps everything
    pub keep_versions: usize,
    pub signature_handling: SignatureHandling,
    pub signature_policy: SignaturePolicy,
    pub verify_signatures: bool,
    pub trusted_keys: Vec<String>,
    pub signer: Option<SignerConfig>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: "APKHub Repository".to_string(),
            description: "Android package repository".to_string(),
            base_url: String::new(),
            keep_versions: 0,
            signature_handling: SignatureHandling::default(),
            signature_policy: SignaturePolicy::default(),
            verify_signatures: true,
            trusted_keys: Vec::new(),
            signer: None,
        }
    }
}

impl RepositoryConfig {
    /// Whether a certificate or signer fingerprint is on the allowlist
    ///
    /// An empty allowlist trusts nothing in particular; callers decide
    /// whether to consult it at all.
    pub fn is_trusted(&self, fingerprint: &str) -> bool {
        let wanted = normalize_fingerprint(fingerprint);
        self.trusted_keys
            .iter()
            .any(|key| normalize_fingerprint(key) == wanted)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanningConfig {
    pub recursive: bool,
    pub follow_symlinks: bool,
    pub include_pattern: Vec<String>,
    pub exclude_pattern: Vec<String>,
    /// When false, identity is taken from the file name instead of the parser
    pub parse_apk_info: bool,
}

impl Default for ScanningConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            follow_symlinks: false,
            include_pattern: vec![
                "*.apk".to_string(),
                "*.xapk".to_string(),
                "*.apkm".to_string(),
            ],
            exclude_pattern: Vec::new(),
            parse_apk_info: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub repository: RepositoryConfig,
    pub scanning: ScanningConfig,
}

impl Config {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading configuration from {}", path.display());
        let text = fs::read_to_string(path).map_err(|e| Error::fs(path, e))?;
        let config: Config = toml::from_str(&text)?;
        Ok(config)
    }

    /// Load `apkhub.toml` from a repository root, or defaults if it is absent
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            debug!("No {} in {}, using defaults", CONFIG_FILE, root.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to encode config: {}", e)))?;
        fs::write(path, text).map_err(|e| Error::fs(path, e))
    }

    /// Check the fields the rest of the system relies on
    pub fn validate(&self) -> Result<()> {
        let repo = &self.repository;
        if repo.name.trim().is_empty() {
            return Err(Error::Validation("repository.name must not be empty".to_string()));
        }

        let base = repo.base_url.as_str();
        let known_scheme = base.is_empty()
            || base == "local"
            || base.starts_with("file://")
            || base.starts_with("http://")
            || base.starts_with("https://");
        if !known_scheme {
            return Err(Error::Validation(format!(
                "repository.base_url '{}' must be empty, 'local', file:// or http(s)://",
                base
            )));
        }

        if let Some(signer) = &repo.signer {
            if signer.fingerprint.trim().is_empty() {
                return Err(Error::Validation(
                    "repository.signer.fingerprint must not be empty".to_string(),
                ));
            }
        }

        if self.scanning.include_pattern.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::Validation(
                "scanning.include_pattern contains an empty pattern".to_string(),
            ));
        }

        Ok(())
    }
}

/// Lowercase hex with `:` and whitespace removed
pub fn normalize_fingerprint(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.repository.signature_handling, SignatureHandling::Mark);
        assert_eq!(config.repository.signature_policy, SignaturePolicy::Lenient);
        assert!(config.scanning.recursive);
        assert!(!config.scanning.follow_symlinks);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [repository]
            name = "F-Droid mirror"
            base_url = "https://apk.example.org/repo/"
            signature_handling = "separate"
            signature_policy = "strict"
            trusted_keys = ["AB:CD:EF"]

            [scanning]
            exclude_pattern = ["*beta*"]
            "#,
        )
        .unwrap();

        assert_eq!(config.repository.name, "F-Droid mirror");
        assert_eq!(config.repository.signature_handling, SignatureHandling::Separate);
        assert_eq!(config.repository.signature_policy, SignaturePolicy::Strict);
        assert_eq!(config.scanning.include_pattern.len(), 3);
        assert_eq!(config.scanning.exclude_pattern, vec!["*beta*".to_string()]);
    }

    #[test]
    fn test_validate_rejects_empty_name_and_bad_url() {
        let mut config = Config::default();
        config.repository.name = "  ".to_string();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));

        let mut config = Config::default();
        config.repository.base_url = "ftp://mirror".to_string();
        assert!(matches!(config.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_trusted_fingerprint_comparison() {
        let repo = RepositoryConfig {
            trusted_keys: vec!["AB:CD:EF:01".to_string()],
            ..Default::default()
        };
        assert!(repo.is_trusted("abcdef01"));
        assert!(repo.is_trusted("ab:cd:ef:01"));
        assert!(!repo.is_trusted("abcdef02"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);

        let mut config = Config::default();
        config.repository.keep_versions = 3;
        config.save(&path).unwrap();

        let loaded = Config::load_or_default(dir.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
