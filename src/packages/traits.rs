// src/packages/traits.rs

//! Common types for package metadata providers

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Signing certificate facts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    /// Hex SHA-256 of the signing certificate
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
}

impl SignatureInfo {
    pub fn new(sha256: impl Into<String>) -> Self {
        Self {
            sha256: sha256.into(),
            signer: None,
            algorithm: None,
        }
    }

    /// First eight characters of the certificate digest, if any
    pub fn short_digest(&self) -> Option<&str> {
        let digest = self.sha256.trim();
        if digest.is_empty() {
            None
        } else {
            let end = digest.char_indices().nth(8).map_or(digest.len(), |(i, _)| i);
            Some(&digest[..end])
        }
    }
}

/// Icon bytes extracted by the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IconData {
    pub bytes: Vec<u8>,
    /// Extension without the dot, e.g. "png"
    pub extension: String,
}

/// Container format of a package file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Apk,
    Xapk,
    Apkm,
}

impl ContainerKind {
    /// Detect the container from a file name's extension
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("xapk") => ContainerKind::Xapk,
            Some("apkm") => ContainerKind::Apkm,
            _ => ContainerKind::Apk,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ContainerKind::Apk => "apk",
            ContainerKind::Xapk => "xapk",
            ContainerKind::Apkm => "apkm",
        }
    }
}

/// Everything the parser reports about one package file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    pub package_id: String,
    pub app_name: BTreeMap<String, String>,
    pub version: String,
    pub version_code: u64,
    pub min_sdk: Option<u32>,
    pub target_sdk: Option<u32>,
    pub size_bytes: u64,
    /// Parser-reported digest; the scanner recomputes it regardless
    pub sha256: Option<String>,
    pub signature: Option<SignatureInfo>,
    pub permissions: Vec<String>,
    pub features: Vec<String>,
    pub abis: Vec<String>,
    pub icon: Option<IconData>,
}

impl PackageMetadata {
    /// Whether the package declares split APKs or OBB data
    pub fn is_bundle(&self) -> bool {
        self.features
            .iter()
            .any(|f| f == "split_apk" || f == "has_obb")
    }

    /// Reject values that cannot safely become part of a stored file name
    ///
    /// The package id, certificate digest, first ABI and icon extension all
    /// end up in paths under the repository root.
    pub fn validate(&self) -> Result<()> {
        if !is_package_id(&self.package_id) {
            return Err(Error::Parsing(format!(
                "'{}' is not a valid package id",
                self.package_id
            )));
        }

        if let Some(abi) = self
            .abis
            .iter()
            .find(|abi| !abi.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(Error::Parsing(format!("'{}' is not a valid ABI", abi)));
        }

        if let Some(signature) = &self.signature {
            let digest = signature.sha256.trim();
            if !digest.chars().all(|c| c.is_ascii_alphanumeric() || c == ':') {
                return Err(Error::Parsing(format!(
                    "'{}' is not a certificate digest",
                    signature.sha256
                )));
            }
        }

        if let Some(icon) = &self.icon {
            if icon.extension.is_empty() || !icon.extension.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(Error::Parsing(format!(
                    "'{}' is not a valid icon extension",
                    icon.extension
                )));
            }
        }

        Ok(())
    }
}

/// Dotted identifier made of ASCII letters, digits and underscores
fn is_package_id(id: &str) -> bool {
    !id.is_empty()
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && id.split('.').all(|segment| !segment.is_empty())
}

/// Extracts package metadata from a file on disk
///
/// Failures are returned as `Error::Parsing` and treated by the scanner as
/// soft, per-file errors.
pub trait ApkParser {
    fn parse(&self, path: &Path) -> Result<PackageMetadata>;
}

impl<P: ApkParser + ?Sized> ApkParser for &P {
    fn parse(&self, path: &Path) -> Result<PackageMetadata> {
        (**self).parse(path)
    }
}

impl<P: ApkParser + ?Sized> ApkParser for Box<P> {
    fn parse(&self, path: &Path) -> Result<PackageMetadata> {
        (**self).parse(path)
    }
}
