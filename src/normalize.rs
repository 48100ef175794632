// src/normalize.rs

//! Canonical, content-addressed file names for stored packages
//!
//! `normalize` derives the stored name from package identity. `looks_normalized`
//! is the scanner's guard against re-ingesting files that already belong to a
//! repository. It is a heuristic: each rule in `RULES` returns a verdict with a
//! reason so its false positives and negatives can be audited.

use crate::packages::{ContainerKind, PackageMetadata};

/// ABI tokens as they appear in file name segments
const KNOWN_ABIS: &[&str] = &[
    "arm64v8a",
    "arm64-v8a",
    "armeabiv7a",
    "armeabi-v7a",
    "armeabi",
    "x86",
    "x8664",
    "mips",
    "mips64",
    "universal",
];

/// Longest version-code segment still considered repository-generated
const MAX_NORMALIZED_CODE_DIGITS: usize = 8;

/// Stored file name for a package
///
/// `{packageId}_{versionCode}[_{sig8}][_{abi}].{ext}`. The extension keeps an
/// `.xapk`/`.apkm` container only when the package declares split APKs or
/// OBB data and the original file already had that extension.
pub fn normalize(metadata: &PackageMetadata, original: ContainerKind) -> String {
    let mut name = format!("{}_{}", metadata.package_id, metadata.version_code);

    if let Some(sig) = metadata.signature.as_ref().and_then(|s| s.short_digest()) {
        name.push('_');
        name.push_str(sig);
    }

    if let Some(abi) = metadata.abis.iter().find(|a| !a.trim().is_empty()) {
        name.push('_');
        name.push_str(&strip_separators(abi));
    }

    let container = match original {
        ContainerKind::Xapk | ContainerKind::Apkm if metadata.is_bundle() => original,
        _ => ContainerKind::Apk,
    };

    format!("{}.{}", name, container.extension())
}

fn strip_separators(abi: &str) -> String {
    abi.chars().filter(|c| *c != '-' && *c != '_').collect()
}

/// Outcome of a single rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Rule does not decide; consult the next one
    Pass,
    Accept(String),
    Reject(String),
}

/// A named heuristic rule over the underscore-separated segments of a stem
///
/// Rules run in order and only see stems that earlier rules passed, so later
/// rules may index the first two segments.
pub struct Rule {
    pub name: &'static str,
    pub check: fn(&[&str]) -> Verdict,
}

/// Final judgement with the rule that decided it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub normalized: bool,
    pub rule: &'static str,
    pub reason: String,
}

pub const RULES: &[Rule] = &[
    Rule {
        name: "segment-count",
        check: segment_count,
    },
    Rule {
        name: "package-shape",
        check: package_shape,
    },
    Rule {
        name: "vendor-version-code",
        check: vendor_version_code,
    },
    Rule {
        name: "parser-sentinel",
        check: parser_sentinel,
    },
    Rule {
        name: "abi-tokens",
        check: abi_tokens,
    },
];

fn segment_count(segments: &[&str]) -> Verdict {
    if segments.len() < 3 {
        Verdict::Reject(format!("{} segment(s), need at least 3", segments.len()))
    } else {
        Verdict::Pass
    }
}

fn package_shape(segments: &[&str]) -> Verdict {
    if segments[0].contains('.') {
        Verdict::Pass
    } else {
        Verdict::Reject(format!("'{}' is not package-id shaped", segments[0]))
    }
}

fn vendor_version_code(segments: &[&str]) -> Verdict {
    let code = segments[1];
    if code.len() > MAX_NORMALIZED_CODE_DIGITS && code.chars().all(|c| c.is_ascii_digit()) {
        Verdict::Reject(format!("version code '{}' looks like a vendor original", code))
    } else {
        Verdict::Pass
    }
}

fn parser_sentinel(segments: &[&str]) -> Verdict {
    if segments[1] == "0" {
        Verdict::Accept("version code is the '0' sentinel".to_string())
    } else {
        Verdict::Pass
    }
}

fn abi_tokens(segments: &[&str]) -> Verdict {
    let hits = segments
        .iter()
        .filter(|s| KNOWN_ABIS.iter().any(|abi| abi.eq_ignore_ascii_case(s)))
        .count();
    if hits > 1 {
        Verdict::Accept(format!("{} ABI tokens", hits))
    } else {
        Verdict::Pass
    }
}

/// Run every rule against a file name and report which one decided
pub fn explain_normalized(file_name: &str) -> Judgement {
    let stem = file_name
        .rsplit_once('.')
        .filter(|(_, ext)| {
            ["apk", "xapk", "apkm"]
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .map_or(file_name, |(stem, _)| stem);
    let segments: Vec<&str> = stem.split('_').collect();

    for rule in RULES {
        match (rule.check)(&segments) {
            Verdict::Pass => continue,
            Verdict::Accept(reason) => {
                return Judgement {
                    normalized: true,
                    rule: rule.name,
                    reason,
                };
            }
            Verdict::Reject(reason) => {
                return Judgement {
                    normalized: false,
                    rule: rule.name,
                    reason,
                };
            }
        }
    }

    Judgement {
        normalized: false,
        rule: "default",
        reason: "no normalization marker".to_string(),
    }
}

/// Whether a file name appears to be a repository-owned artifact
pub fn looks_normalized(file_name: &str) -> bool {
    explain_normalized(file_name).normalized
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packages::SignatureInfo;

    fn meta(package_id: &str, version_code: u64) -> PackageMetadata {
        PackageMetadata {
            package_id: package_id.to_string(),
            version: version_code.to_string(),
            version_code,
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_plain() {
        assert_eq!(
            normalize(&meta("org.example.app", 120), ContainerKind::Apk),
            "org.example.app_120.apk"
        );
    }

    #[test]
    fn test_normalize_signature_and_abi() {
        let mut m = meta("org.example.app", 120);
        m.signature = Some(SignatureInfo::new("deadbeefcafebabe"));
        m.abis = vec!["arm64-v8a".to_string(), "x86_64".to_string()];
        assert_eq!(
            normalize(&m, ContainerKind::Apk),
            "org.example.app_120_deadbeef_arm64v8a.apk"
        );
    }

    #[test]
    fn test_container_kind_preserved_not_invented() {
        let mut bundle = meta("org.example.game", 7);
        bundle.features = vec!["split_apk".to_string()];

        assert_eq!(normalize(&bundle, ContainerKind::Xapk), "org.example.game_7.xapk");
        assert_eq!(normalize(&bundle, ContainerKind::Apkm), "org.example.game_7.apkm");
        // Declares splits, but arrived as a plain APK
        assert_eq!(normalize(&bundle, ContainerKind::Apk), "org.example.game_7.apk");

        // Arrived as .xapk without declaring splits or OBB
        let plain = meta("org.example.game", 7);
        assert_eq!(normalize(&plain, ContainerKind::Xapk), "org.example.game_7.apk");
    }

    #[test]
    fn test_normalize_deterministic_and_distinct() {
        let mut a = meta("org.example.app", 1);
        a.signature = Some(SignatureInfo::new("aaaaaaaa11"));
        let mut b = a.clone();
        b.signature = Some(SignatureInfo::new("bbbbbbbb22"));

        assert_eq!(normalize(&a, ContainerKind::Apk), normalize(&a, ContainerKind::Apk));
        assert_ne!(normalize(&a, ContainerKind::Apk), normalize(&b, ContainerKind::Apk));
        assert_ne!(
            normalize(&a, ContainerKind::Apk),
            normalize(&meta("org.example.app", 2), ContainerKind::Apk)
        );
    }

    #[test]
    fn test_looks_normalized_sentinel() {
        let judgement = explain_normalized("com.foo.bar_0_deadbeef.apk");
        assert!(judgement.normalized);
        assert_eq!(judgement.rule, "parser-sentinel");
    }

    #[test]
    fn test_looks_normalized_multiple_abis() {
        assert!(looks_normalized("com.foo.bar_31_arm64v8a_x86.apk"));
    }

    #[test]
    fn test_looks_normalized_rejections() {
        assert_eq!(explain_normalized("app-release.apk").rule, "segment-count");
        assert_eq!(explain_normalized("my_app_0.apk").rule, "package-shape");
        assert_eq!(
            explain_normalized("com.vendor.app_1234567890_arm64v8a_x86.apk").rule,
            "vendor-version-code"
        );
        assert_eq!(explain_normalized("com.foo.bar_31_deadbeef.apk").rule, "default");
    }

    #[test]
    fn test_normalized_output_is_not_always_recognized() {
        // The guard is a heuristic: a fully normalized name with a real version
        // code and a single ABI does not trip any accepting rule.
        let mut m = meta("org.example.app", 120);
        m.signature = Some(SignatureInfo::new("deadbeefcafebabe"));
        m.abis = vec!["arm64-v8a".to_string()];
        let name = normalize(&m, ContainerKind::Apk);

        assert!(!looks_normalized(&name));

        // A version-code-0 artifact is only recognized once it carries a
        // third segment
        let sentinel = normalize(&meta("org.example.app", 0), ContainerKind::Apk);
        assert_eq!(sentinel, "org.example.app_0.apk");
        assert!(!looks_normalized(&sentinel));

        let mut signed = meta("org.example.app", 0);
        signed.signature = Some(SignatureInfo::new("deadbeefcafebabe"));
        assert!(looks_normalized(&normalize(&signed, ContainerKind::Apk)));
    }
}
