// SPDX-License-Identifier: MIT OR Apache-2.0
//! Emit, parse, and check the `VERIFY.sha256` bundle manifest.
//!
//! The manifest holds one `<hex>  <relative-path>` line per file in the
//! bundle (excluding itself and `envelope.yaml`), sorted lexicographically by
//! path, with a trailing newline. Emission is reproducible bit-for-bit from
//! the bundle contents.

use crate::{
    ENVELOPE_FILE, IntegrityError, VERIFY_FILE, digest_hex, fsio, hash_file_hex,
    list_files_recursive, payload_digest,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Directory holding the content-addressed payload inside a bundle.
pub const PAYLOAD_DIR: &str = "payload";

/// The four ways a bundle can fail verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    /// A per-file or aggregate hash does not match.
    HashMismatch,
    /// A file listed in VERIFY.sha256 is absent.
    MissingFile,
    /// A file exists in the bundle but is not listed.
    UnexpectedFile,
    /// The recomputed payload byte count differs from the envelope.
    SizeMismatch,
}

impl IssueKind {
    /// Stable string form (e.g. `"HASH_MISMATCH"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HashMismatch => "HASH_MISMATCH",
            Self::MissingFile => "MISSING_FILE",
            Self::UnexpectedFile => "UNEXPECTED_FILE",
            Self::SizeMismatch => "SIZE_MISMATCH",
        }
    }
}

/// One discovered verification problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationIssue {
    /// What went wrong.
    pub kind: IssueKind,
    /// Bundle-relative path the issue refers to, when file-specific.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Human-readable detail.
    pub detail: String,
}

/// Outcome of checking a whole bundle.
///
/// `errors` carries every discovered problem — checking never short-circuits
/// on the first bad hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// True iff no issues were found.
    pub valid: bool,
    /// All discovered issues, file checks first, aggregate checks last.
    pub errors: Vec<VerificationIssue>,
}

impl VerificationReport {
    /// The distinct [`IssueKind`]s present in this report.
    #[must_use]
    pub fn kinds(&self) -> BTreeSet<IssueKind> {
        self.errors.iter().map(|e| e.kind).collect()
    }
}

/// A parsed `VERIFY.sha256` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyEntry {
    /// Hex SHA-256 of the file (no `sha256:` prefix).
    pub hash: String,
    /// Bundle-relative path with `/` separators.
    pub path: String,
}

/// Error from parsing a `VERIFY.sha256` document.
#[derive(Debug, thiserror::Error)]
#[error("VERIFY.sha256 line {line}: {detail}")]
pub struct VerifyParseError {
    /// 1-based line number.
    pub line: usize,
    /// What was wrong with the line.
    pub detail: String,
}

/// Render the manifest content for the bundle at `bundle_dir`.
///
/// # Errors
///
/// Fails if the bundle tree cannot be walked or a file cannot be hashed.
pub fn verify_lines(bundle_dir: &Path) -> Result<String, IntegrityError> {
    let mut out = String::new();
    for rel in list_files_recursive(bundle_dir)? {
        if rel == VERIFY_FILE || rel == ENVELOPE_FILE {
            continue;
        }
        let hex = hash_file_hex(&bundle_dir.join(&rel))?;
        out.push_str(&hex);
        out.push_str("  ");
        out.push_str(&rel);
        out.push('\n');
    }
    Ok(out)
}

/// Emit `VERIFY.sha256` into the bundle directory (write-temp-rename).
pub fn write_verify_file(bundle_dir: &Path) -> Result<(), IntegrityError> {
    let content = verify_lines(bundle_dir)?;
    fsio::write_atomic(&bundle_dir.join(VERIFY_FILE), content.as_bytes())
}

/// Parse a `VERIFY.sha256` document into entries.
///
/// # Errors
///
/// Returns the first malformed line; a well-formed document re-emits to the
/// same byte sequence via [`emit`].
pub fn parse_verify(text: &str) -> Result<Vec<VerifyEntry>, VerifyParseError> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        let (hash, path) = line.split_once("  ").ok_or_else(|| VerifyParseError {
            line: idx + 1,
            detail: "expected '<hex>  <path>'".into(),
        })?;
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(VerifyParseError {
                line: idx + 1,
                detail: format!("'{hash}' is not a 64-char hex digest"),
            });
        }
        if path.is_empty() {
            return Err(VerifyParseError {
                line: idx + 1,
                detail: "empty path".into(),
            });
        }
        entries.push(VerifyEntry {
            hash: hash.to_ascii_lowercase(),
            path: path.to_string(),
        });
    }
    Ok(entries)
}

/// Re-render parsed entries into manifest bytes (sorted, trailing newline).
#[must_use]
pub fn emit(entries: &[VerifyEntry]) -> String {
    let mut sorted: Vec<&VerifyEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.path.cmp(&b.path));
    let mut out = String::new();
    for e in sorted {
        out.push_str(&e.hash);
        out.push_str("  ");
        out.push_str(&e.path);
        out.push('\n');
    }
    out
}

/// Check a bundle against its `VERIFY.sha256` and the envelope's declared
/// payload hash and size.
///
/// A bundle is valid iff every listed file exists with a matching digest, no
/// unlisted files exist, and the recomputed aggregate payload hash and byte
/// count equal the envelope's. All failures are accumulated.
pub fn check_bundle(
    bundle_dir: &Path,
    expected_payload_hash: &str,
    expected_payload_size: u64,
) -> VerificationReport {
    let mut errors = Vec::new();

    let expected: BTreeMap<String, String> = match std::fs::read_to_string(
        bundle_dir.join(VERIFY_FILE),
    ) {
        Ok(text) => match parse_verify(&text) {
            Ok(entries) => entries.into_iter().map(|e| (e.path, e.hash)).collect(),
            Err(e) => {
                errors.push(VerificationIssue {
                    kind: IssueKind::HashMismatch,
                    path: Some(VERIFY_FILE.to_string()),
                    detail: format!("unparseable manifest: {e}"),
                });
                BTreeMap::new()
            }
        },
        Err(_) => {
            errors.push(VerificationIssue {
                kind: IssueKind::MissingFile,
                path: Some(VERIFY_FILE.to_string()),
                detail: "bundle has no VERIFY.sha256".into(),
            });
            BTreeMap::new()
        }
    };

    for (path, want_hex) in &expected {
        let abs = bundle_dir.join(path);
        match hash_file_hex(&abs) {
            Ok(got) if &got == want_hex => {}
            Ok(got) => errors.push(VerificationIssue {
                kind: IssueKind::HashMismatch,
                path: Some(path.clone()),
                detail: format!("expected {want_hex}, found {got}"),
            }),
            Err(_) => errors.push(VerificationIssue {
                kind: IssueKind::MissingFile,
                path: Some(path.clone()),
                detail: "listed in VERIFY.sha256 but absent".into(),
            }),
        }
    }

    match list_files_recursive(bundle_dir) {
        Ok(actual) => {
            for rel in actual {
                if rel == VERIFY_FILE || rel == ENVELOPE_FILE {
                    continue;
                }
                if !expected.contains_key(&rel) {
                    errors.push(VerificationIssue {
                        kind: IssueKind::UnexpectedFile,
                        path: Some(rel.clone()),
                        detail: "present in bundle but not in VERIFY.sha256".into(),
                    });
                }
            }
        }
        Err(e) => errors.push(VerificationIssue {
            kind: IssueKind::MissingFile,
            path: None,
            detail: format!("cannot walk bundle: {e}"),
        }),
    }

    match payload_digest(&bundle_dir.join(PAYLOAD_DIR)) {
        Ok(digest) => {
            if digest_hex(&digest.hash) != digest_hex(expected_payload_hash) {
                errors.push(VerificationIssue {
                    kind: IssueKind::HashMismatch,
                    path: Some(PAYLOAD_DIR.to_string()),
                    detail: format!(
                        "aggregate payload hash {} does not match envelope {expected_payload_hash}",
                        digest.hash
                    ),
                });
            }
            if digest.size != expected_payload_size {
                errors.push(VerificationIssue {
                    kind: IssueKind::SizeMismatch,
                    path: Some(PAYLOAD_DIR.to_string()),
                    detail: format!(
                        "payload is {} bytes, envelope declares {expected_payload_size}",
                        digest.size
                    ),
                });
            }
        }
        Err(e) => errors.push(VerificationIssue {
            kind: IssueKind::MissingFile,
            path: Some(PAYLOAD_DIR.to_string()),
            detail: format!("cannot digest payload: {e}"),
        }),
    }

    VerificationReport {
        valid: errors.is_empty(),
        errors,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
