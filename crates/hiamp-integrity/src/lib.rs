// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-integrity
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fsio;
pub mod verify;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use walkdir::WalkDir;

/// Prefix carried by every self-describing digest string.
pub const DIGEST_PREFIX: &str = "sha256:";

/// Name of the bundle-level hash manifest.
pub const VERIFY_FILE: &str = "VERIFY.sha256";

/// Name of the bundle envelope file.
pub const ENVELOPE_FILE: &str = "envelope.yaml";

/// Errors from hashing and tree-walking operations.
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    /// Reading a file or directory failed.
    #[error("I/O on {path}: {source}")]
    Io {
        /// Path that failed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Walking a directory tree failed.
    #[error("walk {dir}: {source}")]
    Walk {
        /// Directory being walked.
        dir: String,
        /// Underlying error.
        #[source]
        source: walkdir::Error,
    },

    /// A path inside a tree was not valid UTF-8.
    #[error("non-UTF-8 path under {dir}")]
    NonUtf8Path {
        /// Directory being walked.
        dir: String,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> IntegrityError {
    IntegrityError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Hash a byte buffer, returning `sha256:<64hex>`.
///
/// # Examples
///
/// ```
/// let d = hiamp_integrity::hash_bytes(b"hello");
/// assert!(d.starts_with("sha256:"));
/// assert_eq!(d.len(), 7 + 64);
/// ```
#[must_use]
pub fn hash_bytes(bytes: &[u8]) -> String {
    format!("{DIGEST_PREFIX}{}", hex_digest(bytes))
}

/// Hex SHA-256 of a byte buffer, without the `sha256:` prefix.
#[must_use]
pub fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Hash a file by streaming its contents, returning `sha256:<64hex>`.
///
/// # Errors
///
/// Returns [`IntegrityError::Io`] if the file cannot be opened or read.
pub fn hash_file(path: &Path) -> Result<String, IntegrityError> {
    Ok(format!("{DIGEST_PREFIX}{}", hash_file_hex(path)?))
}

/// Hex SHA-256 of a file, streamed in 64 KiB chunks.
pub fn hash_file_hex(path: &Path) -> Result<String, IntegrityError> {
    let mut file = File::open(path).map_err(|e| io_err(path, e))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(|e| io_err(path, e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Strip the `sha256:` prefix from a digest string, if present.
#[must_use]
pub fn digest_hex(digest: &str) -> &str {
    digest.strip_prefix(DIGEST_PREFIX).unwrap_or(digest)
}

/// List every regular file under `dir`, relative to `dir`, with `/`
/// separators, sorted lexicographically.
///
/// Symlinks are not followed and do not appear in the listing.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or a path is not UTF-8.
pub fn list_files_recursive(dir: &Path) -> Result<Vec<String>, IntegrityError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| IntegrityError::Walk {
            dir: dir.display().to_string(),
            source: e,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        let mut segments = Vec::new();
        for part in rel.components() {
            let s = part
                .as_os_str()
                .to_str()
                .ok_or_else(|| IntegrityError::NonUtf8Path {
                    dir: dir.display().to_string(),
                })?;
            segments.push(s);
        }
        files.push(segments.join("/"));
    }
    files.sort();
    Ok(files)
}

/// Deterministic digest over a whole payload tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadDigest {
    /// Aggregate hash (`sha256:<hex>`) over file names and contents.
    pub hash: String,
    /// Total payload size in bytes.
    pub size: u64,
    /// Number of files in the payload.
    pub file_count: usize,
}

/// Compute the aggregate payload digest of `payload_dir`.
///
/// For each file in [`list_files_recursive`] order, the UTF-8 bytes of
/// `<relative-path>\0<per-file-hex-sha256>\n` are fed to a running hasher.
/// File names, enumeration order, and per-file content all collapse into the
/// one digest, so any permutation of the same tree hashes identically.
///
/// # Errors
///
/// Returns an error if the tree cannot be walked or a file cannot be read.
pub fn payload_digest(payload_dir: &Path) -> Result<PayloadDigest, IntegrityError> {
    let files = list_files_recursive(payload_dir)?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    for rel in &files {
        let abs = payload_dir.join(rel);
        let file_hex = hash_file_hex(&abs)?;
        hasher.update(rel.as_bytes());
        hasher.update([0u8]);
        hasher.update(file_hex.as_bytes());
        hasher.update([b'\n']);
        size += std::fs::metadata(&abs).map_err(|e| io_err(&abs, e))?.len();
    }
    Ok(PayloadDigest {
        hash: format!("{DIGEST_PREFIX}{:x}", hasher.finalize()),
        size,
        file_count: files.len(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
