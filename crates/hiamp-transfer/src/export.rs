// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bundle production: knowledge and worker-pattern exports.
//!
//! Bundles are assembled in a sibling temp directory and renamed into place
//! on success, so a crashed export never leaves a half-built bundle under
//! the output directory's final name.

use crate::bundle::{
    ADAPTATION_FILE, AdaptationNotes, ManifestItem, PROVENANCE_FILE, PayloadManifest, Provenance,
    TransferEnvelope, TransferType, write_metadata,
};
use crate::log::{Direction, TransferEvent, TransferLog, TransferLogEntry};
use crate::TransferError;
use hiamp_integrity::verify::PAYLOAD_DIR;
use hiamp_integrity::{fsio, hash_file, list_files_recursive, payload_digest};
use std::path::{Path, PathBuf};
use tracing::info;

/// Inputs for a knowledge export.
#[derive(Debug, Clone)]
pub struct KnowledgeExport {
    /// HQ-relative files or directories to bundle.
    pub paths: Vec<String>,
    /// Knowledge domain tag.
    pub domain: String,
    /// Receiving owner.
    pub to_peer: String,
    /// Producing owner.
    pub owner: String,
    /// Producing instance id.
    pub instance_id: String,
    /// Transport label for the envelope.
    pub transport: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Transfer id this bundle supersedes.
    pub supersedes: Option<String>,
    /// Chain position; defaults to 1.
    pub sequence: Option<u32>,
}

/// Inputs for a worker-pattern export.
#[derive(Debug, Clone)]
pub struct WorkerPatternExport {
    /// Worker id; its definition lives at `workers/<id>/` under the HQ root.
    pub worker_id: String,
    /// Caller-supplied pattern version.
    pub pattern_version: String,
    /// Receiving owner.
    pub to_peer: String,
    /// Producing owner.
    pub owner: String,
    /// Producing instance id.
    pub instance_id: String,
    /// Transport label for the envelope.
    pub transport: String,
    /// Optional free-text description.
    pub description: Option<String>,
    /// Transfer id this bundle supersedes.
    pub supersedes: Option<String>,
    /// Chain position; defaults to 1.
    pub sequence: Option<u32>,
    /// Adaptation notes shipped with the pattern (`pattern-origin` is filled
    /// from `owner`).
    pub adaptation: AdaptationNotes,
}

/// What an export produced.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// Allocated transfer id.
    pub transfer_id: String,
    /// Final bundle directory.
    pub bundle_path: PathBuf,
    /// The written envelope.
    pub envelope: TransferEnvelope,
    /// Number of payload files.
    pub file_count: usize,
    /// Total payload bytes.
    pub payload_size: u64,
}

fn export_io(detail: impl std::fmt::Display) -> TransferError {
    TransferError::ExportIo {
        detail: detail.to_string(),
    }
}

/// Copy one HQ-relative input (file or directory) into the payload,
/// preserving the relative path. Returns the copied files as
/// `(payload-relative, hq-relative)` pairs.
fn copy_input(
    hq_root: &Path,
    payload_dir: &Path,
    input: &str,
) -> Result<Vec<(String, String)>, TransferError> {
    let source = hq_root.join(input);
    let meta = std::fs::symlink_metadata(&source)
        .map_err(|e| export_io(format!("{input}: {e}")))?;

    if meta.is_symlink() {
        // Symlinks are not followed.
        return Ok(Vec::new());
    }
    if meta.is_file() {
        let dest = payload_dir.join(input);
        if let Some(parent) = dest.parent() {
            fsio::ensure_dir(parent).map_err(export_io)?;
        }
        std::fs::copy(&source, &dest).map_err(|e| export_io(format!("{input}: {e}")))?;
        return Ok(vec![(input.to_string(), input.to_string())]);
    }

    let mut copied = Vec::new();
    for rel in list_files_recursive(&source).map_err(export_io)? {
        let hq_rel = format!("{input}/{rel}");
        let dest = payload_dir.join(&hq_rel);
        if let Some(parent) = dest.parent() {
            fsio::ensure_dir(parent).map_err(export_io)?;
        }
        std::fs::copy(source.join(&rel), &dest)
            .map_err(|e| export_io(format!("{hq_rel}: {e}")))?;
        copied.push((hq_rel.clone(), hq_rel));
    }
    Ok(copied)
}

/// Hash and size every payload file into manifest items.
fn manifest_items(
    bundle_dir: &Path,
    copied: &[(String, String)],
) -> Result<Vec<ManifestItem>, TransferError> {
    let payload_dir = bundle_dir.join(PAYLOAD_DIR);
    let mut items = Vec::new();
    for (payload_rel, source_rel) in copied {
        let abs = payload_dir.join(payload_rel);
        let hash = hash_file(&abs).map_err(export_io)?;
        let size = std::fs::metadata(&abs).map_err(|e| export_io(e))?.len();
        items.push(ManifestItem {
            path: payload_rel.clone(),
            hash,
            size,
            source_path: Some(source_rel.clone()),
        });
    }
    items.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(items)
}

/// Finish a bundle: manifest metadata entries, digest, envelope, VERIFY,
/// rename into place, and the `sent` log entry.
#[allow(clippy::too_many_arguments)]
fn seal_bundle(
    staging: &Path,
    final_path: &Path,
    transfer_id: &str,
    transfer_type: TransferType,
    manifest: &PayloadManifest,
    provenance: &Provenance,
    to_peer: &str,
    transport: &str,
    description: Option<String>,
    supersedes: Option<String>,
    sequence: u32,
    log: &TransferLog,
) -> Result<ExportSummary, TransferError> {
    manifest.write_to(staging)?;
    write_metadata(staging, PROVENANCE_FILE, provenance)?;

    let digest = payload_digest(&staging.join(PAYLOAD_DIR)).map_err(export_io)?;
    let envelope = TransferEnvelope {
        id: transfer_id.to_string(),
        transfer_type,
        from: provenance.owner.clone(),
        to: to_peer.to_string(),
        timestamp: hiamp_id::utc_timestamp(),
        version: "v1".into(),
        description,
        payload_hash: digest.hash.clone(),
        payload_size: digest.size,
        supersedes,
        sequence,
        transport: transport.to_string(),
    };
    envelope.write_to(staging)?;
    hiamp_integrity::verify::write_verify_file(staging).map_err(export_io)?;

    fsio::move_dir(staging, final_path).map_err(|e| export_io(format!("finalize bundle: {e}")))?;

    log.append(&TransferLogEntry::new(
        TransferEvent::Sent,
        transfer_id,
        Direction::Outbound,
        transfer_type,
        to_peer,
    ))?;

    info!(
        transfer = transfer_id,
        files = digest.file_count,
        bytes = digest.size,
        "bundle exported"
    );
    Ok(ExportSummary {
        transfer_id: transfer_id.to_string(),
        bundle_path: final_path.to_path_buf(),
        envelope,
        file_count: digest.file_count,
        payload_size: digest.size,
    })
}

/// Export a knowledge bundle into `output_dir/<transfer-id>/`.
///
/// # Errors
///
/// `EXPORT_IO_ERROR` when an input path is missing or unreadable; the
/// half-built staging directory is removed on failure.
pub fn export_knowledge(
    hq_root: &Path,
    output_dir: &Path,
    request: &KnowledgeExport,
    log: &TransferLog,
) -> Result<ExportSummary, TransferError> {
    let transfer_id = hiamp_id::transfer_id();
    let staging = output_dir.join(format!(".{transfer_id}.partial"));
    let final_path = output_dir.join(&transfer_id);

    let result = (|| {
        let payload_dir = staging.join(PAYLOAD_DIR);
        fsio::ensure_dir(&payload_dir).map_err(export_io)?;

        let mut copied = Vec::new();
        for input in &request.paths {
            copied.extend(copy_input(hq_root, &payload_dir, input)?);
        }
        let items = manifest_items(&staging, &copied)?;

        let manifest = PayloadManifest {
            manifest_type: TransferType::Knowledge,
            domain: Some(request.domain.clone()),
            pattern_name: None,
            pattern_version: None,
            items,
        };
        let provenance = Provenance {
            owner: request.owner.clone(),
            instance_id: request.instance_id.clone(),
            generated_at: hiamp_id::utc_timestamp(),
            source_paths: request.paths.clone(),
        };
        seal_bundle(
            &staging,
            &final_path,
            &transfer_id,
            TransferType::Knowledge,
            &manifest,
            &provenance,
            &request.to_peer,
            &request.transport,
            request.description.clone(),
            request.supersedes.clone(),
            request.sequence.unwrap_or(1),
            log,
        )
    })();

    if result.is_err() {
        let _ = std::fs::remove_dir_all(&staging);
    }
    result
}

/// Export a worker-pattern bundle into `output_dir/<transfer-id>/`.
///
/// The payload tree is rooted at `payload/worker/` and carries the worker
/// definition plus its skills, copied from `workers/<id>/` under the HQ
/// root.
pub fn export_worker_pattern(
    hq_root: &Path,
    output_dir: &Path,
    request: &WorkerPatternExport,
    log: &TransferLog,
) -> Result<ExportSummary, TransferError> {
    let transfer_id = hiamp_id::transfer_id();
    let staging = output_dir.join(format!(".{transfer_id}.partial"));
    let final_path = output_dir.join(&transfer_id);

    let result = (|| {
        let payload_dir = staging.join(PAYLOAD_DIR);
        fsio::ensure_dir(&payload_dir).map_err(export_io)?;

        let worker_src = format!("workers/{}", request.worker_id);
        let source_dir = hq_root.join(&worker_src);
        if !source_dir.join("worker.yaml").is_file() {
            return Err(export_io(format!("{worker_src}/worker.yaml does not exist")));
        }

        // The in-HQ `workers/<id>/` tree lands under `payload/worker/`.
        let mut copied = Vec::new();
        for rel in list_files_recursive(&source_dir).map_err(export_io)? {
            let payload_rel = format!("worker/{rel}");
            let dest = payload_dir.join(&payload_rel);
            if let Some(parent) = dest.parent() {
                fsio::ensure_dir(parent).map_err(export_io)?;
            }
            std::fs::copy(source_dir.join(&rel), &dest)
                .map_err(|e| export_io(format!("{worker_src}/{rel}: {e}")))?;
            copied.push((payload_rel, format!("{worker_src}/{rel}")));
        }
        let items = manifest_items(&staging, &copied)?;

        let manifest = PayloadManifest {
            manifest_type: TransferType::WorkerPattern,
            domain: None,
            pattern_name: Some(request.worker_id.clone()),
            pattern_version: Some(request.pattern_version.clone()),
            items,
        };
        let provenance = Provenance {
            owner: request.owner.clone(),
            instance_id: request.instance_id.clone(),
            generated_at: hiamp_id::utc_timestamp(),
            source_paths: vec![worker_src],
        };
        let adaptation = AdaptationNotes {
            pattern_origin: request.owner.clone(),
            ..request.adaptation.clone()
        };
        write_metadata(&staging, ADAPTATION_FILE, &adaptation)?;

        seal_bundle(
            &staging,
            &final_path,
            &transfer_id,
            TransferType::WorkerPattern,
            &manifest,
            &provenance,
            &request.to_peer,
            &request.transport,
            request.description.clone(),
            request.supersedes.clone(),
            request.sequence.unwrap_or(1),
            log,
        )
    })();

    if result.is_err() {
        let _ = std::fs::remove_dir_all(&staging);
    }
    result
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
