// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bundle consumption: preview, stage, reject, quarantine, integrate.
//!
//! Preview never mutates anything; staging copies an approved bundle into
//! the world inbox without touching the live tree. Integration is a
//! separate operator-driven step recorded via an `integrated` log entry.

use crate::bundle::{AdaptationNotes, PayloadManifest, TransferEnvelope, TransferType};
use crate::log::{Direction, TransferEvent, TransferLog, TransferLogEntry};
use crate::TransferError;
use hiamp_config::paths::HqPaths;
use hiamp_events::{DomainEvent, EventBus};
use hiamp_integrity::verify::{PAYLOAD_DIR, VerificationReport, check_bundle, parse_verify};
use hiamp_integrity::{VERIFY_FILE, digest_hex, fsio, hash_file};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{info, warn};

/// A would-overwrite-divergent-content finding.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Conflict {
    /// HQ-relative path that would be affected.
    pub local_path: String,
    /// What diverged.
    pub description: String,
}

/// Everything an operator needs to decide on an inbound bundle.
#[derive(Debug, Clone)]
pub struct Preview {
    /// The bundle's envelope.
    pub envelope: TransferEnvelope,
    /// Full integrity verification (all errors, never short-circuited).
    pub verification: VerificationReport,
    /// The payload manifest.
    pub manifest: PayloadManifest,
    /// Detected conflicts with local content.
    pub conflicts: Vec<Conflict>,
    /// Adaptation notes (worker-pattern bundles).
    pub adaptation: Option<AdaptationNotes>,
    /// One human-readable paragraph.
    pub summary: String,
}

/// Result of staging an approved bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutcome {
    /// Directory the bundle now lives in.
    pub staged_to: String,
}

fn render_summary(
    envelope: &TransferEnvelope,
    verification: &VerificationReport,
    conflicts: &[Conflict],
) -> String {
    let integrity = if verification.valid {
        "integrity verified".to_string()
    } else {
        format!("integrity FAILED ({} error(s))", verification.errors.len())
    };
    let chain = match &envelope.supersedes {
        Some(prior) => format!("sequence {} and supersedes {prior}", envelope.sequence),
        None => format!("sequence {}", envelope.sequence),
    };
    format!(
        "{} bundle {} from {}, {chain}; {integrity}; {} conflict(s) with local content.",
        envelope.transfer_type, envelope.id, envelope.from, conflicts.len()
    )
}

/// Cross-check that every manifest item appears in `VERIFY.sha256`.
fn check_manifest_against_verify(
    bundle_dir: &Path,
    manifest: &PayloadManifest,
) -> Result<(), TransferError> {
    let text = std::fs::read_to_string(bundle_dir.join(VERIFY_FILE)).map_err(|e| {
        TransferError::Manifest {
            detail: format!("cannot read VERIFY.sha256: {e}"),
        }
    })?;
    let listed: BTreeSet<String> = parse_verify(&text)
        .map_err(|e| TransferError::Manifest {
            detail: format!("unparseable VERIFY.sha256: {e}"),
        })?
        .into_iter()
        .map(|entry| entry.path)
        .collect();

    for item in &manifest.items {
        let bundle_rel = format!("{PAYLOAD_DIR}/{}", item.path);
        if !listed.contains(&bundle_rel) {
            return Err(TransferError::Manifest {
                detail: format!("manifest lists '{}' but VERIFY.sha256 does not", item.path),
            });
        }
    }
    Ok(())
}

/// Scan the manifest for conflicts with the local tree and the transfer log.
fn detect_conflicts(
    hq_root: &Path,
    manifest: &PayloadManifest,
    log: &TransferLog,
) -> Result<Vec<Conflict>, TransferError> {
    let mut conflicts = Vec::new();
    for item in &manifest.items {
        let Some(source_path) = &item.source_path else {
            continue;
        };
        let local = hq_root.join(source_path);
        if !local.exists() {
            continue;
        }
        let local_hash = match hash_file(&local) {
            Ok(hash) => hash,
            Err(e) => {
                warn!(path = %source_path, error = %e, "cannot hash local file");
                continue;
            }
        };
        if digest_hex(&local_hash) != digest_hex(&item.hash) {
            conflicts.push(Conflict {
                local_path: source_path.clone(),
                description: "local differs from incoming".into(),
            });
        }
        if let Some(prior) = log.latest_integrated(source_path)?
            && let Some(recorded) = &prior.integration_hash
            && digest_hex(recorded) != digest_hex(&local_hash)
        {
            conflicts.push(Conflict {
                local_path: source_path.clone(),
                description: "modified since integration".into(),
            });
        }
    }
    Ok(conflicts)
}

/// Preview an inbound bundle without mutating anything.
///
/// # Errors
///
/// `ERR_TXFR_INTEGRITY` when the envelope itself is unreadable and
/// `ERR_TXFR_MANIFEST` when the manifest is malformed or inconsistent with
/// `VERIFY.sha256`. Hash/size mismatches do NOT error — they are returned
/// inside `verification` so the operator sees the complete picture.
pub fn preview(
    bundle_dir: &Path,
    hq_root: &Path,
    log: &TransferLog,
) -> Result<Preview, TransferError> {
    let envelope = TransferEnvelope::read_from(bundle_dir)?;
    let verification = check_bundle(bundle_dir, &envelope.payload_hash, envelope.payload_size);
    let manifest = PayloadManifest::read_from(bundle_dir)?;
    check_manifest_against_verify(bundle_dir, &manifest)?;

    let adaptation = match envelope.transfer_type {
        TransferType::WorkerPattern => AdaptationNotes::read_from(bundle_dir)?,
        TransferType::Knowledge => None,
    };
    let conflicts = detect_conflicts(hq_root, &manifest, log)?;
    let summary = render_summary(&envelope, &verification, &conflicts);

    Ok(Preview {
        envelope,
        verification,
        manifest,
        conflicts,
        adaptation,
        summary,
    })
}

/// Stage an approved bundle into the world inbox.
///
/// The copy lands in a temp sibling and is renamed into
/// `workspace/world/inbox/<from>/<type>/<transfer-id>/`; `received` and
/// `approved` log entries are appended and a `transfer-staged` event fires.
/// The live tree is never touched here.
pub fn stage(
    bundle_dir: &Path,
    paths: &HqPaths,
    log: &TransferLog,
    bus: &EventBus,
    approved_by: &str,
) -> Result<StageOutcome, TransferError> {
    let envelope = TransferEnvelope::read_from(bundle_dir)?;
    let verification = check_bundle(bundle_dir, &envelope.payload_hash, envelope.payload_size);
    if !verification.valid {
        return Err(TransferError::Integrity {
            detail: format!(
                "refusing to stage {}: {} verification error(s)",
                envelope.id,
                verification.errors.len()
            ),
        });
    }

    let destination = paths.staged_bundle(
        &envelope.from,
        envelope.transfer_type.as_str(),
        &envelope.id,
    );
    let staging = destination.with_extension("partial");
    let stage_io = |detail: String| TransferError::StageIo { detail };

    fsio::copy_tree(bundle_dir, &staging).map_err(|e| stage_io(e.to_string()))?;
    match std::fs::rename(&staging, &destination) {
        Ok(()) => {}
        Err(e) => {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(stage_io(format!("finalize staging: {e}")));
        }
    }
    let staged_to = destination.display().to_string();

    let mut received = TransferLogEntry::new(
        TransferEvent::Received,
        &envelope.id,
        Direction::Inbound,
        envelope.transfer_type,
        &envelope.from,
    );
    received.staged_to = Some(staged_to.clone());
    log.append(&received)?;

    let mut approved = TransferLogEntry::new(
        TransferEvent::Approved,
        &envelope.id,
        Direction::Inbound,
        envelope.transfer_type,
        &envelope.from,
    );
    approved.staged_to = Some(staged_to.clone());
    approved.approved_by = Some(approved_by.to_string());
    log.append(&approved)?;

    bus.publish(&DomainEvent::TransferStaged {
        transfer_id: envelope.id.clone(),
        peer: envelope.from.clone(),
        transfer_type: envelope.transfer_type.as_str().into(),
        staged_to: staged_to.clone(),
    });
    info!(transfer = %envelope.id, staged_to = %staged_to, "bundle staged");

    Ok(StageOutcome { staged_to })
}

/// Record an operator rejection. Nothing is written to disk besides the log.
pub fn reject(
    envelope: &TransferEnvelope,
    reason: &str,
    log: &TransferLog,
) -> Result<(), TransferError> {
    let mut entry = TransferLogEntry::new(
        TransferEvent::Rejected,
        &envelope.id,
        Direction::Inbound,
        envelope.transfer_type,
        &envelope.from,
    );
    entry.error_detail = Some(reason.to_string());
    log.append(&entry)?;
    info!(transfer = %envelope.id, reason, "bundle rejected");
    Ok(())
}

/// Move a verification-failed bundle into quarantine for later inspection.
///
/// Writes a `quarantined` log entry carrying the integrity error code and
/// the joined failure details.
pub fn quarantine(
    bundle_dir: &Path,
    paths: &HqPaths,
    log: &TransferLog,
    verification: &VerificationReport,
) -> Result<StageOutcome, TransferError> {
    let envelope = TransferEnvelope::read_from(bundle_dir)?;
    let destination = paths.quarantined_bundle(&envelope.id);
    fsio::move_dir(bundle_dir, &destination).map_err(|e| TransferError::StageIo {
        detail: format!("quarantine move: {e}"),
    })?;

    let detail = verification
        .errors
        .iter()
        .map(|issue| match &issue.path {
            Some(path) => format!("{} {path}", issue.kind.as_str()),
            None => issue.kind.as_str().to_string(),
        })
        .collect::<Vec<_>>()
        .join("; ");

    let mut entry = TransferLogEntry::new(
        TransferEvent::Quarantined,
        &envelope.id,
        Direction::Inbound,
        envelope.transfer_type,
        &envelope.from,
    );
    entry.error_code = Some(hiamp_error::ErrorCode::TransferIntegrity.as_str().into());
    entry.error_detail = Some(detail);
    log.append(&entry)?;
    warn!(transfer = %envelope.id, "bundle quarantined");

    Ok(StageOutcome {
        staged_to: destination.display().to_string(),
    })
}

/// Record an operator-driven integration of one staged file into the live
/// tree, capturing the on-disk hash for later conflict detection.
pub fn record_integration(
    envelope: &TransferEnvelope,
    local_path: &str,
    hq_root: &Path,
    log: &TransferLog,
    bus: &EventBus,
) -> Result<(), TransferError> {
    let hash = hash_file(&hq_root.join(local_path)).map_err(|e| TransferError::Conflict {
        detail: format!("cannot hash integrated file: {e}"),
    })?;
    let mut entry = TransferLogEntry::new(
        TransferEvent::Integrated,
        &envelope.id,
        Direction::Inbound,
        envelope.transfer_type,
        &envelope.from,
    );
    entry.integrated_to = Some(local_path.to_string());
    entry.integration_hash = Some(hash);
    log.append(&entry)?;
    bus.publish(&DomainEvent::TransferIntegrated {
        transfer_id: envelope.id.clone(),
        integrated_to: local_path.to_string(),
    });
    Ok(())
}
