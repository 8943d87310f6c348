// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bundle file formats: envelope, payload manifest, provenance, adaptation.
//!
//! Every file is YAML with kebab-case keys. The envelope nests its fields
//! under a top-level `envelope:` key; the others are flat documents.

use crate::TransferError;
use hiamp_integrity::fsio;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// File name of the payload manifest inside `payload/`.
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Metadata directory inside `payload/`.
pub const METADATA_DIR: &str = "metadata";

/// Kind of artifact a bundle carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferType {
    /// Knowledge files under their in-HQ relative paths.
    Knowledge,
    /// A reusable worker definition plus skills.
    WorkerPattern,
}

impl TransferType {
    /// Stable kebab label (also the staging directory segment).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Knowledge => "knowledge",
            Self::WorkerPattern => "worker-pattern",
        }
    }
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outer metadata record of every bundle (`envelope.yaml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TransferEnvelope {
    /// Transfer id (`txfr-` + 12 hex).
    pub id: String,
    /// Bundle kind.
    #[serde(rename = "type")]
    pub transfer_type: TransferType,
    /// Producing owner.
    pub from: String,
    /// Receiving owner.
    pub to: String,
    /// Production timestamp.
    pub timestamp: String,
    /// Format version; always `v1`.
    pub version: String,
    /// Optional free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Aggregate hash over the payload tree (`sha256:<hex>`).
    pub payload_hash: String,
    /// Total payload bytes.
    pub payload_size: u64,
    /// Transfer id this bundle supersedes, when re-sharing.
    #[serde(default)]
    pub supersedes: Option<String>,
    /// 1-based position in a re-share chain.
    pub sequence: u32,
    /// Transport label the bundle was announced over.
    pub transport: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct EnvelopeDoc {
    envelope: TransferEnvelope,
}

impl TransferEnvelope {
    /// Read `envelope.yaml` from a bundle directory.
    pub fn read_from(bundle_dir: &Path) -> Result<Self, TransferError> {
        let path = bundle_dir.join(hiamp_integrity::ENVELOPE_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| TransferError::Integrity {
            detail: format!("cannot read {}: {e}", path.display()),
        })?;
        let doc: EnvelopeDoc =
            serde_yaml::from_str(&text).map_err(|e| TransferError::Integrity {
                detail: format!("malformed envelope: {e}"),
            })?;
        Ok(doc.envelope)
    }

    /// Write `envelope.yaml` into a bundle directory (write-temp-rename).
    pub fn write_to(&self, bundle_dir: &Path) -> Result<(), TransferError> {
        let doc = EnvelopeDoc {
            envelope: self.clone(),
        };
        let yaml = serde_yaml::to_string(&doc).map_err(|e| TransferError::ExportIo {
            detail: format!("serialize envelope: {e}"),
        })?;
        fsio::write_atomic(
            &bundle_dir.join(hiamp_integrity::ENVELOPE_FILE),
            yaml.as_bytes(),
        )
        .map_err(|e| TransferError::ExportIo {
            detail: e.to_string(),
        })
    }
}

/// One payload file as recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ManifestItem {
    /// Path relative to `payload/`, `/`-separated.
    pub path: String,
    /// Per-file digest (`sha256:<hex>`).
    pub hash: String,
    /// File size in bytes.
    pub size: u64,
    /// Original HQ-relative path, used for conflict detection on import.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

/// The per-file authoritative record (`payload/manifest.yaml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PayloadManifest {
    /// Bundle kind.
    #[serde(rename = "type")]
    pub manifest_type: TransferType,
    /// Knowledge domain tag (knowledge bundles).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Pattern name (worker-pattern bundles).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_name: Option<String>,
    /// Pattern version (worker-pattern bundles).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_version: Option<String>,
    /// Every payload file with hash and size.
    pub items: Vec<ManifestItem>,
}

impl PayloadManifest {
    /// Read `payload/manifest.yaml` from a bundle directory.
    pub fn read_from(bundle_dir: &Path) -> Result<Self, TransferError> {
        let path = bundle_dir
            .join(hiamp_integrity::verify::PAYLOAD_DIR)
            .join(MANIFEST_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| TransferError::Manifest {
            detail: format!("cannot read {}: {e}", path.display()),
        })?;
        serde_yaml::from_str(&text).map_err(|e| TransferError::Manifest {
            detail: format!("malformed manifest: {e}"),
        })
    }

    /// Write `payload/manifest.yaml` into a bundle directory.
    pub fn write_to(&self, bundle_dir: &Path) -> Result<(), TransferError> {
        let yaml = serde_yaml::to_string(self).map_err(|e| TransferError::ExportIo {
            detail: format!("serialize manifest: {e}"),
        })?;
        fsio::write_atomic(
            &bundle_dir
                .join(hiamp_integrity::verify::PAYLOAD_DIR)
                .join(MANIFEST_FILE),
            yaml.as_bytes(),
        )
        .map_err(|e| TransferError::ExportIo {
            detail: e.to_string(),
        })
    }
}

/// Producer record (`payload/metadata/provenance.yaml`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Provenance {
    /// Producing owner.
    pub owner: String,
    /// Producing instance.
    pub instance_id: String,
    /// When the bundle was generated.
    pub generated_at: String,
    /// HQ-relative paths the payload was built from.
    pub source_paths: Vec<String>,
}

/// Priority of one customization point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdaptationPriority {
    /// Nice to adjust.
    Low,
    /// Should adjust.
    Medium,
    /// Must adjust before materializing.
    High,
}

/// One field the receiving operator should adapt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CustomizationPoint {
    /// Which field of the worker definition.
    pub field: String,
    /// How to adapt it.
    pub guidance: String,
    /// How important the adaptation is.
    pub priority: AdaptationPriority,
}

/// What a pattern needs and how to adapt it
/// (`payload/metadata/adaptation.yaml`, worker-pattern bundles only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AdaptationNotes {
    /// Knowledge domains the pattern expects locally.
    #[serde(default)]
    pub requires_knowledge: Vec<String>,
    /// Tools the pattern expects locally.
    #[serde(default)]
    pub requires_tools: Vec<String>,
    /// Fields to adapt before materializing the worker.
    #[serde(default)]
    pub customization_points: Vec<CustomizationPoint>,
    /// What the bundle deliberately leaves out.
    #[serde(default)]
    pub not_included: Vec<String>,
    /// Free-text notes on how the pattern evolved.
    #[serde(default)]
    pub evolution_notes: String,
    /// Owner the pattern originated from.
    pub pattern_origin: String,
}

/// File name of the adaptation notes inside `payload/metadata/`.
pub const ADAPTATION_FILE: &str = "adaptation.yaml";

/// File name of the provenance record inside `payload/metadata/`.
pub const PROVENANCE_FILE: &str = "provenance.yaml";

fn metadata_path(bundle_dir: &Path, file: &str) -> std::path::PathBuf {
    bundle_dir
        .join(hiamp_integrity::verify::PAYLOAD_DIR)
        .join(METADATA_DIR)
        .join(file)
}

/// Write a metadata YAML document (provenance or adaptation).
pub(crate) fn write_metadata<T: Serialize>(
    bundle_dir: &Path,
    file: &str,
    value: &T,
) -> Result<(), TransferError> {
    let yaml = serde_yaml::to_string(value).map_err(|e| TransferError::ExportIo {
        detail: format!("serialize {file}: {e}"),
    })?;
    fsio::write_atomic(&metadata_path(bundle_dir, file), yaml.as_bytes()).map_err(|e| {
        TransferError::ExportIo {
            detail: e.to_string(),
        }
    })
}

impl AdaptationNotes {
    /// Read `payload/metadata/adaptation.yaml`, if present.
    pub fn read_from(bundle_dir: &Path) -> Result<Option<Self>, TransferError> {
        let path = metadata_path(bundle_dir, ADAPTATION_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path).map_err(|e| TransferError::Manifest {
            detail: format!("cannot read adaptation notes: {e}"),
        })?;
        serde_yaml::from_str(&text)
            .map(Some)
            .map_err(|e| TransferError::Manifest {
                detail: format!("malformed adaptation notes: {e}"),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope() -> TransferEnvelope {
        TransferEnvelope {
            id: "txfr-0011aabbccdd".into(),
            transfer_type: TransferType::Knowledge,
            from: "stefan".into(),
            to: "alex".into(),
            timestamp: "2026-08-01T10:00:00Z".into(),
            version: "v1".into(),
            description: Some("e2e patterns".into()),
            payload_hash: "sha256:00".into(),
            payload_size: 123,
            supersedes: None,
            sequence: 1,
            transport: "slack".into(),
        }
    }

    #[test]
    fn envelope_roundtrips_under_the_top_level_key() {
        let dir = tempfile::tempdir().unwrap();
        let original = envelope();
        original.write_to(dir.path()).unwrap();

        let text = std::fs::read_to_string(dir.path().join("envelope.yaml")).unwrap();
        assert!(text.starts_with("envelope:"));
        assert!(text.contains("payload-hash: sha256:00"));
        assert!(text.contains("payload-size: 123"));
        assert!(text.contains("type: knowledge"));
        assert!(text.contains("supersedes: null"));

        let back = TransferEnvelope::read_from(dir.path()).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn manifest_roundtrips_with_kebab_keys() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = PayloadManifest {
            manifest_type: TransferType::WorkerPattern,
            domain: None,
            pattern_name: Some("backend-dev".into()),
            pattern_version: Some("1.2.0".into()),
            items: vec![ManifestItem {
                path: "worker/worker.yaml".into(),
                hash: "sha256:ab".into(),
                size: 10,
                source_path: Some("workers/backend-dev/worker.yaml".into()),
            }],
        };
        manifest.write_to(dir.path()).unwrap();
        let text = std::fs::read_to_string(dir.path().join("payload/manifest.yaml")).unwrap();
        assert!(text.contains("type: worker-pattern"));
        assert!(text.contains("pattern-name: backend-dev"));
        assert!(text.contains("source-path: workers/backend-dev/worker.yaml"));
        let back = PayloadManifest::read_from(dir.path()).unwrap();
        assert_eq!(back, manifest);
    }

    #[test]
    fn adaptation_notes_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AdaptationNotes::read_from(dir.path()).unwrap().is_none());

        let notes = AdaptationNotes {
            requires_knowledge: vec!["testing".into()],
            requires_tools: vec!["git".into()],
            customization_points: vec![CustomizationPoint {
                field: "model".into(),
                guidance: "pick a local default".into(),
                priority: AdaptationPriority::High,
            }],
            not_included: vec!["credentials".into()],
            evolution_notes: "grew out of the e2e effort".into(),
            pattern_origin: "stefan".into(),
        };
        write_metadata(dir.path(), ADAPTATION_FILE, &notes).unwrap();
        let back = AdaptationNotes::read_from(dir.path()).unwrap().unwrap();
        assert_eq!(back, notes);
    }

    #[test]
    fn missing_envelope_is_an_integrity_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = TransferEnvelope::read_from(dir.path()).unwrap_err();
        assert_eq!(err.code().as_str(), "ERR_TXFR_INTEGRITY");
    }
}
