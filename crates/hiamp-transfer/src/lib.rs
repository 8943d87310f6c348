// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-transfer
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bundle;
pub mod export;
pub mod import;
pub mod log;

pub use bundle::{
    AdaptationNotes, CustomizationPoint, ManifestItem, PayloadManifest, Provenance,
    TransferEnvelope, TransferType,
};
pub use export::{ExportSummary, KnowledgeExport, WorkerPatternExport};
pub use import::{Conflict, Preview, StageOutcome};
pub use log::{Direction, TransferEvent, TransferLog, TransferLogEntry};

use hiamp_error::ErrorCode;

/// Errors from bundle export, import, and logging.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Copying payload files failed during export.
    #[error("export I/O: {detail}")]
    ExportIo {
        /// What failed.
        detail: String,
    },

    /// The bundle failed hash or size verification.
    #[error("bundle integrity failure: {detail}")]
    Integrity {
        /// What failed.
        detail: String,
    },

    /// The payload manifest is malformed or inconsistent with VERIFY.sha256.
    #[error("payload manifest problem: {detail}")]
    Manifest {
        /// What failed.
        detail: String,
    },

    /// Integration would overwrite divergent local content.
    #[error("transfer conflict: {detail}")]
    Conflict {
        /// What failed.
        detail: String,
    },

    /// Staging an approved bundle failed at the filesystem level.
    #[error("staging I/O: {detail}")]
    StageIo {
        /// What failed.
        detail: String,
    },
}

impl TransferError {
    /// The stable [`ErrorCode`] this error maps to.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ExportIo { .. } => ErrorCode::ExportIoError,
            Self::Integrity { .. } => ErrorCode::TransferIntegrity,
            Self::Manifest { .. } => ErrorCode::TransferManifest,
            Self::Conflict { .. } => ErrorCode::TransferConflict,
            Self::StageIo { .. } => ErrorCode::TransferStageIo,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_line_up() {
        assert_eq!(TransferError::ExportIo { detail: "x".into() }.code(), ErrorCode::ExportIoError);
        assert_eq!(
            TransferError::Integrity { detail: "x".into() }.code().as_str(),
            "ERR_TXFR_INTEGRITY"
        );
        assert_eq!(
            TransferError::Manifest { detail: "x".into() }.code().as_str(),
            "ERR_TXFR_MANIFEST"
        );
        assert_eq!(
            TransferError::Conflict { detail: "x".into() }.code().as_str(),
            "ERR_TXFR_CONFLICT"
        );
        assert_eq!(
            TransferError::StageIo { detail: "x".into() }.code().as_str(),
            "ERR_TXFR_STAGE_IO"
        );
    }
}
