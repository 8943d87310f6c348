// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-error
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// ErrorCategory
// ---------------------------------------------------------------------------

/// Broad family that an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Message/field validation errors.
    Validation,
    /// Policy enforcement errors (permissions, kill switch).
    Policy,
    /// Channel resolution errors.
    Channel,
    /// Transport dispatch errors.
    Transport,
    /// Bundle export/import errors.
    Transfer,
    /// Configuration errors.
    Config,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::Policy => "policy",
            Self::Channel => "channel",
            Self::Transport => "transport",
            Self::Transfer => "transfer",
            Self::Config => "config",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// ErrorCode
// ---------------------------------------------------------------------------

/// Machine-readable, stable error code.
///
/// Each variant serializes to the exact string returned by [`ErrorCode::as_str`];
/// those strings are part of the wire contract and never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // -- Validation --
    /// Message fields are missing or unusable (bad from/to, unknown peer…).
    InvalidMessage,
    /// An address does not match `owner/worker`.
    BadAddress,
    /// Intent is not a member of the intent enum.
    BadIntent,
    /// An id does not match its domain prefix regex.
    BadId,
    /// Envelope text is not a HIAMP message or has malformed tokens.
    InvalidEnvelope,
    /// Envelope carries a version other than `v1`.
    UnknownVersion,

    // -- Policy --
    /// Worker permission matrix denied the operation.
    PermissionDenied,
    /// The config kill switch is engaged.
    KillSwitch,
    /// Messaging is disabled in settings.
    Disabled,

    // -- Channel resolution --
    /// The resolver could not produce an endpoint.
    ChannelResolveFailed,
    /// An explicitly named issue does not exist.
    IssueNotFound,
    /// A team key is not configured or not known to the backing API.
    UnknownTeam,
    /// A context tag has no configured mapping.
    NoContextMatch,
    /// Lazy endpoint creation failed.
    IssueCreateFailed,

    // -- Transport --
    /// Generic dispatch failure (includes caught exceptions).
    TransportError,
    /// The backing API returned 429.
    RateLimited,
    /// The backing API returned an unexpected status.
    ApiError,
    /// The backing API was unreachable.
    NetworkError,

    // -- Transfer --
    /// Payload copy failed during export.
    ExportIoError,
    /// Bundle hash or size verification failed.
    #[serde(rename = "ERR_TXFR_INTEGRITY")]
    TransferIntegrity,
    /// Payload manifest is malformed or inconsistent with VERIFY.sha256.
    #[serde(rename = "ERR_TXFR_MANIFEST")]
    TransferManifest,
    /// Integration would overwrite divergent local content.
    #[serde(rename = "ERR_TXFR_CONFLICT")]
    TransferConflict,
    /// Staging an approved bundle failed at the filesystem level.
    #[serde(rename = "ERR_TXFR_STAGE_IO")]
    TransferStageIo,

    // -- Config --
    /// Config file not found.
    ConfigMissing,
    /// Config file is not parseable.
    ConfigParseError,
    /// Config parsed but failed shape/enum/cross-field validation.
    ConfigValidation,
}

impl ErrorCode {
    /// The broad [`ErrorCategory`] this code belongs to.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidMessage
            | Self::BadAddress
            | Self::BadIntent
            | Self::BadId
            | Self::InvalidEnvelope
            | Self::UnknownVersion => ErrorCategory::Validation,

            Self::PermissionDenied | Self::KillSwitch | Self::Disabled => ErrorCategory::Policy,

            Self::ChannelResolveFailed
            | Self::IssueNotFound
            | Self::UnknownTeam
            | Self::NoContextMatch
            | Self::IssueCreateFailed => ErrorCategory::Channel,

            Self::TransportError | Self::RateLimited | Self::ApiError | Self::NetworkError => {
                ErrorCategory::Transport
            }

            Self::ExportIoError
            | Self::TransferIntegrity
            | Self::TransferManifest
            | Self::TransferConflict
            | Self::TransferStageIo => ErrorCategory::Transfer,

            Self::ConfigMissing | Self::ConfigParseError | Self::ConfigValidation => {
                ErrorCategory::Config
            }
        }
    }

    /// Stable `&'static str` representation (e.g. `"PERMISSION_DENIED"`).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidMessage => "INVALID_MESSAGE",
            Self::BadAddress => "BAD_ADDRESS",
            Self::BadIntent => "BAD_INTENT",
            Self::BadId => "BAD_ID",
            Self::InvalidEnvelope => "INVALID_ENVELOPE",
            Self::UnknownVersion => "UNKNOWN_VERSION",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::KillSwitch => "KILL_SWITCH",
            Self::Disabled => "DISABLED",
            Self::ChannelResolveFailed => "CHANNEL_RESOLVE_FAILED",
            Self::IssueNotFound => "ISSUE_NOT_FOUND",
            Self::UnknownTeam => "UNKNOWN_TEAM",
            Self::NoContextMatch => "NO_CONTEXT_MATCH",
            Self::IssueCreateFailed => "ISSUE_CREATE_FAILED",
            Self::TransportError => "TRANSPORT_ERROR",
            Self::RateLimited => "RATE_LIMITED",
            Self::ApiError => "API_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::ExportIoError => "EXPORT_IO_ERROR",
            Self::TransferIntegrity => "ERR_TXFR_INTEGRITY",
            Self::TransferManifest => "ERR_TXFR_MANIFEST",
            Self::TransferConflict => "ERR_TXFR_CONFLICT",
            Self::TransferStageIo => "ERR_TXFR_STAGE_IO",
            Self::ConfigMissing => "CONFIG_MISSING",
            Self::ConfigParseError => "CONFIG_PARSE_ERROR",
            Self::ConfigValidation => "CONFIG_VALIDATION",
        }
    }

    /// Whether a failed operation with this code is safe to retry as-is.
    ///
    /// Only rate limiting qualifies; everything else either needs operator
    /// input or would repeat a non-idempotent side effect.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// HqError
// ---------------------------------------------------------------------------

/// Unified HIAMP error.
///
/// Carries a stable [`ErrorCode`], a human-readable message, an optional
/// source error for cause-chaining, and arbitrary structured context.
///
/// # Builder usage
///
/// ```
/// use hiamp_error::{ErrorCode, HqError};
///
/// let err = HqError::new(ErrorCode::RateLimited, "tracker API returned 429")
///     .with_context("peer", "alex")
///     .with_context("retry_after_ms", 1200);
/// assert!(err.to_string().starts_with("[RATE_LIMITED]"));
/// ```
pub struct HqError {
    /// Machine-readable error code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Optional underlying cause.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    /// Arbitrary structured context for diagnostics.
    pub context: BTreeMap<String, serde_json::Value>,
}

impl HqError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Attach a key-value pair to the diagnostic context.
    ///
    /// The value is converted via [`serde_json::to_value`]; if serialization
    /// fails, the entry is silently skipped.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Shorthand for `self.code.category()`.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        self.code.category()
    }
}

impl fmt::Debug for HqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("HqError");
        d.field("code", &self.code);
        d.field("message", &self.message);
        if let Some(ref src) = self.source {
            d.field("source", &src.to_string());
        }
        if !self.context.is_empty() {
            d.field("context", &self.context);
        }
        d.finish()
    }
}

impl fmt::Display for HqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)?;
        if !self.context.is_empty() {
            // Deterministic output thanks to BTreeMap.
            if let Ok(ctx) = serde_json::to_string(&self.context) {
                write!(f, " {ctx}")?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for HqError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

// ---------------------------------------------------------------------------
// Serialization support
// ---------------------------------------------------------------------------

/// Serializable snapshot of an [`HqError`] (without the opaque source).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HqErrorDto {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    #[serde(default)]
    pub context: BTreeMap<String, serde_json::Value>,
    /// String representation of the source error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_message: Option<String>,
}

impl From<&HqError> for HqErrorDto {
    fn from(err: &HqError) -> Self {
        Self {
            code: err.code,
            message: err.message.clone(),
            context: err.context.clone(),
            source_message: err.source.as_ref().map(|s| s.to_string()),
        }
    }
}

impl From<HqErrorDto> for HqError {
    fn from(dto: HqErrorDto) -> Self {
        Self {
            code: dto.code,
            message: dto.message,
            source: None,
            context: dto.context,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
