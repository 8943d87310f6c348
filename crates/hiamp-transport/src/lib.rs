// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-transport
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;

use async_trait::async_trait;
use hiamp_error::ErrorCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

/// Default deadline for outbound `send`/`send_reply` calls.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

/// Default (shorter) deadline for resolver API calls.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// A transport-layer failure carrying a stable [`ErrorCode`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct TransportError {
    /// Stable code (`TRANSPORT_ERROR`, `RATE_LIMITED`, …).
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl TransportError {
    /// Create an error with an explicit code.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Map a backing-API HTTP status to the transport taxonomy:
    /// 401/403 → `PERMISSION_DENIED`, 404 → `ISSUE_NOT_FOUND`,
    /// 429 → `RATE_LIMITED`, anything else → `API_ERROR`.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let code = match status {
            401 | 403 => ErrorCode::PermissionDenied,
            404 => ErrorCode::IssueNotFound,
            429 => ErrorCode::RateLimited,
            _ => ErrorCode::ApiError,
        };
        Self::new(code, message)
    }

    /// An unreachable-backend failure (`NETWORK_ERROR`).
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NetworkError, message)
    }

    /// Whether the failed call may be retried as-is (rate limiting only).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.as_str(), self.message)
    }
}

/// Run a transport call under a deadline, mapping expiry to `NETWORK_ERROR`.
///
/// Cancellation is cooperative: dropping the future aborts the in-flight
/// call; side effects already landed at the carrier are not rolled back and
/// are reconciled on the next inbound observation.
pub async fn with_deadline<T>(
    deadline: Duration,
    operation: &str,
    fut: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::network(format!(
            "{operation} timed out after {}s",
            deadline.as_secs()
        ))),
    }
}

// ---------------------------------------------------------------------------
// Capability types
// ---------------------------------------------------------------------------

/// Outcome of resolving a logical destination to a transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChannelResolution {
    /// Transport-native endpoint id (channel id, issue UUID…).
    pub channel_id: String,
    /// Human-readable endpoint name, when the transport has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    /// Which strategy produced the resolution.
    pub strategy: String,
}

/// Outcome of posting a new root-level artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    /// Transport-native id of the posted artifact.
    pub transport_message_id: String,
    /// Opaque anchor for threaded replies.
    pub thread_ref: String,
}

/// Outcome of posting a threaded reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyOutcome {
    /// Transport-native id of the posted reply.
    pub transport_message_id: String,
}

/// Inbound text surfaced by a watching transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// The raw text (expected to carry a HIAMP envelope).
    pub text: String,
    /// Opaque thread anchor the text arrived under.
    pub thread_ref: String,
    /// Endpoint the text arrived on.
    pub channel_id: String,
}

// ---------------------------------------------------------------------------
// Transport trait
// ---------------------------------------------------------------------------

/// The capability set any HIAMP carrier must implement.
///
/// Implementations are transport-specific (chat room, issue tracker) but the
/// sender and ack handler only ever see this trait.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Stable transport label (`"slack"`, `"linear"`).
    fn name(&self) -> &'static str;

    /// Map `(target_peer, context_tag, channel_id)` to a transport endpoint.
    ///
    /// Deterministic per transport; implementations cache results within
    /// their TTL and create endpoints lazily where the strategy allows.
    async fn resolve_channel(
        &self,
        target_peer: &str,
        context_tag: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<ChannelResolution, TransportError>;

    /// Post a new root-level artifact in the channel.
    async fn send(&self, channel_id: &str, text: &str) -> Result<SendOutcome, TransportError>;

    /// Post a threaded response under a prior root-level artifact.
    async fn send_reply(
        &self,
        thread_ref: &str,
        text: &str,
    ) -> Result<ReplyOutcome, TransportError>;

    /// Start surfacing inbound envelope-bearing text on `inbound`.
    ///
    /// Push transports hold a long-lived connection; pull transports poll.
    /// Returns once watching is established; delivery continues until
    /// [`Transport::unwatch`] or the receiver is dropped.
    async fn watch(&self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError>;

    /// Stop watching. Idempotent.
    async fn unwatch(&self);

    /// Pull all replies under a thread anchor (for pull-based transports and
    /// post-cancellation reconciliation).
    async fn fetch_replies(&self, thread_ref: &str) -> Result<Vec<String>, TransportError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
