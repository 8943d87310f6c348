// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-message
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;

use hiamp_id::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The protocol version every message in this crate speaks.
pub const PROTOCOL_VERSION: &str = "v1";

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Pragmatic category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    /// Transfer responsibility for a piece of work.
    Handoff,
    /// Ask the peer to do something.
    Request,
    /// Share information, no reply expected.
    Inform,
    /// Confirm receipt of a prior message.
    Acknowledge,
    /// Ask a question.
    Query,
    /// Answer a query.
    Response,
    /// Report a failure.
    Error,
    /// Announce an artifact being shared.
    Share,
}

impl Intent {
    /// All intents, for iteration and validation messages.
    pub const ALL: [Intent; 8] = [
        Intent::Handoff,
        Intent::Request,
        Intent::Inform,
        Intent::Acknowledge,
        Intent::Query,
        Intent::Response,
        Intent::Error,
        Intent::Share,
    ];

    /// Wire string for this intent.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handoff => "handoff",
            Self::Request => "request",
            Self::Inform => "inform",
            Self::Acknowledge => "acknowledge",
            Self::Query => "query",
            Self::Response => "response",
            Self::Error => "error",
            Self::Share => "share",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Intent::ALL
            .into_iter()
            .find(|i| i.as_str() == s)
            .ok_or(())
    }
}

/// Message priority hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Can wait.
    Low,
    /// Default.
    Normal,
    /// Prefer prompt handling.
    High,
    /// Drop everything.
    Urgent,
}

impl Priority {
    /// Wire string for this priority.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            _ => Err(()),
        }
    }
}

/// Whether the sender expects an acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckMode {
    /// No ack wanted.
    None,
    /// Ack welcome, not required.
    Optional,
    /// Receiver should auto-ack.
    Requested,
}

impl AckMode {
    /// Wire string for this ack mode.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Optional => "optional",
            Self::Requested => "requested",
        }
    }
}

impl fmt::Display for AckMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AckMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "optional" => Ok(Self::Optional),
            "requested" => Ok(Self::Requested),
            _ => Err(()),
        }
    }
}

// ---------------------------------------------------------------------------
// HiampMessage
// ---------------------------------------------------------------------------

/// A HIAMP v1 message.
///
/// The version is implicit: this crate only speaks `v1`, and the codec
/// rejects anything else at parse time.
///
/// # Examples
///
/// ```
/// use hiamp_message::{HiampMessage, Intent};
///
/// let msg = HiampMessage::builder("stefan/architect", "alex/backend-dev")
///     .unwrap()
///     .intent(Intent::Handoff)
///     .body("The API contract is ready.")
///     .build();
/// assert!(hiamp_id::is_message_id(&msg.id));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiampMessage {
    /// Message id (`msg-` + hex).
    pub id: String,
    /// Sender address.
    pub from: Address,
    /// Recipient address.
    pub to: Address,
    /// Pragmatic category.
    pub intent: Intent,
    /// Free-text body (size-bounded by the sender's settings).
    pub body: String,
    /// Conversation thread id, if part of one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// Message id this replies to (weak reference).
    #[serde(default, rename = "reply-to", skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    /// Priority hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    /// Acknowledgment expectation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack: Option<AckMode>,
    /// Free-form context tag (channel routing input).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Arbitrary external URL.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl HiampMessage {
    /// Start building a message between two addresses.
    ///
    /// A fresh message id is allocated; intent defaults to `inform`.
    ///
    /// # Errors
    ///
    /// Fails if either address does not match `owner/worker`.
    pub fn builder(
        from: &str,
        to: &str,
    ) -> Result<MessageBuilder, hiamp_id::AddressParseError> {
        Ok(MessageBuilder {
            msg: HiampMessage {
                id: hiamp_id::message_id(),
                from: from.parse()?,
                to: to.parse()?,
                intent: Intent::Inform,
                body: String::new(),
                thread: None,
                reply_to: None,
                priority: None,
                ack: None,
                context: None,
                reference: None,
            },
        })
    }

    /// Whether this message asks the receiver to auto-acknowledge.
    ///
    /// Acks and errors are never acked themselves (anti-loop rule).
    #[must_use]
    pub fn wants_ack(&self) -> bool {
        self.ack == Some(AckMode::Requested)
            && !matches!(self.intent, Intent::Acknowledge | Intent::Error)
    }
}

/// Fluent builder for [`HiampMessage`].
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    msg: HiampMessage,
}

impl MessageBuilder {
    /// Set the intent.
    #[must_use]
    pub fn intent(mut self, intent: Intent) -> Self {
        self.msg.intent = intent;
        self
    }

    /// Set the body text.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.msg.body = body.into();
        self
    }

    /// Set the thread id.
    #[must_use]
    pub fn thread(mut self, thread: impl Into<String>) -> Self {
        self.msg.thread = Some(thread.into());
        self
    }

    /// Set the reply-to message id.
    #[must_use]
    pub fn reply_to(mut self, id: impl Into<String>) -> Self {
        self.msg.reply_to = Some(id.into());
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn priority(mut self, p: Priority) -> Self {
        self.msg.priority = Some(p);
        self
    }

    /// Set the ack mode.
    #[must_use]
    pub fn ack(mut self, a: AckMode) -> Self {
        self.msg.ack = Some(a);
        self
    }

    /// Set the context tag.
    #[must_use]
    pub fn context(mut self, tag: impl Into<String>) -> Self {
        self.msg.context = Some(tag.into());
        self
    }

    /// Set the external reference URL.
    #[must_use]
    pub fn reference(mut self, url: impl Into<String>) -> Self {
        self.msg.reference = Some(url.into());
        self
    }

    /// Override the generated message id (used when re-materializing).
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.msg.id = id.into();
        self
    }

    /// Finish building.
    #[must_use]
    pub fn build(self) -> HiampMessage {
        self.msg
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
