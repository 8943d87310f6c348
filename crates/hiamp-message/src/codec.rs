// SPDX-License-Identifier: MIT OR Apache-2.0
//! Compose and parse the HIAMP envelope text format.
//!
//! The wire shape, over any transport that carries text:
//!
//! ```text
//! <from> → <to>
//!
//! <body>
//!
//! ───────────────
//! hq-msg:v1 | id:<msg-id> | from:<from> | to:<to> | intent:<intent> | …
//! ```
//!
//! A 15-unit U+2500 rule separates body from the single-line metadata
//! trailer. Compose emits optional tokens in the normative order (thread,
//! reply-to, priority, ack, context, ref); parse accepts them in any order.

use crate::{AckMode, HiampMessage, Intent, PROTOCOL_VERSION, Priority};
use hiamp_error::ErrorCode;
use hiamp_id::Address;

/// The body/trailer separator: fifteen U+2500 box-drawing units.
pub const RULE: &str = "───────────────";

/// Leading token of every v1 trailer line.
pub const TRAILER_TAG: &str = "hq-msg:v1";

const TRAILER_PREFIX: &str = "hq-msg:";
const TOKEN_SEP: &str = " | ";

/// Errors from envelope text parsing or validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The input carries no trailer line or a malformed token.
    #[error("not a HIAMP envelope: {0}")]
    InvalidEnvelope(String),

    /// The trailer declares a version other than `v1`.
    #[error("unsupported HIAMP version '{0}'")]
    UnknownVersion(String),

    /// An address field does not match `owner/worker`.
    #[error("bad address in '{field}': '{value}'")]
    BadAddress {
        /// Which trailer key carried the address.
        field: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The intent is not a member of the intent enum.
    #[error("unknown intent '{0}'")]
    BadIntent(String),

    /// An id field does not match its domain prefix regex.
    #[error("bad id in '{field}': '{value}'")]
    BadId {
        /// Which trailer key carried the id.
        field: &'static str,
        /// The rejected value.
        value: String,
    },
}

impl CodecError {
    /// The stable [`ErrorCode`] this error maps to.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidEnvelope(_) => ErrorCode::InvalidEnvelope,
            Self::UnknownVersion(_) => ErrorCode::UnknownVersion,
            Self::BadAddress { .. } => ErrorCode::BadAddress,
            Self::BadIntent(_) => ErrorCode::BadIntent,
            Self::BadId { .. } => ErrorCode::BadId,
        }
    }
}

/// Render a message to its envelope text.
///
/// Deterministic: the same message always composes to the same bytes, and
/// absent optional fields emit no token at all.
///
/// # Examples
///
/// ```
/// use hiamp_message::{HiampMessage, Intent, codec};
///
/// let msg = HiampMessage::builder("stefan/architect", "alex/backend-dev")
///     .unwrap()
///     .intent(Intent::Handoff)
///     .body("The API contract is ready.")
///     .build();
/// let text = codec::compose(&msg);
/// assert!(text.starts_with("stefan/architect → alex/backend-dev\n"));
/// assert!(text.contains("\nhq-msg:v1 | id:"));
/// ```
#[must_use]
pub fn compose(msg: &HiampMessage) -> String {
    let mut trailer = format!(
        "{TRAILER_TAG} | id:{} | from:{} | to:{} | intent:{}",
        msg.id, msg.from, msg.to, msg.intent
    );
    if let Some(thread) = &msg.thread {
        trailer.push_str(&format!("{TOKEN_SEP}thread:{thread}"));
    }
    if let Some(reply_to) = &msg.reply_to {
        trailer.push_str(&format!("{TOKEN_SEP}reply-to:{reply_to}"));
    }
    if let Some(priority) = &msg.priority {
        trailer.push_str(&format!("{TOKEN_SEP}priority:{priority}"));
    }
    if let Some(ack) = &msg.ack {
        trailer.push_str(&format!("{TOKEN_SEP}ack:{ack}"));
    }
    if let Some(context) = &msg.context {
        trailer.push_str(&format!("{TOKEN_SEP}context:{context}"));
    }
    if let Some(reference) = &msg.reference {
        trailer.push_str(&format!("{TOKEN_SEP}ref:{reference}"));
    }
    format!(
        "{} → {}\n\n{}\n\n{RULE}\n{trailer}",
        msg.from, msg.to, msg.body
    )
}

/// Whether `text` looks like a HIAMP envelope at all (any version).
#[must_use]
pub fn is_envelope(text: &str) -> bool {
    text.lines().any(|l| l.starts_with(TRAILER_PREFIX))
}

/// Parse envelope text back into a [`HiampMessage`].
///
/// Locates the last trailer line, splits it on ` | `, validates every field,
/// and reconstructs the body from everything above the separator rule. The
/// header line is informational and discarded.
///
/// # Errors
///
/// - [`CodecError::InvalidEnvelope`] — no trailer, malformed token, or a
///   missing required key.
/// - [`CodecError::UnknownVersion`] — trailer tag is not `hq-msg:v1`.
/// - [`CodecError::BadAddress`] / [`CodecError::BadIntent`] /
///   [`CodecError::BadId`] — field-level validation failures.
pub fn parse(text: &str) -> Result<HiampMessage, CodecError> {
    let lines: Vec<&str> = text.lines().collect();
    let trailer_idx = lines
        .iter()
        .rposition(|l| l.starts_with(TRAILER_PREFIX))
        .ok_or_else(|| CodecError::InvalidEnvelope("no trailer line".into()))?;

    let mut tokens = lines[trailer_idx].split(TOKEN_SEP);
    let tag = tokens.next().unwrap_or_default();
    let version = tag.strip_prefix(TRAILER_PREFIX).unwrap_or_default();
    if version != PROTOCOL_VERSION {
        return Err(CodecError::UnknownVersion(version.to_string()));
    }

    let mut id = None;
    let mut from = None;
    let mut to = None;
    let mut intent = None;
    let mut thread = None;
    let mut reply_to = None;
    let mut priority = None;
    let mut ack = None;
    let mut context = None;
    let mut reference = None;

    for token in tokens {
        // Values may themselves contain colons (URLs), so split once only.
        let (key, value) = token
            .split_once(':')
            .ok_or_else(|| CodecError::InvalidEnvelope(format!("malformed token '{token}'")))?;
        match key {
            "id" => id = Some(value.to_string()),
            "from" => from = Some(value.to_string()),
            "to" => to = Some(value.to_string()),
            "intent" => intent = Some(value.to_string()),
            "thread" => thread = Some(value.to_string()),
            "reply-to" => reply_to = Some(value.to_string()),
            "priority" => priority = Some(value.to_string()),
            "ack" => ack = Some(value.to_string()),
            "context" => context = Some(value.to_string()),
            "ref" => reference = Some(value.to_string()),
            // Unknown keys are ignored for forward compatibility.
            _ => {}
        }
    }

    let id = id.ok_or_else(|| CodecError::InvalidEnvelope("missing 'id'".into()))?;
    if !hiamp_id::is_message_id(&id) {
        return Err(CodecError::BadId { field: "id", value: id });
    }

    let from = parse_address("from", from)?;
    let to = parse_address("to", to)?;

    let intent_raw =
        intent.ok_or_else(|| CodecError::InvalidEnvelope("missing 'intent'".into()))?;
    let intent: Intent = intent_raw
        .parse()
        .map_err(|()| CodecError::BadIntent(intent_raw))?;

    if let Some(t) = &thread
        && !hiamp_id::is_thread_id(t)
    {
        return Err(CodecError::BadId { field: "thread", value: t.clone() });
    }
    if let Some(r) = &reply_to
        && !hiamp_id::is_message_id(r)
    {
        return Err(CodecError::BadId { field: "reply-to", value: r.clone() });
    }

    let priority = match priority {
        None => None,
        Some(p) => Some(p.parse::<Priority>().map_err(|()| {
            CodecError::InvalidEnvelope(format!("unknown priority '{p}'"))
        })?),
    };
    let ack = match ack {
        None => None,
        Some(a) => Some(a.parse::<AckMode>().map_err(|()| {
            CodecError::InvalidEnvelope(format!("unknown ack mode '{a}'"))
        })?),
    };

    Ok(HiampMessage {
        id,
        from,
        to,
        intent,
        body: extract_body(&lines[..trailer_idx]),
        thread,
        reply_to,
        priority,
        ack,
        context,
        reference,
    })
}

fn parse_address(field: &'static str, value: Option<String>) -> Result<Address, CodecError> {
    let value =
        value.ok_or_else(|| CodecError::InvalidEnvelope(format!("missing '{field}'")))?;
    value.parse().map_err(|_| CodecError::BadAddress { field, value })
}

/// Reconstruct the body from the lines above the trailer.
fn extract_body(lines: &[&str]) -> String {
    let mut body: Vec<&str> = lines.to_vec();
    // Drop the separator rule and the blank line compose puts before it.
    if body
        .last()
        .is_some_and(|l| !l.is_empty() && l.chars().all(|c| c == '─'))
    {
        body.pop();
        if body.last().is_some_and(|l| l.is_empty()) {
            body.pop();
        }
    }
    // Drop the informational header and its following blank line.
    if body.first().is_some_and(|l| l.contains(" → ")) {
        body.remove(0);
        if body.first().is_some_and(|l| l.is_empty()) {
            body.remove(0);
        }
    }
    body.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
