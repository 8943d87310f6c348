// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-id
#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Prefix of message identifiers.
pub const MSG_PREFIX: &str = "msg-";
/// Prefix of thread identifiers.
pub const THR_PREFIX: &str = "thr-";
/// Prefix of transfer identifiers.
pub const TXFR_PREFIX: &str = "txfr-";

/// Hex digits carried by a fresh message or thread id.
const SHORT_ID_HEX: usize = 8;
/// Hex digits carried by a fresh transfer id.
const TRANSFER_ID_HEX: usize = 12;

fn random_hex(n: usize) -> String {
    // A v4 UUID gives 32 hex chars of entropy; we only ever take a prefix.
    let hex = Uuid::new_v4().simple().to_string();
    hex[..n].to_string()
}

/// Generate a fresh message id (`msg-` + 8 hex chars).
///
/// # Examples
///
/// ```
/// let id = hiamp_id::message_id();
/// assert!(hiamp_id::is_message_id(&id));
/// ```
#[must_use]
pub fn message_id() -> String {
    format!("{MSG_PREFIX}{}", random_hex(SHORT_ID_HEX))
}

/// Generate a fresh thread id (`thr-` + 8 hex chars).
#[must_use]
pub fn thread_id() -> String {
    format!("{THR_PREFIX}{}", random_hex(SHORT_ID_HEX))
}

/// Generate a fresh transfer id (`txfr-` + 12 hex chars).
#[must_use]
pub fn transfer_id() -> String {
    format!("{TXFR_PREFIX}{}", random_hex(TRANSFER_ID_HEX))
}

/// Generate ids until `is_taken` rejects one.
///
/// Ids carry ≥33 bits of entropy, so a collision is already rare; one
/// regeneration resolves it.
pub fn fresh_id(mut generate: impl FnMut() -> String, is_taken: impl Fn(&str) -> bool) -> String {
    loop {
        let id = generate();
        if !is_taken(&id) {
            return id;
        }
    }
}

/// Current time as ISO-8601 UTC without sub-second precision.
///
/// # Examples
///
/// ```
/// let ts = hiamp_id::utc_timestamp();
/// assert!(ts.ends_with('Z'));
/// assert_eq!(ts.len(), 20); // 2026-01-02T03:04:05Z
/// ```
#[must_use]
pub fn utc_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Current UTC date as `YYYY-MM-DD` (used for per-day log file names).
#[must_use]
pub fn utc_date() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

// ---------------------------------------------------------------------------
// Identifier syntax
// ---------------------------------------------------------------------------

fn is_lower_hexish(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Check an owner or instance name: lowercase kebab, 2–32 chars, matching
/// `[a-z0-9]([a-z0-9-]*[a-z0-9])?`.
#[must_use]
pub fn is_kebab_name(s: &str) -> bool {
    let len = s.len();
    if !(2..=32).contains(&len) {
        return false;
    }
    let bytes = s.as_bytes();
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    if !edge_ok(bytes[0]) || !edge_ok(bytes[len - 1]) {
        return false;
    }
    bytes.iter().all(|&b| edge_ok(b) || b == b'-')
}

/// Check a worker-id segment: one or more of `[a-z0-9-]`.
#[must_use]
pub fn is_worker_segment(s: &str) -> bool {
    !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

fn has_id_shape(s: &str, prefix: &str, min_hex: usize) -> bool {
    s.strip_prefix(prefix)
        .is_some_and(|rest| rest.len() >= min_hex && is_lower_hexish(rest))
}

/// Check a message id against `msg-[a-z0-9]{8,}`.
#[must_use]
pub fn is_message_id(s: &str) -> bool {
    has_id_shape(s, MSG_PREFIX, SHORT_ID_HEX)
}

/// Check a thread id against `thr-[a-z0-9]{8,}`.
#[must_use]
pub fn is_thread_id(s: &str) -> bool {
    has_id_shape(s, THR_PREFIX, SHORT_ID_HEX)
}

/// Check a transfer id against `txfr-[a-z0-9]{12,}`.
#[must_use]
pub fn is_transfer_id(s: &str) -> bool {
    has_id_shape(s, TXFR_PREFIX, TRANSFER_ID_HEX)
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// Error returned when an address string does not match `owner/worker`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid address '{input}': expected owner/worker with [a-z0-9-] segments")]
pub struct AddressParseError {
    /// The rejected input.
    pub input: String,
}

/// A worker address: `<owner>/<worker-id>`.
///
/// Serializes as the plain `owner/worker` string.
///
/// # Examples
///
/// ```
/// use hiamp_id::Address;
///
/// let addr: Address = "stefan/architect".parse().unwrap();
/// assert_eq!(addr.owner, "stefan");
/// assert_eq!(addr.worker, "architect");
/// assert_eq!(addr.to_string(), "stefan/architect");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    /// Owner (HQ) name.
    pub owner: String,
    /// Worker id within that HQ.
    pub worker: String,
}

impl Address {
    /// Build an address from parts without re-validating them.
    ///
    /// Prefer [`str::parse`] for untrusted input.
    #[must_use]
    pub fn new(owner: impl Into<String>, worker: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            worker: worker.into(),
        }
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let reject = || AddressParseError { input: s.into() };
        let (owner, worker) = s.split_once('/').ok_or_else(reject)?;
        if !is_worker_segment(owner) || !is_worker_segment(worker) {
            return Err(reject());
        }
        Ok(Self::new(owner, worker))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.worker)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_the_documented_shape() {
        assert!(is_message_id(&message_id()));
        assert!(is_thread_id(&thread_id()));
        assert!(is_transfer_id(&transfer_id()));
        assert_eq!(message_id().len(), MSG_PREFIX.len() + 8);
        assert_eq!(transfer_id().len(), TXFR_PREFIX.len() + 12);
    }

    #[test]
    fn generated_ids_are_distinct() {
        let a = message_id();
        let b = message_id();
        assert_ne!(a, b);
    }

    #[test]
    fn fresh_id_regenerates_on_collision() {
        let taken = message_id();
        let mut calls = 0;
        let id = fresh_id(
            || {
                calls += 1;
                if calls == 1 { taken.clone() } else { message_id() }
            },
            |candidate| candidate == taken,
        );
        assert_ne!(id, taken);
        assert_eq!(calls, 2);
    }

    #[test]
    fn id_shape_rejections() {
        assert!(!is_message_id("msg-SHOUT123"));
        assert!(!is_message_id("msg-abc"));
        assert!(!is_message_id("thr-abcdef12"));
        assert!(!is_thread_id("thr-"));
        assert!(!is_transfer_id("txfr-abcdef12")); // only 8 chars
        assert!(is_transfer_id("txfr-0123456789ab"));
    }

    #[test]
    fn timestamp_has_no_subseconds() {
        let ts = utc_timestamp();
        assert!(!ts.contains('.'));
        assert_eq!(ts.len(), "2026-01-02T03:04:05Z".len());
    }

    #[test]
    fn kebab_names() {
        assert!(is_kebab_name("stefan"));
        assert!(is_kebab_name("stefan-hq-primary"));
        assert!(is_kebab_name("a1"));
        assert!(!is_kebab_name("a")); // too short
        assert!(!is_kebab_name("-leading"));
        assert!(!is_kebab_name("trailing-"));
        assert!(!is_kebab_name("Upper"));
        assert!(!is_kebab_name(&"x".repeat(33)));
    }

    #[test]
    fn address_parse_and_display() {
        let addr: Address = "alex/backend-dev".parse().unwrap();
        assert_eq!(addr, Address::new("alex", "backend-dev"));
        assert_eq!(addr.to_string(), "alex/backend-dev");
    }

    #[test]
    fn address_rejects_malformed_input() {
        for bad in ["", "alex", "alex/", "/dev", "alex/dev/extra", "Alex/dev", "alex dev"] {
            assert!(bad.parse::<Address>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn address_serde_is_a_plain_string() {
        let addr = Address::new("stefan", "architect");
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, r#""stefan/architect""#);
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn valid_segments_roundtrip(owner in "[a-z0-9-]{1,16}", worker in "[a-z0-9-]{1,16}") {
                let s = format!("{owner}/{worker}");
                let addr: Address = s.parse().unwrap();
                prop_assert_eq!(addr.to_string(), s);
            }

            #[test]
            fn message_ids_always_validate(_n in 0u8..32) {
                prop_assert!(is_message_id(&message_id()));
            }
        }
    }
}
