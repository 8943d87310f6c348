// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-config
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod paths;

use hiamp_error::ErrorCode;
use hiamp_message::Intent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

// ---------------------------------------------------------------------------
// Errors & warnings
// ---------------------------------------------------------------------------

/// A single field-level validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Dotted path of the offending field (e.g. `identity.owner`).
    pub field: String,
    /// What is wrong with it.
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Errors from configuration loading or validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The requested configuration file was not found.
    #[error("config file not found: {path}")]
    Missing {
        /// Path that was requested.
        path: String,
    },

    /// The file could not be parsed as the expected document shape.
    #[error("failed to parse config: {reason}")]
    Parse {
        /// Human-readable parse error detail.
        reason: String,
    },

    /// Semantic validation failed with one or more field issues.
    #[error("config validation failed ({0} issue(s))", .issues.len())]
    Validation {
        /// Individual field-level failures.
        issues: Vec<ValidationIssue>,
    },
}

impl ConfigError {
    /// The stable [`ErrorCode`] this error maps to.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Missing { .. } => ErrorCode::ConfigMissing,
            Self::Parse { .. } => ErrorCode::ConfigParseError,
            Self::Validation { .. } => ErrorCode::ConfigValidation,
        }
    }

    /// The field issues, when this is a validation failure.
    #[must_use]
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            Self::Validation { issues } => issues,
            _ => &[],
        }
    }
}

/// Advisory-level findings that do not prevent operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigWarning {
    /// No peers are declared; every send will fail address validation.
    NoPeers,
    /// The kill switch is engaged; every send will fail.
    KillSwitchEngaged,
    /// A worker entry grants neither send nor receive.
    InertWorkerEntry {
        /// Worker id.
        worker: String,
    },
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPeers => write!(f, "no peers declared — outbound sends cannot resolve"),
            Self::KillSwitchEngaged => write!(f, "security.kill-switch is engaged"),
            Self::InertWorkerEntry { worker } => {
                write!(f, "worker '{worker}' grants neither send nor receive")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level HQ configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HqConfig {
    /// Who this HQ is.
    pub identity: Identity,
    /// Remote HQs reachable through the shared transport.
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    /// Which transport carries messages.
    pub transport: TransportKind,
    /// Chat-transport block (required when `transport: slack`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slack: Option<ChatTransportConfig>,
    /// Tracker-transport block (required when `transport: linear`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub linear: Option<TrackerTransportConfig>,
    /// Per-worker send/receive policy.
    #[serde(default)]
    pub worker_permissions: WorkerPermissions,
    /// Security flags.
    #[serde(default)]
    pub security: SecurityConfig,
    /// Operational settings.
    #[serde(default)]
    pub settings: Settings,
}

impl HqConfig {
    /// Look up a peer by owner name.
    #[must_use]
    pub fn peer(&self, owner: &str) -> Option<&PeerConfig> {
        self.peers.iter().find(|p| p.owner == owner)
    }
}

/// The identity section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Identity {
    /// Globally unique owner name (lowercase kebab).
    pub owner: String,
    /// Instance id, same shape as the owner name.
    pub instance_id: String,
    /// Optional human-facing display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Operator-configured trust granted to a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TrustLevel {
    /// Full trust: any artifact kind accepted.
    Full,
    /// Trust scoped to the shared channel.
    #[default]
    ChannelScoped,
    /// Messages accepted, bundles require explicit approval.
    ReadOnly,
}

/// One remote HQ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PeerConfig {
    /// Peer owner name.
    pub owner: String,
    /// Agreed trust level.
    #[serde(default)]
    pub trust: TrustLevel,
    /// Workers reachable on that peer.
    #[serde(default)]
    pub workers: Vec<String>,
    /// Transport-native bot/user id for the peer, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Which transport implementation carries envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Chat-room style (Slack-like workspace).
    Slack,
    /// Issue-tracker style (Linear-like tracker).
    Linear,
}

impl TransportKind {
    /// Stable lowercase label, as used in transfer envelopes and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slack => "slack",
            Self::Linear => "linear",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the chat transport maps peers to channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelStrategy {
    /// One shared channel for all HIAMP traffic.
    Dedicated,
    /// One channel per ordered peer pair.
    PerRelationship,
    /// One channel per declared context tag.
    Contextual,
    /// Private direct channel per peer.
    Dm,
}

impl ChannelStrategy {
    /// Stable kebab label (also the `strategy` field of a resolution).
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dedicated => "dedicated",
            Self::PerRelationship => "per-relationship",
            Self::Contextual => "contextual",
            Self::Dm => "dm",
        }
    }
}

/// A context-tag channel declaration for the `contextual` strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ContextChannel {
    /// Transport-native channel id.
    pub channel_id: String,
    /// Peers subscribed to the context.
    #[serde(default)]
    pub subscribers: Vec<String>,
}

/// Chat-transport configuration block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChatTransportConfig {
    /// Bot token (commonly a `$NAME` env reference in the file).
    pub bot_token: String,
    /// App-level token for the event socket, when watching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_token: Option<String>,
    /// Channel mapping strategy.
    pub strategy: ChannelStrategy,
    /// Channel id for the `dedicated` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedicated_channel: Option<String>,
    /// Channel-name prefix for the `per-relationship` strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_prefix: Option<String>,
    /// Context declarations for the `contextual` strategy.
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextChannel>,
}

/// One team in the tracker-transport block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TeamConfig {
    /// Team key (e.g. `ENG`).
    pub key: String,
    /// Pinned agent-communications issue id, if already created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_comms_issue_id: Option<String>,
    /// Context-tag → project-id mappings.
    #[serde(default)]
    pub project_mappings: BTreeMap<String, String>,
}

/// Tracker-transport configuration block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TrackerTransportConfig {
    /// API key (commonly a `$NAME` env reference in the file).
    pub api_key: String,
    /// Team used when no context mapping applies.
    pub default_team: String,
    /// All teams HIAMP may touch.
    #[serde(default)]
    pub teams: Vec<TeamConfig>,
}

impl TrackerTransportConfig {
    /// Look up a team by key.
    #[must_use]
    pub fn team(&self, key: &str) -> Option<&TeamConfig> {
        self.teams.iter().find(|t| t.key == key)
    }
}

/// Default ruling when a worker has no explicit permission entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionDefault {
    /// Unlisted workers may send and receive.
    Allow,
    /// Unlisted workers may do neither.
    #[default]
    Deny,
}

/// Explicit permission entry for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerPermission {
    /// Worker id this entry covers.
    pub id: String,
    /// May originate outbound messages.
    #[serde(default)]
    pub send: bool,
    /// May be addressed by inbound messages.
    #[serde(default)]
    pub receive: bool,
    /// If present, the only intents this worker may send.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_intents: Option<Vec<String>>,
    /// If present, the only peers this worker may address (`*` = any).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_peers: Option<Vec<String>>,
}

impl WorkerPermission {
    /// Whether this entry permits the given intent.
    #[must_use]
    pub fn allows_intent(&self, intent: Intent) -> bool {
        match &self.allowed_intents {
            None => true,
            Some(list) => list.iter().any(|i| i == intent.as_str()),
        }
    }

    /// Whether this entry permits addressing the given peer.
    #[must_use]
    pub fn allows_peer(&self, peer: &str) -> bool {
        match &self.allowed_peers {
            None => true,
            Some(list) => list.iter().any(|p| p == "*" || p == peer),
        }
    }
}

/// The worker permission matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct WorkerPermissions {
    /// Ruling for workers without an explicit entry.
    #[serde(default)]
    pub default: PermissionDefault,
    /// Explicit entries.
    #[serde(default)]
    pub workers: Vec<WorkerPermission>,
}

impl WorkerPermissions {
    /// Explicit entry for a worker, if any.
    #[must_use]
    pub fn entry(&self, worker: &str) -> Option<&WorkerPermission> {
        self.workers.iter().find(|w| w.id == worker)
    }

    /// Whether the worker may originate outbound messages.
    #[must_use]
    pub fn send_allowed(&self, worker: &str) -> bool {
        match self.entry(worker) {
            Some(e) => e.send,
            None => self.default == PermissionDefault::Allow,
        }
    }

    /// Whether the worker may be addressed by inbound messages.
    #[must_use]
    pub fn receive_allowed(&self, worker: &str) -> bool {
        match self.entry(worker) {
            Some(e) => e.receive,
            None => self.default == PermissionDefault::Allow,
        }
    }
}

/// Rate-limit knobs under `security`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitConfig {
    /// Per-worker outbound cap.
    pub max_messages_per_minute: u32,
    /// Whole-HQ outbound cap.
    pub max_messages_per_minute_global: u32,
}

/// The security section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct SecurityConfig {
    /// When set, every outbound send fails with `KILL_SWITCH`.
    #[serde(default)]
    pub kill_switch: bool,
    /// Trust assumed for peers that do not declare one.
    #[serde(default)]
    pub default_trust: TrustLevel,
    /// Optional outbound rate limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limiting: Option<RateLimitConfig>,
}

/// Operational settings with their documented defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Settings {
    /// Master enable flag; `false` fails every send with `DISABLED`.
    pub enabled: bool,
    /// Seconds to wait for a requested ack.
    pub ack_timeout_secs: u64,
    /// Retry budget for rate-limited sends.
    pub max_retries: u32,
    /// Seconds of silence after which a thread counts as idle.
    pub thread_idle_timeout_secs: u64,
    /// Maximum thread age in seconds.
    pub thread_max_age_secs: u64,
    /// Maximum message body size in bytes.
    pub message_max_bytes: usize,
    /// Maximum inline attachment size in bytes.
    pub attachment_max_bytes: usize,
    /// Override for the inbox directory (relative to the HQ root).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbox_dir: Option<String>,
    /// Override for the thread-log directory (relative to the HQ root).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_log_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            ack_timeout_secs: 300,
            max_retries: 1,
            thread_idle_timeout_secs: 86_400,
            thread_max_age_secs: 604_800,
            message_max_bytes: 4_000,
            attachment_max_bytes: 4_000,
            inbox_dir: None,
            thread_log_dir: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load, env-resolve, and validate a config file.
///
/// # Errors
///
/// [`ConfigError::Missing`] if the file does not exist, [`ConfigError::Parse`]
/// if it is not a well-formed document (a missing required section fails fast
/// here), and [`ConfigError::Validation`] with every accumulated field issue
/// otherwise.
pub fn load_file(path: &Path) -> Result<HqConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::Missing {
        path: path.display().to_string(),
    })?;
    parse_str(&content)
}

/// Parse and validate a config document from a string.
pub fn parse_str(content: &str) -> Result<HqConfig, ConfigError> {
    let mut value: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;

    let mut issues = Vec::new();
    resolve_env(&mut value, "", &mut issues);

    let config: HqConfig = serde_yaml::from_value(value).map_err(|e| ConfigError::Parse {
        reason: e.to_string(),
    })?;

    issues.extend(validate(&config));
    if issues.is_empty() {
        Ok(config)
    } else {
        Err(ConfigError::Validation { issues })
    }
}

/// Replace `$NAME` string scalars with values from the process environment.
///
/// A `$$` prefix escapes a literal dollar sign.
fn resolve_env(value: &mut serde_yaml::Value, path: &str, issues: &mut Vec<ValidationIssue>) {
    match value {
        serde_yaml::Value::String(s) => {
            if let Some(rest) = s.strip_prefix("$$") {
                *s = format!("${rest}");
            } else if let Some(name) = s.strip_prefix('$') {
                match std::env::var(name) {
                    Ok(v) => *s = v,
                    Err(_) => issues.push(ValidationIssue {
                        field: path.to_string(),
                        message: format!("environment variable '{name}' is not set"),
                    }),
                }
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (k, v) in map.iter_mut() {
                let key = k.as_str().unwrap_or("?");
                let child = if path.is_empty() {
                    key.to_string()
                } else {
                    format!("{path}.{key}")
                };
                resolve_env(v, &child, issues);
            }
        }
        serde_yaml::Value::Sequence(seq) => {
            for (i, v) in seq.iter_mut().enumerate() {
                resolve_env(v, &format!("{path}[{i}]"), issues);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a parsed configuration, accumulating every issue.
#[must_use]
pub fn validate(config: &HqConfig) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut push = |field: &str, message: String| {
        issues.push(ValidationIssue {
            field: field.to_string(),
            message,
        });
    };

    if !hiamp_id::is_kebab_name(&config.identity.owner) {
        push(
            "identity.owner",
            format!("'{}' is not a lowercase kebab name (2–32 chars)", config.identity.owner),
        );
    }
    if !hiamp_id::is_kebab_name(&config.identity.instance_id) {
        push(
            "identity.instance-id",
            format!("'{}' is not a lowercase kebab name (2–32 chars)", config.identity.instance_id),
        );
    }

    let mut seen_peers = std::collections::BTreeSet::new();
    for (i, peer) in config.peers.iter().enumerate() {
        let field = format!("peers[{i}].owner");
        if !hiamp_id::is_kebab_name(&peer.owner) {
            push(&field, format!("'{}' is not a lowercase kebab name", peer.owner));
        }
        if !seen_peers.insert(peer.owner.as_str()) {
            push(&field, format!("duplicate peer '{}'", peer.owner));
        }
        for (j, worker) in peer.workers.iter().enumerate() {
            if !hiamp_id::is_worker_segment(worker) {
                push(
                    &format!("peers[{i}].workers[{j}]"),
                    format!("'{worker}' is not a valid worker id"),
                );
            }
        }
    }

    match config.transport {
        TransportKind::Slack => match &config.slack {
            None => push("slack", "transport is 'slack' but the slack block is missing".into()),
            Some(chat) => {
                if chat.bot_token.trim().is_empty() {
                    push("slack.bot-token", "must not be empty".into());
                }
                match chat.strategy {
                    ChannelStrategy::Dedicated if chat.dedicated_channel.is_none() => {
                        push(
                            "slack.dedicated-channel",
                            "required for the dedicated strategy".into(),
                        );
                    }
                    ChannelStrategy::Contextual if chat.contexts.is_empty() => {
                        push("slack.contexts", "required for the contextual strategy".into());
                    }
                    _ => {}
                }
            }
        },
        TransportKind::Linear => match &config.linear {
            None => push("linear", "transport is 'linear' but the linear block is missing".into()),
            Some(tracker) => {
                if tracker.api_key.trim().is_empty() {
                    push("linear.api-key", "must not be empty".into());
                }
                if tracker.team(&tracker.default_team).is_none() {
                    push(
                        "linear.default-team",
                        format!("'{}' does not appear in linear.teams", tracker.default_team),
                    );
                }
                for (i, team) in tracker.teams.iter().enumerate() {
                    if team.key.trim().is_empty() {
                        push(&format!("linear.teams[{i}].key"), "must not be empty".into());
                    }
                }
            }
        },
    }

    for (i, worker) in config.worker_permissions.workers.iter().enumerate() {
        if !hiamp_id::is_worker_segment(&worker.id) {
            push(
                &format!("worker-permissions.workers[{i}].id"),
                format!("'{}' is not a valid worker id", worker.id),
            );
        }
        if let Some(intents) = &worker.allowed_intents {
            for (j, intent) in intents.iter().enumerate() {
                if intent.parse::<Intent>().is_err() {
                    push(
                        &format!("worker-permissions.workers[{i}].allowed-intents[{j}]"),
                        format!("'{intent}' is not a HIAMP intent"),
                    );
                }
            }
        }
        if let Some(peers) = &worker.allowed_peers {
            for (j, peer) in peers.iter().enumerate() {
                if peer != "*" && config.peer(peer).is_none() {
                    push(
                        &format!("worker-permissions.workers[{i}].allowed-peers[{j}]"),
                        format!("'{peer}' is not a declared peer"),
                    );
                }
            }
        }
    }

    if config.settings.message_max_bytes == 0 {
        push("settings.message-max-bytes", "must be greater than zero".into());
    }

    issues
}

/// Collect advisory warnings for a valid configuration.
#[must_use]
pub fn warnings(config: &HqConfig) -> Vec<ConfigWarning> {
    let mut out = Vec::new();
    if config.peers.is_empty() {
        out.push(ConfigWarning::NoPeers);
    }
    if config.security.kill_switch {
        out.push(ConfigWarning::KillSwitchEngaged);
    }
    for worker in &config.worker_permissions.workers {
        if !worker.send && !worker.receive {
            out.push(ConfigWarning::InertWorkerEntry {
                worker: worker.id.clone(),
            });
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
