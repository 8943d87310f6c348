// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-migrate
#![deny(unsafe_code)]
#![warn(missing_docs)]

use hiamp_config::{
    ChannelStrategy, HqConfig, TeamConfig, TrackerTransportConfig, TransportKind,
};
use std::collections::BTreeMap;

/// Placeholder project id the operator must replace after migration.
pub const TODO_PROJECT_ID: &str = "TODO";

/// Placeholder api-key env reference written into the migrated block.
const API_KEY_PLACEHOLDER: &str = "$LINEAR_API_KEY";

/// Errors from migration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MigrateError {
    /// The input config is not chat-style.
    #[error("config transport is '{0}', expected 'slack'")]
    NotChatConfig(String),

    /// The input config has no chat block to migrate.
    #[error("config has no slack block")]
    MissingChatBlock,
}

/// Result of a migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// The transformed configuration (transport switched to `linear`).
    pub config: HqConfig,
    /// Channels that could not be mapped automatically.
    pub warnings: Vec<String>,
    /// Human-readable description of what was mapped.
    pub summary: Vec<String>,
}

/// Transform a chat-style config into an issue-tracker-style config.
///
/// Identity, peers, worker permissions, security, and settings carry over
/// unchanged. Channel mapping:
///
/// - `dedicated` — a single default team, no project mapping.
/// - `contextual` — each context tag becomes `project-mappings[tag]` under
///   the default team with a [`TODO_PROJECT_ID`] placeholder.
/// - `per-relationship` / `dm` — no automatic mapping; surfaced as warnings.
///
/// # Errors
///
/// Fails when the input is not a chat-style config.
pub fn migrate_chat_to_tracker(
    config: &HqConfig,
    default_team: &str,
) -> Result<MigrationOutcome, MigrateError> {
    if config.transport != TransportKind::Slack {
        return Err(MigrateError::NotChatConfig(config.transport.as_str().into()));
    }
    let chat = config.slack.as_ref().ok_or(MigrateError::MissingChatBlock)?;

    let mut warnings = Vec::new();
    let mut summary = vec![format!("default team set to '{default_team}'")];
    let mut project_mappings = BTreeMap::new();

    match chat.strategy {
        ChannelStrategy::Dedicated => {
            summary.push(format!(
                "dedicated channel {} now maps to the team's agent-comms issue",
                chat.dedicated_channel.as_deref().unwrap_or("(unset)")
            ));
        }
        ChannelStrategy::Contextual => {
            for (tag, context) in &chat.contexts {
                project_mappings.insert(tag.clone(), TODO_PROJECT_ID.to_string());
                summary.push(format!(
                    "context '{tag}' (channel {}) mapped to project-mappings['{tag}'] = {TODO_PROJECT_ID} \
                     — fill in the real project id",
                    context.channel_id
                ));
            }
        }
        ChannelStrategy::PerRelationship => {
            warnings.push(
                "per-relationship channels have no tracker equivalent; peers will use the \
                 agent-comms issue until contexts are declared"
                    .to_string(),
            );
        }
        ChannelStrategy::Dm => {
            warnings.push(
                "dm channels have no tracker equivalent; peers will use the agent-comms issue"
                    .to_string(),
            );
        }
    }

    let mut migrated = config.clone();
    migrated.transport = TransportKind::Linear;
    migrated.slack = None;
    migrated.linear = Some(TrackerTransportConfig {
        api_key: API_KEY_PLACEHOLDER.to_string(),
        default_team: default_team.to_string(),
        teams: vec![TeamConfig {
            key: default_team.to_string(),
            agent_comms_issue_id: None,
            project_mappings,
        }],
    });
    summary.push(format!(
        "{} peer(s) and {} worker permission entrie(s) carried over unchanged",
        migrated.peers.len(),
        migrated.worker_permissions.workers.len()
    ));

    Ok(MigrationOutcome {
        config: migrated,
        warnings,
        summary,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn slack_config(strategy_block: &str) -> HqConfig {
        let yaml = format!(
            r#"
identity:
  owner: stefan
  instance-id: stefan-hq-primary

peers:
  - owner: alex
    workers: [backend-dev]

transport: slack

slack:
  bot-token: xoxb-test
{strategy_block}

worker-permissions:
  default: deny
  workers:
    - id: architect
      send: true
      receive: true
"#
        );
        hiamp_config::parse_str(&yaml).unwrap()
    }

    #[test]
    fn dedicated_maps_to_a_bare_default_team() {
        let cfg = slack_config("  strategy: dedicated\n  dedicated-channel: C-DEDICATED");
        let outcome = migrate_chat_to_tracker(&cfg, "ENG").unwrap();

        assert_eq!(outcome.config.transport, TransportKind::Linear);
        assert!(outcome.config.slack.is_none());
        let linear = outcome.config.linear.unwrap();
        assert_eq!(linear.default_team, "ENG");
        assert_eq!(linear.teams.len(), 1);
        assert!(linear.teams[0].project_mappings.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn contextual_channels_become_todo_project_mappings() {
        let cfg = slack_config(
            "  strategy: contextual\n  contexts:\n    hq-cloud:\n      channel-id: C-CLOUD\n    planning:\n      channel-id: C-PLAN",
        );
        let outcome = migrate_chat_to_tracker(&cfg, "ENG").unwrap();

        let linear = outcome.config.linear.unwrap();
        let mappings = &linear.teams[0].project_mappings;
        assert_eq!(mappings.len(), 2);
        assert_eq!(mappings["hq-cloud"], TODO_PROJECT_ID);
        assert_eq!(mappings["planning"], TODO_PROJECT_ID);
        assert!(outcome.summary.iter().any(|s| s.contains("hq-cloud")));
    }

    #[test]
    fn per_relationship_surfaces_only_warnings() {
        let cfg = slack_config("  strategy: per-relationship");
        let outcome = migrate_chat_to_tracker(&cfg, "ENG").unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("per-relationship"));
        assert!(outcome.config.linear.unwrap().teams[0].project_mappings.is_empty());
    }

    #[test]
    fn identity_peers_and_permissions_carry_over() {
        let cfg = slack_config("  strategy: dedicated\n  dedicated-channel: C-X");
        let outcome = migrate_chat_to_tracker(&cfg, "ENG").unwrap();
        assert_eq!(outcome.config.identity, cfg.identity);
        assert_eq!(outcome.config.peers, cfg.peers);
        assert_eq!(outcome.config.worker_permissions, cfg.worker_permissions);
    }

    #[test]
    fn migrated_config_passes_validation() {
        let cfg = slack_config("  strategy: dedicated\n  dedicated-channel: C-X");
        let outcome = migrate_chat_to_tracker(&cfg, "ENG").unwrap();
        assert!(hiamp_config::validate(&outcome.config).is_empty());
        // And it serializes back to a loadable document.
        let yaml = serde_yaml::to_string(&outcome.config).unwrap();
        assert!(yaml.contains("transport: linear"));
        assert!(yaml.contains("default-team: ENG"));
    }

    #[test]
    fn tracker_config_is_rejected_as_input() {
        let mut cfg = slack_config("  strategy: dedicated\n  dedicated-channel: C-X");
        cfg.transport = TransportKind::Linear;
        let err = migrate_chat_to_tracker(&cfg, "ENG").unwrap_err();
        assert_eq!(err, MigrateError::NotChatConfig("linear".into()));
    }
}
