// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-transport-tracker
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod client;
pub mod mock;

use api::{TrackerApi, TrackerIssue, is_issue_identifier, is_issue_uuid};
use async_trait::async_trait;
use hiamp_config::TrackerTransportConfig;
use hiamp_error::ErrorCode;
use hiamp_transport::cache::TtlCache;
use hiamp_transport::{
    ChannelResolution, Inbound, ReplyOutcome, SendOutcome, Transport, TransportError,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Title of the lazily created per-context issue.
fn context_issue_title(context_tag: &str) -> String {
    format!("[HIAMP] {context_tag}")
}

/// Title of the team's fallback issue.
const AGENT_COMMS_TITLE: &str = "[HIAMP] Agent Communications";

/// Poll interval for the pull-based watcher.
const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Issue-tracker transport over any [`TrackerApi`].
pub struct TrackerTransport {
    api: Arc<dyn TrackerApi>,
    config: TrackerTransportConfig,
    /// contextTag → issue UUID.
    context_issues: TtlCache<String>,
    /// `<KEY>-<N>` identifier → issue UUID.
    issue_ids: TtlCache<String>,
    /// team key → team UUID.
    team_ids: TtlCache<String>,
    /// Issues whose comment streams the watcher polls, with the count of
    /// comments already surfaced.
    watched_issues: Arc<Mutex<HashMap<String, usize>>>,
    watch_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl TrackerTransport {
    /// Build a transport from the tracker config block.
    #[must_use]
    pub fn new(api: Arc<dyn TrackerApi>, config: TrackerTransportConfig) -> Self {
        Self::with_ttl(api, config, hiamp_transport::cache::DEFAULT_TTL)
    }

    /// Build a transport with an explicit cache TTL (all three caches).
    #[must_use]
    pub fn with_ttl(
        api: Arc<dyn TrackerApi>,
        config: TrackerTransportConfig,
        ttl: Duration,
    ) -> Self {
        Self {
            api,
            config,
            context_issues: TtlCache::new(ttl),
            issue_ids: TtlCache::new(ttl),
            team_ids: TtlCache::new(ttl),
            watched_issues: Arc::new(Mutex::new(HashMap::new())),
            watch_task: Mutex::new(None),
        }
    }

    fn track_issue(&self, issue_id: &str) {
        self.watched_issues
            .lock()
            .expect("watch set lock poisoned")
            .entry(issue_id.to_string())
            .or_insert(0);
    }

    /// Ensure a team key is known to the backing API (cached).
    async fn require_team(&self, team_key: &str) -> Result<String, TransportError> {
        if let Some(hit) = self.team_ids.get(team_key) {
            return Ok(hit);
        }
        let uuid = self
            .api
            .team_id(team_key)
            .await?
            .ok_or_else(|| {
                TransportError::new(
                    ErrorCode::UnknownTeam,
                    format!("team '{team_key}' is not known to the tracker"),
                )
            })?;
        self.team_ids.insert(team_key, uuid.clone());
        Ok(uuid)
    }

    /// Stage 1: explicit issue reference.
    async fn resolve_explicit(
        &self,
        issue_ref: &str,
    ) -> Result<ChannelResolution, TransportError> {
        if let Some(uuid) = self.issue_ids.get(issue_ref) {
            return Ok(ChannelResolution {
                channel_id: uuid,
                channel_name: Some(issue_ref.to_string()),
                strategy: "explicit".into(),
            });
        }
        let issue = self.api.issue_by_ref(issue_ref).await?.ok_or_else(|| {
            TransportError::new(
                ErrorCode::IssueNotFound,
                format!("issue '{issue_ref}' does not exist"),
            )
        })?;
        self.issue_ids.insert(issue.identifier.clone(), issue.id.clone());
        Ok(ChannelResolution {
            channel_id: issue.id,
            channel_name: Some(issue.identifier),
            strategy: "explicit".into(),
        })
    }

    /// Stage 2: project-context lookup with lazy issue creation.
    ///
    /// Returns `Ok(None)` when the context has no project mapping — the
    /// cascade then falls through to the agent-comms issue.
    async fn resolve_project_context(
        &self,
        context_tag: &str,
    ) -> Result<Option<ChannelResolution>, TransportError> {
        if let Some(hit) = self.context_issues.get(context_tag) {
            return Ok(Some(ChannelResolution {
                channel_id: hit,
                channel_name: Some(context_issue_title(context_tag)),
                strategy: "project-context".into(),
            }));
        }

        let team = match self.config.team(&self.config.default_team) {
            Some(team) => team,
            None => return Ok(None),
        };
        let Some(project_id) = team.project_mappings.get(context_tag) else {
            return Ok(None);
        };

        self.require_team(&team.key).await?;
        let title = context_issue_title(context_tag);
        let issue = match self
            .api
            .search_issues(&team.key, &title)
            .await?
            .into_iter()
            .find(|i| i.title == title)
        {
            Some(found) => found,
            None => {
                info!(context = context_tag, team = %team.key, "creating context issue");
                self.create_issue(&team.key, &title, Some(project_id)).await?
            }
        };

        // A successful miss-then-create writes the cache immediately.
        self.context_issues.insert(context_tag, issue.id.clone());
        self.issue_ids.insert(issue.identifier.clone(), issue.id.clone());
        Ok(Some(ChannelResolution {
            channel_id: issue.id,
            channel_name: Some(title),
            strategy: "project-context".into(),
        }))
    }

    /// Stage 3: the team's agent-communications fallback issue.
    async fn resolve_agent_comms(&self) -> Result<ChannelResolution, TransportError> {
        let team = self.config.team(&self.config.default_team).ok_or_else(|| {
            TransportError::new(
                ErrorCode::UnknownTeam,
                format!("default team '{}' is not configured", self.config.default_team),
            )
        })?;

        if let Some(pinned) = &team.agent_comms_issue_id {
            return Ok(ChannelResolution {
                channel_id: pinned.clone(),
                channel_name: Some(AGENT_COMMS_TITLE.into()),
                strategy: "agent-comms".into(),
            });
        }

        if let Some(hit) = self.context_issues.get(AGENT_COMMS_TITLE) {
            return Ok(ChannelResolution {
                channel_id: hit,
                channel_name: Some(AGENT_COMMS_TITLE.into()),
                strategy: "agent-comms".into(),
            });
        }

        self.require_team(&team.key).await?;
        let issue = match self
            .api
            .search_issues(&team.key, AGENT_COMMS_TITLE)
            .await?
            .into_iter()
            .find(|i| i.title == AGENT_COMMS_TITLE)
        {
            Some(found) => found,
            None => {
                info!(team = %team.key, "creating agent-comms issue");
                self.create_issue(&team.key, AGENT_COMMS_TITLE, None).await?
            }
        };

        self.context_issues.insert(AGENT_COMMS_TITLE, issue.id.clone());
        Ok(ChannelResolution {
            channel_id: issue.id,
            channel_name: Some(AGENT_COMMS_TITLE.into()),
            strategy: "agent-comms".into(),
        })
    }

    async fn create_issue(
        &self,
        team_key: &str,
        title: &str,
        project_id: Option<&str>,
    ) -> Result<TrackerIssue, TransportError> {
        self.api
            .create_issue(team_key, title, project_id)
            .await
            .map_err(|e| {
                TransportError::new(
                    ErrorCode::IssueCreateFailed,
                    format!("creating '{title}' in {team_key}: {e}"),
                )
            })
    }
}

#[async_trait]
impl Transport for TrackerTransport {
    fn name(&self) -> &'static str {
        "linear"
    }

    async fn resolve_channel(
        &self,
        _target_peer: &str,
        context_tag: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<ChannelResolution, TransportError> {
        // Stage 1 — explicit reference, when the caller supplied one.
        if let Some(issue_ref) = channel_id {
            if is_issue_identifier(issue_ref) || is_issue_uuid(issue_ref) {
                return self.resolve_explicit(issue_ref).await;
            }
            return Err(TransportError::new(
                ErrorCode::IssueNotFound,
                format!("'{issue_ref}' is neither an issue identifier nor a UUID"),
            ));
        }

        // Stage 2 — project context.
        if let Some(tag) = context_tag
            && let Some(resolution) = self.resolve_project_context(tag).await?
        {
            return Ok(resolution);
        }

        // Stage 3 — agent-comms fallback.
        self.resolve_agent_comms().await
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<SendOutcome, TransportError> {
        let comment = self.api.create_comment(channel_id, text).await?;
        self.track_issue(channel_id);
        debug!(issue = channel_id, comment = %comment.id, "posted root comment");
        Ok(SendOutcome {
            transport_message_id: comment.id,
            // The issue plays the role of the thread anchor.
            thread_ref: channel_id.to_string(),
        })
    }

    async fn send_reply(
        &self,
        thread_ref: &str,
        text: &str,
    ) -> Result<ReplyOutcome, TransportError> {
        let comment = self.api.create_comment(thread_ref, text).await?;
        self.track_issue(thread_ref);
        Ok(ReplyOutcome {
            transport_message_id: comment.id,
        })
    }

    async fn watch(&self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError> {
        let api = self.api.clone();
        let watched = self.watched_issues.clone();

        // Pull-based: poll the comment streams of every issue this transport
        // has touched and surface unseen envelope-bearing comments.
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(WATCH_POLL_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let issues: Vec<String> =
                    watched.lock().expect("watch set lock poisoned").keys().cloned().collect();
                for issue_id in issues {
                    let comments = match api.list_comments(&issue_id).await {
                        Ok(comments) => comments,
                        Err(e) => {
                            debug!(issue = %issue_id, error = %e, "watch poll failed");
                            continue;
                        }
                    };
                    let seen = {
                        let mut map = watched.lock().expect("watch set lock poisoned");
                        let entry = map.entry(issue_id.clone()).or_insert(0);
                        let seen = *entry;
                        *entry = comments.len();
                        seen
                    };
                    for comment in comments.into_iter().skip(seen) {
                        if !comment.body.lines().any(|l| l.starts_with("hq-msg:")) {
                            continue;
                        }
                        let item = Inbound {
                            text: comment.body,
                            thread_ref: issue_id.clone(),
                            channel_id: issue_id.clone(),
                        };
                        if inbound.send(item).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let mut task = self.watch_task.lock().expect("watch task lock poisoned");
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
        Ok(())
    }

    async fn unwatch(&self) {
        let handle = self.watch_task.lock().expect("watch task lock poisoned").take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn fetch_replies(&self, thread_ref: &str) -> Result<Vec<String>, TransportError> {
        Ok(self
            .api
            .list_comments(thread_ref)
            .await?
            .into_iter()
            .map(|c| c.body)
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hiamp_config::TeamConfig;
    use crate::mock::InMemoryTrackerApi;
    use std::collections::BTreeMap;

    fn tracker_config(agent_comms: Option<&str>) -> TrackerTransportConfig {
        let mut mappings = BTreeMap::new();
        mappings.insert("hq-cloud".to_string(), "proj-cloud".to_string());
        TrackerTransportConfig {
            api_key: "lin_test".into(),
            default_team: "ENG".into(),
            teams: vec![TeamConfig {
                key: "ENG".into(),
                agent_comms_issue_id: agent_comms.map(str::to_string),
                project_mappings: mappings,
            }],
        }
    }

    fn transport(api: Arc<InMemoryTrackerApi>) -> TrackerTransport {
        TrackerTransport::new(api, tracker_config(None))
    }

    #[tokio::test]
    async fn explicit_identifier_resolves_to_the_issue_uuid() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        let issue = api.seed_issue("ENG", "ENG-42", "Rollout plan");
        let t = transport(api);
        let r = t.resolve_channel("alex", None, Some("ENG-42")).await.unwrap();
        assert_eq!(r.channel_id, issue.id);
        assert_eq!(r.strategy, "explicit");
        assert_eq!(r.channel_name.as_deref(), Some("ENG-42"));
    }

    #[tokio::test]
    async fn explicit_uuid_resolves_directly() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        let issue = api.seed_issue("ENG", "ENG-7", "Pinned");
        let t = transport(api);
        let r = t.resolve_channel("alex", None, Some(&issue.id)).await.unwrap();
        assert_eq!(r.channel_id, issue.id);
    }

    #[tokio::test]
    async fn explicit_miss_is_issue_not_found() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        let t = transport(api);
        let err = t.resolve_channel("alex", None, Some("ENG-999")).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::IssueNotFound);
        let garbled = t.resolve_channel("alex", None, Some("lowercase-42x")).await.unwrap_err();
        assert_eq!(garbled.code, ErrorCode::IssueNotFound);
    }

    #[tokio::test]
    async fn project_context_creates_the_issue_on_miss_then_caches() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        let t = transport(api.clone());

        let first = t.resolve_channel("alex", Some("hq-cloud"), None).await.unwrap();
        assert_eq!(first.strategy, "project-context");
        assert_eq!(first.channel_name.as_deref(), Some("[HIAMP] hq-cloud"));
        assert!(api.has_issue_titled("[HIAMP] hq-cloud"));
        let calls_after_create = api.call_count();

        // Second resolve hits the context cache and reuses the issue.
        let second = t.resolve_channel("alex", Some("hq-cloud"), None).await.unwrap();
        assert_eq!(second.channel_id, first.channel_id);
        assert_eq!(api.call_count(), calls_after_create);
    }

    #[tokio::test]
    async fn project_context_reuses_an_existing_issue() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        let existing = api.seed_issue("ENG", "ENG-10", "[HIAMP] hq-cloud");
        let t = transport(api.clone());
        let r = t.resolve_channel("alex", Some("hq-cloud"), None).await.unwrap();
        assert_eq!(r.channel_id, existing.id);
        assert!(!api.has_other_issue_titled("[HIAMP] hq-cloud", &existing.id));
    }

    #[tokio::test]
    async fn unmapped_context_falls_through_to_agent_comms() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        let t = transport(api.clone());
        let r = t.resolve_channel("alex", Some("not-mapped"), None).await.unwrap();
        assert_eq!(r.strategy, "agent-comms");
        assert!(api.has_issue_titled(AGENT_COMMS_TITLE));
    }

    #[tokio::test]
    async fn pinned_agent_comms_issue_is_used_without_api_calls() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        let t = TrackerTransport::new(api.clone(), tracker_config(Some("pinned-issue-id")));
        let r = t.resolve_channel("alex", None, None).await.unwrap();
        assert_eq!(r.channel_id, "pinned-issue-id");
        assert_eq!(r.strategy, "agent-comms");
        assert_eq!(api.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_default_team_is_reported() {
        let api = Arc::new(InMemoryTrackerApi::new(&["OPS"])); // no ENG upstream
        let t = transport(api);
        let err = t.resolve_channel("alex", None, None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UnknownTeam);
    }

    #[tokio::test]
    async fn failed_lazy_creation_maps_to_issue_create_failed() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        api.fail_calls_matching("create_issue", 500);
        let t = transport(api);
        let err = t.resolve_channel("alex", Some("hq-cloud"), None).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::IssueCreateFailed);
    }

    #[tokio::test]
    async fn send_uses_the_issue_as_thread_anchor() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        let issue = api.seed_issue("ENG", "ENG-1", "comms");
        let t = transport(api.clone());

        let sent = t.send(&issue.id, "hq-msg:v1 | root").await.unwrap();
        assert_eq!(sent.thread_ref, issue.id);
        t.send_reply(&sent.thread_ref, "hq-msg:v1 | reply").await.unwrap();

        let texts = t.fetch_replies(&issue.id).await.unwrap();
        assert_eq!(texts, vec!["hq-msg:v1 | root", "hq-msg:v1 | reply"]);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_polls_new_comments_only() {
        let api = Arc::new(InMemoryTrackerApi::new(&["ENG"]));
        let issue = api.seed_issue("ENG", "ENG-1", "comms");
        let t = transport(api.clone());

        // The send makes the issue watched and its comment already "seen"
        // only after the first poll; pre-existing comments surface once.
        t.send(&issue.id, "not an envelope").await.unwrap();
        let (tx, mut rx) = mpsc::channel(8);
        t.watch(tx).await.unwrap();

        api.add_comment(&issue.id, "hq-msg:v1 | id:msg-00000001 | from:a1/w | to:b2/w | intent:inform");
        tokio::time::sleep(WATCH_POLL_INTERVAL * 2).await;

        let got = rx.recv().await.unwrap();
        assert!(got.text.starts_with("hq-msg:v1"));
        assert_eq!(got.thread_ref, issue.id);
        t.unwatch().await;
    }
}
