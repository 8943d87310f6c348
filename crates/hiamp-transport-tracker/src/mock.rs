// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory [`TrackerApi`] double for transport and sender tests.

use crate::api::{TrackerApi, TrackerComment, TrackerIssue, is_issue_uuid};
use async_trait::async_trait;
use hiamp_transport::TransportError;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Default)]
struct State {
    /// team key → team UUID.
    teams: BTreeMap<String, String>,
    issues: Vec<TrackerIssue>,
    /// issue UUID → comments.
    comments: BTreeMap<String, Vec<TrackerComment>>,
    next_issue: u64,
    next_comment: u64,
    calls: u64,
    /// (method substring, status) — every matching call fails.
    fail_method: Option<(String, u16)>,
}

/// In-memory tracker service.
#[derive(Default)]
pub struct InMemoryTrackerApi {
    state: Mutex<State>,
}

impl InMemoryTrackerApi {
    /// Fresh tracker knowing the given team keys.
    #[must_use]
    pub fn new(team_keys: &[&str]) -> Self {
        let api = Self::default();
        {
            let mut s = api.state.lock().unwrap();
            for (i, key) in team_keys.iter().enumerate() {
                s.teams
                    .insert((*key).to_string(), format!("team-{:04}-0000-4000-8000-{:012}", i, i));
            }
        }
        api
    }

    /// Pre-create an issue and return it.
    pub fn seed_issue(&self, team_key: &str, identifier: &str, title: &str) -> TrackerIssue {
        let mut s = self.state.lock().unwrap();
        s.next_issue += 1;
        let issue = TrackerIssue {
            id: format!("{:08}-0000-4000-8000-000000000000", s.next_issue),
            identifier: identifier.to_string(),
            title: title.to_string(),
            team_key: team_key.to_string(),
        };
        s.issues.push(issue.clone());
        issue
    }

    /// Append a comment directly (as the remote peer would).
    pub fn add_comment(&self, issue_id: &str, body: &str) {
        let mut s = self.state.lock().unwrap();
        s.next_comment += 1;
        let comment = TrackerComment {
            id: format!("comment-{}", s.next_comment),
            body: body.to_string(),
        };
        s.comments.entry(issue_id.to_string()).or_default().push(comment);
    }

    /// Script every call whose method name contains `needle` to fail.
    pub fn fail_calls_matching(&self, needle: &str, status: u16) {
        self.state.lock().unwrap().fail_method = Some((needle.to_string(), status));
    }

    /// Number of API calls made so far.
    pub fn call_count(&self) -> u64 {
        self.state.lock().unwrap().calls
    }

    /// Whether any issue carries this exact title.
    pub fn has_issue_titled(&self, title: &str) -> bool {
        self.state.lock().unwrap().issues.iter().any(|i| i.title == title)
    }

    /// Whether an issue other than `except_id` carries this title.
    pub fn has_other_issue_titled(&self, title: &str, except_id: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .issues
            .iter()
            .any(|i| i.title == title && i.id != except_id)
    }

    fn begin_call(&self, method: &str) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        s.calls += 1;
        if let Some((needle, status)) = &s.fail_method
            && method.contains(needle.as_str())
        {
            let status = *status;
            return Err(TransportError::from_status(status, format!("scripted {method} failure")));
        }
        Ok(())
    }
}

#[async_trait]
impl TrackerApi for InMemoryTrackerApi {
    async fn issue_by_ref(
        &self,
        issue_ref: &str,
    ) -> Result<Option<TrackerIssue>, TransportError> {
        self.begin_call("issue_by_ref")?;
        let s = self.state.lock().unwrap();
        let found = if is_issue_uuid(issue_ref) {
            s.issues.iter().find(|i| i.id == issue_ref)
        } else {
            s.issues.iter().find(|i| i.identifier == issue_ref)
        };
        Ok(found.cloned())
    }

    async fn team_id(&self, team_key: &str) -> Result<Option<String>, TransportError> {
        self.begin_call("team_id")?;
        Ok(self.state.lock().unwrap().teams.get(team_key).cloned())
    }

    async fn search_issues(
        &self,
        team_key: &str,
        title: &str,
    ) -> Result<Vec<TrackerIssue>, TransportError> {
        self.begin_call("search_issues")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .issues
            .iter()
            .filter(|i| i.team_key == team_key && i.title.contains(title))
            .cloned()
            .collect())
    }

    async fn create_issue(
        &self,
        team_key: &str,
        title: &str,
        _project_id: Option<&str>,
    ) -> Result<TrackerIssue, TransportError> {
        self.begin_call("create_issue")?;
        let mut s = self.state.lock().unwrap();
        if !s.teams.contains_key(team_key) {
            return Err(TransportError::from_status(404, format!("no team '{team_key}'")));
        }
        s.next_issue += 1;
        let issue = TrackerIssue {
            id: format!("{:08}-0000-4000-8000-000000000000", s.next_issue),
            identifier: format!("{team_key}-{}", 100 + s.next_issue),
            title: title.to_string(),
            team_key: team_key.to_string(),
        };
        s.issues.push(issue.clone());
        Ok(issue)
    }

    async fn create_comment(
        &self,
        issue_id: &str,
        body: &str,
    ) -> Result<TrackerComment, TransportError> {
        self.begin_call("create_comment")?;
        let mut s = self.state.lock().unwrap();
        s.next_comment += 1;
        let comment = TrackerComment {
            id: format!("comment-{}", s.next_comment),
            body: body.to_string(),
        };
        s.comments.entry(issue_id.to_string()).or_default().push(comment.clone());
        Ok(comment)
    }

    async fn list_comments(
        &self,
        issue_id: &str,
    ) -> Result<Vec<TrackerComment>, TransportError> {
        self.begin_call("list_comments")?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .comments
            .get(issue_id)
            .cloned()
            .unwrap_or_default())
    }
}
