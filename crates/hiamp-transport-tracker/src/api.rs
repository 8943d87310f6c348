// SPDX-License-Identifier: MIT OR Apache-2.0
//! The backing-API seam for the tracker transport.
//!
//! The remote tracker service is an external collaborator; this trait covers
//! exactly the calls the transport consumes. [`crate::client`] binds it over
//! GraphQL HTTP, [`crate::mock`] provides the in-memory test double.

use async_trait::async_trait;
use hiamp_transport::TransportError;

/// An issue as reported by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerIssue {
    /// Internal UUID.
    pub id: String,
    /// Human identifier (`<KEY>-<N>`).
    pub identifier: String,
    /// Issue title.
    pub title: String,
    /// Key of the owning team.
    pub team_key: String,
}

/// A comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerComment {
    /// Comment id.
    pub id: String,
    /// Comment body text.
    pub body: String,
}

/// Tracker operations the transport consumes.
#[async_trait]
pub trait TrackerApi: Send + Sync {
    /// Look up an issue by `<KEY>-<N>` identifier or internal UUID.
    async fn issue_by_ref(&self, issue_ref: &str)
    -> Result<Option<TrackerIssue>, TransportError>;

    /// Resolve a team key to its internal UUID.
    async fn team_id(&self, team_key: &str) -> Result<Option<String>, TransportError>;

    /// Search a team's issues whose title contains `title`.
    async fn search_issues(
        &self,
        team_key: &str,
        title: &str,
    ) -> Result<Vec<TrackerIssue>, TransportError>;

    /// Create an issue in a team, optionally attached to a project.
    async fn create_issue(
        &self,
        team_key: &str,
        title: &str,
        project_id: Option<&str>,
    ) -> Result<TrackerIssue, TransportError>;

    /// Add a comment to an issue.
    async fn create_comment(
        &self,
        issue_id: &str,
        body: &str,
    ) -> Result<TrackerComment, TransportError>;

    /// List all comments on an issue, oldest first.
    async fn list_comments(&self, issue_id: &str)
    -> Result<Vec<TrackerComment>, TransportError>;
}

/// Whether `s` has the `<KEY>-<N>` human identifier shape.
#[must_use]
pub fn is_issue_identifier(s: &str) -> bool {
    match s.rsplit_once('-') {
        Some((key, number)) => {
            !key.is_empty()
                && key.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
                && !number.is_empty()
                && number.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Whether `s` has the internal UUID shape.
#[must_use]
pub fn is_issue_uuid(s: &str) -> bool {
    if s.len() != 36 {
        return false;
    }
    s.char_indices().all(|(i, c)| match i {
        8 | 13 | 18 | 23 => c == '-',
        _ => c.is_ascii_hexdigit(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_shapes() {
        assert!(is_issue_identifier("ENG-42"));
        assert!(is_issue_identifier("OPS2-7"));
        assert!(!is_issue_identifier("eng-42"));
        assert!(!is_issue_identifier("ENG-"));
        assert!(!is_issue_identifier("-42"));
        assert!(!is_issue_identifier("ENG42"));
        assert!(!is_issue_identifier("ENG-4a"));
    }

    #[test]
    fn uuid_shapes() {
        assert!(is_issue_uuid("0184e9b2-7c4d-4a89-9f2b-1a2b3c4d5e6f"));
        assert!(!is_issue_uuid("0184e9b2-7c4d-4a89-9f2b"));
        assert!(!is_issue_uuid("not-a-uuid-but-36-characters-long!!!"));
    }
}
