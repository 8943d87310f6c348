// SPDX-License-Identifier: MIT OR Apache-2.0
//! Thin GraphQL binding of [`TrackerApi`] against a Linear-style API.
//!
//! One POST endpoint, `query`/`variables` body, `Authorization: <api-key>`.
//! HTTP statuses map to the transport taxonomy; GraphQL-level `errors` map
//! to `API_ERROR` except for entity-not-found lookups, which surface as
//! `Ok(None)` so the resolver cascade can decide.

use crate::api::{TrackerApi, TrackerComment, TrackerIssue};
use async_trait::async_trait;
use hiamp_error::ErrorCode;
use hiamp_transport::TransportError;
use serde_json::{Value, json};

/// Production GraphQL endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.linear.app/graphql";

/// GraphQL client for the tracker API.
pub struct LinearApiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl LinearApiClient {
    /// Client against the production endpoint.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_endpoint(DEFAULT_ENDPOINT, api_key)
    }

    /// Client against an explicit endpoint (tests point this at a local
    /// mock server).
    #[must_use]
    pub fn with_endpoint(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
        }
    }

    async fn execute(&self, query: &str, variables: Value) -> Result<Value, TransportError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header("Authorization", &self.api_key)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| TransportError::network(format!("graphql: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::from_status(
                status.as_u16(),
                format!("graphql returned HTTP {status}"),
            ));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TransportError::new(ErrorCode::ApiError, format!("graphql: {e}")))?;

        if let Some(errors) = body["errors"].as_array()
            && !errors.is_empty()
        {
            let message = errors[0]["message"].as_str().unwrap_or("unknown error");
            if message.contains("not found") || message.contains("Entity not found") {
                // Lookup misses are data, not failures.
                return Ok(json!({ "data": Value::Null }));
            }
            return Err(TransportError::new(ErrorCode::ApiError, format!("graphql: {message}")));
        }
        Ok(body)
    }

    fn issue_from_node(node: &Value) -> Option<TrackerIssue> {
        Some(TrackerIssue {
            id: node["id"].as_str()?.to_string(),
            identifier: node["identifier"].as_str()?.to_string(),
            title: node["title"].as_str().unwrap_or_default().to_string(),
            team_key: node["team"]["key"].as_str().unwrap_or_default().to_string(),
        })
    }
}

#[async_trait]
impl TrackerApi for LinearApiClient {
    async fn issue_by_ref(
        &self,
        issue_ref: &str,
    ) -> Result<Option<TrackerIssue>, TransportError> {
        let body = self
            .execute(
                "query($ref: String!) { issue(id: $ref) { id identifier title team { key } } }",
                json!({ "ref": issue_ref }),
            )
            .await?;
        Ok(Self::issue_from_node(&body["data"]["issue"]))
    }

    async fn team_id(&self, team_key: &str) -> Result<Option<String>, TransportError> {
        let body = self
            .execute(
                "query($key: String!) { teams(filter: { key: { eq: $key } }) { nodes { id key } } }",
                json!({ "key": team_key }),
            )
            .await?;
        Ok(body["data"]["teams"]["nodes"]
            .as_array()
            .and_then(|nodes| nodes.first())
            .and_then(|n| n["id"].as_str())
            .map(str::to_string))
    }

    async fn search_issues(
        &self,
        team_key: &str,
        title: &str,
    ) -> Result<Vec<TrackerIssue>, TransportError> {
        let body = self
            .execute(
                "query($team: String!, $title: String!) { \
                 issues(filter: { team: { key: { eq: $team } }, title: { contains: $title } }) \
                 { nodes { id identifier title team { key } } } }",
                json!({ "team": team_key, "title": title }),
            )
            .await?;
        Ok(body["data"]["issues"]["nodes"]
            .as_array()
            .map(|nodes| nodes.iter().filter_map(Self::issue_from_node).collect())
            .unwrap_or_default())
    }

    async fn create_issue(
        &self,
        team_key: &str,
        title: &str,
        project_id: Option<&str>,
    ) -> Result<TrackerIssue, TransportError> {
        let team_id = self.team_id(team_key).await?.ok_or_else(|| {
            TransportError::new(ErrorCode::UnknownTeam, format!("team '{team_key}' not found"))
        })?;
        let mut input = json!({ "teamId": team_id, "title": title });
        if let Some(project) = project_id {
            input["projectId"] = json!(project);
        }
        let body = self
            .execute(
                "mutation($input: IssueCreateInput!) { issueCreate(input: $input) \
                 { success issue { id identifier title team { key } } } }",
                json!({ "input": input }),
            )
            .await?;
        let payload = &body["data"]["issueCreate"];
        if payload["success"].as_bool() != Some(true) {
            return Err(TransportError::new(ErrorCode::ApiError, "issueCreate was not successful"));
        }
        Self::issue_from_node(&payload["issue"])
            .ok_or_else(|| TransportError::new(ErrorCode::ApiError, "issueCreate without issue"))
    }

    async fn create_comment(
        &self,
        issue_id: &str,
        body_text: &str,
    ) -> Result<TrackerComment, TransportError> {
        let body = self
            .execute(
                "mutation($input: CommentCreateInput!) { commentCreate(input: $input) \
                 { success comment { id body } } }",
                json!({ "input": { "issueId": issue_id, "body": body_text } }),
            )
            .await?;
        let payload = &body["data"]["commentCreate"];
        if payload["success"].as_bool() != Some(true) {
            return Err(TransportError::new(ErrorCode::ApiError, "commentCreate was not successful"));
        }
        Ok(TrackerComment {
            id: payload["comment"]["id"].as_str().unwrap_or_default().to_string(),
            body: payload["comment"]["body"].as_str().unwrap_or_default().to_string(),
        })
    }

    async fn list_comments(
        &self,
        issue_id: &str,
    ) -> Result<Vec<TrackerComment>, TransportError> {
        let body = self
            .execute(
                "query($id: String!) { issue(id: $id) { comments { nodes { id body } } } }",
                json!({ "id": issue_id }),
            )
            .await?;
        Ok(body["data"]["issue"]["comments"]["nodes"]
            .as_array()
            .map(|nodes| {
                nodes
                    .iter()
                    .map(|n| TrackerComment {
                        id: n["id"].as_str().unwrap_or_default().to_string(),
                        body: n["body"].as_str().unwrap_or_default().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> LinearApiClient {
        LinearApiClient::with_endpoint(format!("{}/graphql", server.uri()), "lin_test")
    }

    #[tokio::test]
    async fn issue_lookup_parses_the_node() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("issue(id: $ref)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "issue": {
                    "id": "0184e9b2-7c4d-4a89-9f2b-1a2b3c4d5e6f",
                    "identifier": "ENG-42",
                    "title": "Rollout",
                    "team": { "key": "ENG" }
                } }
            })))
            .mount(&server)
            .await;

        let issue = client(&server).issue_by_ref("ENG-42").await.unwrap().unwrap();
        assert_eq!(issue.id, "0184e9b2-7c4d-4a89-9f2b-1a2b3c4d5e6f");
        assert_eq!(issue.team_key, "ENG");
    }

    #[tokio::test]
    async fn entity_not_found_is_a_miss_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errors": [ { "message": "Entity not found: Issue" } ]
            })))
            .mount(&server)
            .await;

        assert!(client(&server).issue_by_ref("ENG-999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn http_401_maps_to_permission_denied() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).team_id("ENG").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn graphql_errors_map_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "errors": [ { "message": "rate limit exceeded" } ]
            })))
            .mount(&server)
            .await;

        let err = client(&server).team_id("ENG").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ApiError);
        assert!(err.message.contains("rate limit"));
    }

    #[tokio::test]
    async fn create_comment_round_trips() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_string_contains("commentCreate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "commentCreate": {
                    "success": true,
                    "comment": { "id": "comment-1", "body": "hello" }
                } }
            })))
            .mount(&server)
            .await;

        let comment = client(&server).create_comment("issue-1", "hello").await.unwrap();
        assert_eq!(comment.id, "comment-1");
    }
}
