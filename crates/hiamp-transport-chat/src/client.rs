// SPDX-License-Identifier: MIT OR Apache-2.0
//! Thin HTTP binding of [`ChatApi`] against a Slack-style Web API.
//!
//! Covers exactly the endpoints the transport consumes: channel
//! list/create/open, message post, thread replies, and the socket-mode event
//! connection. HTTP statuses map to the transport error taxonomy; the
//! service's `ok: false` envelope maps to `API_ERROR` (or `RATE_LIMITED` for
//! its `ratelimited` error string).

use crate::api::{ChatApi, ChatChannel, ChatEvent, ChatMessageRef};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use hiamp_error::ErrorCode;
use hiamp_transport::TransportError;
use serde::Deserialize;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Production Web API root.
pub const DEFAULT_BASE_URL: &str = "https://slack.com/api";

/// HTTP client for the chat workspace API.
pub struct SlackApiClient {
    http: reqwest::Client,
    base_url: String,
    bot_token: String,
    app_token: Option<String>,
    socket_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    channel: Option<serde_json::Value>,
    #[serde(default)]
    channels: Option<Vec<ChannelRow>>,
    #[serde(default)]
    messages: Option<Vec<MessageRow>>,
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelRow {
    id: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    ts: String,
    #[serde(default)]
    text: String,
}

impl SlackApiClient {
    /// Client against the production API root.
    #[must_use]
    pub fn new(bot_token: impl Into<String>, app_token: Option<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, bot_token, app_token)
    }

    /// Client against an explicit API root (tests point this at a local
    /// mock server).
    #[must_use]
    pub fn with_base_url(
        base_url: impl Into<String>,
        bot_token: impl Into<String>,
        app_token: Option<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            bot_token: bot_token.into(),
            app_token,
            socket_task: Mutex::new(None),
        }
    }

    async fn call(
        &self,
        method: &str,
        token: &str,
        body: Option<serde_json::Value>,
        query: &[(&str, &str)],
    ) -> Result<ApiEnvelope, TransportError> {
        let url = format!("{}/{method}", self.base_url);
        let mut request = match &body {
            Some(json) => self.http.post(&url).json(json),
            None => self.http.get(&url).query(query),
        };
        request = request.bearer_auth(token);

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::network(format!("{method}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::from_status(
                status.as_u16(),
                format!("{method} returned HTTP {status}"),
            ));
        }

        let envelope: ApiEnvelope = response
            .json()
            .await
            .map_err(|e| TransportError::new(ErrorCode::ApiError, format!("{method}: {e}")))?;
        if !envelope.ok {
            let detail = envelope.error.unwrap_or_else(|| "unknown error".into());
            let code = if detail == "ratelimited" {
                ErrorCode::RateLimited
            } else {
                ErrorCode::ApiError
            };
            return Err(TransportError::new(code, format!("{method}: {detail}")));
        }
        Ok(envelope)
    }

    fn channel_from_value(value: Option<serde_json::Value>) -> Result<ChatChannel, TransportError> {
        let value = value
            .ok_or_else(|| TransportError::new(ErrorCode::ApiError, "response without channel"))?;
        let id = value["id"]
            .as_str()
            .ok_or_else(|| TransportError::new(ErrorCode::ApiError, "channel without id"))?
            .to_string();
        let name = value["name"].as_str().unwrap_or_default().to_string();
        Ok(ChatChannel { id, name })
    }
}

#[async_trait]
impl ChatApi for SlackApiClient {
    async fn lookup_channel(&self, name: &str) -> Result<Option<ChatChannel>, TransportError> {
        let envelope = self
            .call(
                "conversations.list",
                &self.bot_token,
                None,
                &[("limit", "1000"), ("types", "public_channel,private_channel")],
            )
            .await?;
        Ok(envelope
            .channels
            .unwrap_or_default()
            .into_iter()
            .find(|c| c.name == name)
            .map(|c| ChatChannel { id: c.id, name: c.name }))
    }

    async fn create_channel(&self, name: &str) -> Result<ChatChannel, TransportError> {
        let envelope = self
            .call(
                "conversations.create",
                &self.bot_token,
                Some(serde_json::json!({ "name": name })),
                &[],
            )
            .await?;
        Self::channel_from_value(envelope.channel)
    }

    async fn open_dm(&self, user_id: &str) -> Result<ChatChannel, TransportError> {
        let envelope = self
            .call(
                "conversations.open",
                &self.bot_token,
                Some(serde_json::json!({ "users": user_id })),
                &[],
            )
            .await?;
        Self::channel_from_value(envelope.channel)
    }

    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
    ) -> Result<ChatMessageRef, TransportError> {
        let envelope = self
            .call(
                "chat.postMessage",
                &self.bot_token,
                Some(serde_json::json!({ "channel": channel_id, "text": text })),
                &[],
            )
            .await?;
        Ok(ChatMessageRef {
            channel: channel_id.to_string(),
            ts: envelope
                .ts
                .ok_or_else(|| TransportError::new(ErrorCode::ApiError, "post without ts"))?,
        })
    }

    async fn post_reply(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<ChatMessageRef, TransportError> {
        let envelope = self
            .call(
                "chat.postMessage",
                &self.bot_token,
                Some(serde_json::json!({
                    "channel": channel_id,
                    "text": text,
                    "thread_ts": thread_ts,
                })),
                &[],
            )
            .await?;
        Ok(ChatMessageRef {
            channel: channel_id.to_string(),
            ts: envelope
                .ts
                .ok_or_else(|| TransportError::new(ErrorCode::ApiError, "post without ts"))?,
        })
    }

    async fn fetch_thread(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<String>, TransportError> {
        let envelope = self
            .call(
                "conversations.replies",
                &self.bot_token,
                None,
                &[("channel", channel_id), ("ts", thread_ts)],
            )
            .await?;
        Ok(envelope
            .messages
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.ts != thread_ts) // root excluded
            .map(|m| m.text)
            .collect())
    }

    async fn connect_events(&self, tx: mpsc::Sender<ChatEvent>) -> Result<(), TransportError> {
        let app_token = self.app_token.clone().ok_or_else(|| {
            TransportError::new(
                ErrorCode::TransportError,
                "watching requires an app-token in the chat config",
            )
        })?;
        let envelope = self
            .call("apps.connections.open", &app_token, Some(serde_json::json!({})), &[])
            .await?;
        let ws_url = envelope
            .url
            .ok_or_else(|| TransportError::new(ErrorCode::ApiError, "no socket url granted"))?;

        let (stream, _) = connect_async(&ws_url)
            .await
            .map_err(|e| TransportError::network(format!("socket connect: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let handle = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text.to_string(),
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let value: serde_json::Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(error = %e, "unparseable socket frame");
                        continue;
                    }
                };

                // Every events envelope must be acked promptly or the
                // service redelivers.
                if let Some(envelope_id) = value["envelope_id"].as_str() {
                    let ack = serde_json::json!({ "envelope_id": envelope_id }).to_string();
                    if sink.send(Message::Text(ack.into())).await.is_err() {
                        break;
                    }
                }

                match value["type"].as_str() {
                    Some("events_api") => {}
                    Some("disconnect") => break,
                    _ => continue,
                }
                let event = &value["payload"]["event"];
                if event["type"].as_str() != Some("message")
                    || event["subtype"].as_str().is_some()
                {
                    continue;
                }
                let (Some(channel), Some(ts), Some(body)) = (
                    event["channel"].as_str(),
                    event["ts"].as_str(),
                    event["text"].as_str(),
                ) else {
                    continue;
                };
                debug!(channel, ts, "inbound chat message");
                let item = ChatEvent {
                    channel: channel.to_string(),
                    ts: ts.to_string(),
                    thread_ts: event["thread_ts"].as_str().map(str::to_string),
                    text: body.to_string(),
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        let mut task = self.socket_task.lock().expect("socket task lock poisoned");
        if let Some(old) = task.replace(handle) {
            old.abort();
        }
        Ok(())
    }

    async fn disconnect_events(&self) {
        let handle = self.socket_task.lock().expect("socket task lock poisoned").take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client(server: &MockServer) -> SlackApiClient {
        SlackApiClient::with_base_url(server.uri(), "xoxb-test", None)
    }

    #[tokio::test]
    async fn post_message_returns_the_granted_ts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_partial_json(serde_json::json!({ "channel": "C1", "text": "hello" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true, "ts": "1700000000.000100", "channel": "C1"
            })))
            .mount(&server)
            .await;

        let posted = client(&server).await.post_message("C1", "hello").await.unwrap();
        assert_eq!(posted.ts, "1700000000.000100");
        assert_eq!(posted.channel, "C1");
    }

    #[tokio::test]
    async fn reply_carries_the_thread_ts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_partial_json(serde_json::json!({ "thread_ts": "1700.1" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true, "ts": "1700.2"
            })))
            .mount(&server)
            .await;

        let posted = client(&server)
            .await
            .post_reply("C1", "1700.1", "reply")
            .await
            .unwrap();
        assert_eq!(posted.ts, "1700.2");
    }

    #[tokio::test]
    async fn http_statuses_map_to_the_taxonomy() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = client(&server).await.post_message("C1", "x").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::RateLimited);
    }

    #[tokio::test]
    async fn ok_false_maps_to_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": false, "error": "channel_not_found"
            })))
            .mount(&server)
            .await;

        let err = client(&server).await.post_message("C1", "x").await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ApiError);
        assert!(err.message.contains("channel_not_found"));
    }

    #[tokio::test]
    async fn lookup_matches_exact_channel_name() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "channels": [
                    { "id": "C1", "name": "general" },
                    { "id": "C2", "name": "hq-alex--stefan" },
                ]
            })))
            .mount(&server)
            .await;

        let api = client(&server).await;
        let hit = api.lookup_channel("hq-alex--stefan").await.unwrap().unwrap();
        assert_eq!(hit.id, "C2");
        assert!(api.lookup_channel("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_thread_excludes_the_root_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("ts", "1700.1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ok": true,
                "messages": [
                    { "ts": "1700.1", "text": "root" },
                    { "ts": "1700.2", "text": "first reply" },
                ]
            })))
            .mount(&server)
            .await;

        let replies = client(&server).await.fetch_thread("C1", "1700.1").await.unwrap();
        assert_eq!(replies, vec!["first reply"]);
    }

    #[tokio::test]
    async fn watching_without_app_token_fails_cleanly() {
        let server = MockServer::start().await;
        let api = client(&server).await;
        let (tx, _rx) = mpsc::channel(1);
        let err = api.connect_events(tx).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::TransportError);
        assert!(err.message.contains("app-token"));
    }
}
