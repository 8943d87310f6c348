// SPDX-License-Identifier: MIT OR Apache-2.0
//! In-memory [`ChatApi`] double for transport and sender tests.
//!
//! Holds channels, posted messages, and threads in a mutex-guarded state,
//! counts API calls, and supports scripting the next failure status.

use crate::api::{ChatApi, ChatChannel, ChatEvent, ChatMessageRef};
use async_trait::async_trait;
use hiamp_transport::TransportError;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
struct StoredMessage {
    channel: String,
    ts: String,
    thread_ts: Option<String>,
    text: String,
}

#[derive(Default)]
struct State {
    /// name → channel
    channels: BTreeMap<String, ChatChannel>,
    messages: Vec<StoredMessage>,
    next_ts: u64,
    next_channel: u64,
    calls: u64,
    fail_next: Option<u16>,
    events_tx: Option<mpsc::Sender<ChatEvent>>,
}

/// In-memory chat workspace.
#[derive(Default)]
pub struct InMemoryChatApi {
    state: Mutex<State>,
}

impl InMemoryChatApi {
    /// Fresh empty workspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a channel with a fixed id.
    pub fn seed_channel(&self, id: &str, name: &str) {
        let mut s = self.state.lock().unwrap();
        s.channels.insert(
            name.to_string(),
            ChatChannel {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
    }

    /// Script the next API call to fail with the given HTTP status.
    pub fn fail_next_with(&self, status: u16) {
        self.state.lock().unwrap().fail_next = Some(status);
    }

    /// Number of API calls made so far (event pushes excluded).
    pub fn call_count(&self) -> u64 {
        self.state.lock().unwrap().calls
    }

    /// Whether a channel with this name exists.
    pub fn has_channel(&self, name: &str) -> bool {
        self.state.lock().unwrap().channels.contains_key(name)
    }

    /// All texts posted to a channel, in post order.
    pub fn channel_texts(&self, channel_id: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.channel == channel_id)
            .map(|m| m.text.clone())
            .collect()
    }

    /// Deliver an event to the connected watcher, if any.
    pub async fn push_event(&self, event: ChatEvent) {
        let tx = self.state.lock().unwrap().events_tx.clone();
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    fn begin_call(&self) -> Result<(), TransportError> {
        let mut s = self.state.lock().unwrap();
        s.calls += 1;
        if let Some(status) = s.fail_next.take() {
            return Err(TransportError::from_status(status, "scripted failure"));
        }
        Ok(())
    }

    fn alloc_ts(s: &mut State) -> String {
        s.next_ts += 1;
        format!("1700000000.{:06}", s.next_ts)
    }
}

#[async_trait]
impl ChatApi for InMemoryChatApi {
    async fn lookup_channel(&self, name: &str) -> Result<Option<ChatChannel>, TransportError> {
        self.begin_call()?;
        Ok(self.state.lock().unwrap().channels.get(name).cloned())
    }

    async fn create_channel(&self, name: &str) -> Result<ChatChannel, TransportError> {
        self.begin_call()?;
        let mut s = self.state.lock().unwrap();
        s.next_channel += 1;
        let channel = ChatChannel {
            id: format!("C-{:04}", s.next_channel),
            name: name.to_string(),
        };
        s.channels.insert(name.to_string(), channel.clone());
        Ok(channel)
    }

    async fn open_dm(&self, user_id: &str) -> Result<ChatChannel, TransportError> {
        self.begin_call()?;
        let name = format!("dm-{user_id}");
        let mut s = self.state.lock().unwrap();
        if let Some(existing) = s.channels.get(&name) {
            return Ok(existing.clone());
        }
        let channel = ChatChannel {
            id: format!("D-{user_id}"),
            name: name.clone(),
        };
        s.channels.insert(name, channel.clone());
        Ok(channel)
    }

    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
    ) -> Result<ChatMessageRef, TransportError> {
        self.begin_call()?;
        let mut s = self.state.lock().unwrap();
        let ts = Self::alloc_ts(&mut s);
        s.messages.push(StoredMessage {
            channel: channel_id.to_string(),
            ts: ts.clone(),
            thread_ts: None,
            text: text.to_string(),
        });
        Ok(ChatMessageRef {
            channel: channel_id.to_string(),
            ts,
        })
    }

    async fn post_reply(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<ChatMessageRef, TransportError> {
        self.begin_call()?;
        let mut s = self.state.lock().unwrap();
        let ts = Self::alloc_ts(&mut s);
        s.messages.push(StoredMessage {
            channel: channel_id.to_string(),
            ts: ts.clone(),
            thread_ts: Some(thread_ts.to_string()),
            text: text.to_string(),
        });
        Ok(ChatMessageRef {
            channel: channel_id.to_string(),
            ts,
        })
    }

    async fn fetch_thread(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<String>, TransportError> {
        self.begin_call()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.channel == channel_id && m.thread_ts.as_deref() == Some(thread_ts))
            .map(|m| m.text.clone())
            .collect())
    }

    async fn connect_events(&self, tx: mpsc::Sender<ChatEvent>) -> Result<(), TransportError> {
        self.state.lock().unwrap().events_tx = Some(tx);
        Ok(())
    }

    async fn disconnect_events(&self) {
        self.state.lock().unwrap().events_tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_failure_fires_once() {
        let api = InMemoryChatApi::new();
        api.fail_next_with(429);
        let err = api.post_message("C1", "x").await.unwrap_err();
        assert!(err.is_retryable());
        api.post_message("C1", "x").await.unwrap();
        assert_eq!(api.call_count(), 2);
    }

    #[tokio::test]
    async fn dm_channels_are_reused() {
        let api = InMemoryChatApi::new();
        let first = api.open_dm("U1").await.unwrap();
        let second = api.open_dm("U1").await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn threads_collect_only_their_replies() {
        let api = InMemoryChatApi::new();
        let root = api.post_message("C1", "root").await.unwrap();
        api.post_reply("C1", &root.ts, "r1").await.unwrap();
        api.post_message("C1", "unrelated").await.unwrap();
        api.post_reply("C1", &root.ts, "r2").await.unwrap();
        let replies = api.fetch_thread("C1", &root.ts).await.unwrap();
        assert_eq!(replies, vec!["r1", "r2"]);
    }
}
