// SPDX-License-Identifier: MIT OR Apache-2.0
//! The backing-API seam for the chat transport.
//!
//! The remote workspace service is an external collaborator; this trait
//! covers exactly the calls the transport consumes. [`crate::client`] binds
//! it over HTTP, [`crate::mock`] provides the in-memory test double.

use async_trait::async_trait;
use hiamp_transport::TransportError;
use tokio::sync::mpsc;

/// A channel as reported by the chat workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatChannel {
    /// Workspace-native channel id.
    pub id: String,
    /// Channel name (without the leading `#`).
    pub name: String,
}

/// Reference to a posted message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessageRef {
    /// Channel the message landed in.
    pub channel: String,
    /// Workspace-native message timestamp id.
    pub ts: String,
}

/// An inbound message event from the long-lived connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    /// Channel the message arrived on.
    pub channel: String,
    /// Message ts.
    pub ts: String,
    /// Parent ts when the message is a threaded reply.
    pub thread_ts: Option<String>,
    /// Message text.
    pub text: String,
}

/// Chat workspace operations the transport consumes.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Find a channel by exact name.
    async fn lookup_channel(&self, name: &str) -> Result<Option<ChatChannel>, TransportError>;

    /// Create a channel with the given name.
    async fn create_channel(&self, name: &str) -> Result<ChatChannel, TransportError>;

    /// Open (or reuse) a direct channel with a user.
    async fn open_dm(&self, user_id: &str) -> Result<ChatChannel, TransportError>;

    /// Post a top-level message.
    async fn post_message(
        &self,
        channel_id: &str,
        text: &str,
    ) -> Result<ChatMessageRef, TransportError>;

    /// Post a reply inside an existing thread.
    async fn post_reply(
        &self,
        channel_id: &str,
        thread_ts: &str,
        text: &str,
    ) -> Result<ChatMessageRef, TransportError>;

    /// Fetch the reply texts under a thread root (root excluded).
    async fn fetch_thread(
        &self,
        channel_id: &str,
        thread_ts: &str,
    ) -> Result<Vec<String>, TransportError>;

    /// Open the long-lived event connection, pushing message events at `tx`
    /// until [`ChatApi::disconnect_events`] is called.
    async fn connect_events(&self, tx: mpsc::Sender<ChatEvent>) -> Result<(), TransportError>;

    /// Close the event connection. Idempotent.
    async fn disconnect_events(&self);
}
