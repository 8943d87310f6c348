// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-transport-chat
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod client;
pub mod mock;

use api::{ChatApi, ChatEvent};
use async_trait::async_trait;
use hiamp_config::{ChannelStrategy, ChatTransportConfig};
use hiamp_error::ErrorCode;
use hiamp_transport::cache::TtlCache;
use hiamp_transport::{
    ChannelResolution, Inbound, ReplyOutcome, SendOutcome, Transport, TransportError,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Separator between channel id and message ts inside a thread ref.
const THREAD_REF_SEP: char = ':';

fn split_thread_ref(thread_ref: &str) -> Result<(&str, &str), TransportError> {
    thread_ref.split_once(THREAD_REF_SEP).ok_or_else(|| {
        TransportError::new(
            ErrorCode::TransportError,
            format!("'{thread_ref}' is not a chat thread ref (want channel:ts)"),
        )
    })
}

fn looks_like_envelope(text: &str) -> bool {
    text.lines().any(|l| l.starts_with("hq-msg:"))
}

/// Chat-room transport over any [`ChatApi`].
pub struct ChatTransport {
    api: Arc<dyn ChatApi>,
    config: ChatTransportConfig,
    self_owner: String,
    /// Peer owner → transport-native bot/user id, for the `dm` strategy.
    peer_bots: BTreeMap<String, String>,
    resolutions: TtlCache<ChannelResolution>,
    watching: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ChatTransport {
    /// Build a transport from the chat config block.
    ///
    /// `peer_bots` maps peer owners to their chat user ids (from
    /// `peers[].bot-id`); it is only consulted by the `dm` strategy.
    #[must_use]
    pub fn new(
        api: Arc<dyn ChatApi>,
        config: ChatTransportConfig,
        self_owner: impl Into<String>,
        peer_bots: BTreeMap<String, String>,
    ) -> Self {
        Self::with_ttl(api, config, self_owner, peer_bots, hiamp_transport::cache::DEFAULT_TTL)
    }

    /// Build a transport with an explicit resolution-cache TTL.
    #[must_use]
    pub fn with_ttl(
        api: Arc<dyn ChatApi>,
        config: ChatTransportConfig,
        self_owner: impl Into<String>,
        peer_bots: BTreeMap<String, String>,
        ttl: Duration,
    ) -> Self {
        Self {
            api,
            config,
            self_owner: self_owner.into(),
            peer_bots,
            resolutions: TtlCache::new(ttl),
            watching: Mutex::new(None),
        }
    }

    /// Channel name for the per-relationship strategy.
    ///
    /// Both sides must compute the same name, so the pair is ordered
    /// lexicographically rather than by who is sending.
    fn relationship_channel_name(&self, peer: &str) -> String {
        let prefix = self.config.relationship_prefix.as_deref().unwrap_or("hq-");
        let (a, b) = if self.self_owner.as_str() <= peer {
            (self.self_owner.as_str(), peer)
        } else {
            (peer, self.self_owner.as_str())
        };
        format!("{prefix}{a}--{b}")
    }

    async fn resolve_uncached(
        &self,
        target_peer: &str,
        context_tag: Option<&str>,
    ) -> Result<ChannelResolution, TransportError> {
        let strategy = self.config.strategy;
        match strategy {
            ChannelStrategy::Dedicated => {
                let channel_id = self.config.dedicated_channel.clone().ok_or_else(|| {
                    TransportError::new(
                        ErrorCode::ChannelResolveFailed,
                        "dedicated strategy without a dedicated-channel",
                    )
                })?;
                Ok(ChannelResolution {
                    channel_id,
                    channel_name: None,
                    strategy: strategy.as_str().into(),
                })
            }

            ChannelStrategy::PerRelationship => {
                let name = self.relationship_channel_name(target_peer);
                let channel = match self.api.lookup_channel(&name).await? {
                    Some(found) => found,
                    None => {
                        info!(channel = %name, "creating relationship channel");
                        self.api.create_channel(&name).await?
                    }
                };
                Ok(ChannelResolution {
                    channel_id: channel.id,
                    channel_name: Some(channel.name),
                    strategy: strategy.as_str().into(),
                })
            }

            ChannelStrategy::Contextual => {
                let tag = context_tag.ok_or_else(|| {
                    TransportError::new(
                        ErrorCode::NoContextMatch,
                        "contextual strategy requires a context tag",
                    )
                })?;
                let ctx = self.config.contexts.get(tag).ok_or_else(|| {
                    TransportError::new(
                        ErrorCode::NoContextMatch,
                        format!("no channel declared for context '{tag}'"),
                    )
                })?;
                Ok(ChannelResolution {
                    channel_id: ctx.channel_id.clone(),
                    channel_name: Some(tag.to_string()),
                    strategy: strategy.as_str().into(),
                })
            }

            ChannelStrategy::Dm => {
                let bot = self.peer_bots.get(target_peer).ok_or_else(|| {
                    TransportError::new(
                        ErrorCode::ChannelResolveFailed,
                        format!("peer '{target_peer}' has no bot-id for the dm strategy"),
                    )
                })?;
                let channel = self.api.open_dm(bot).await?;
                Ok(ChannelResolution {
                    channel_id: channel.id,
                    channel_name: Some(channel.name),
                    strategy: strategy.as_str().into(),
                })
            }
        }
    }
}

#[async_trait]
impl Transport for ChatTransport {
    fn name(&self) -> &'static str {
        "slack"
    }

    async fn resolve_channel(
        &self,
        target_peer: &str,
        context_tag: Option<&str>,
        channel_id: Option<&str>,
    ) -> Result<ChannelResolution, TransportError> {
        if let Some(explicit) = channel_id {
            return Ok(ChannelResolution {
                channel_id: explicit.to_string(),
                channel_name: None,
                strategy: "explicit".into(),
            });
        }

        let key = format!("{target_peer}\u{1f}{}", context_tag.unwrap_or(""));
        if let Some(hit) = self.resolutions.get(&key) {
            debug!(peer = target_peer, "channel resolution cache hit");
            return Ok(hit);
        }

        let resolution = self.resolve_uncached(target_peer, context_tag).await?;
        self.resolutions.insert(key, resolution.clone());
        Ok(resolution)
    }

    async fn send(&self, channel_id: &str, text: &str) -> Result<SendOutcome, TransportError> {
        let posted = self.api.post_message(channel_id, text).await?;
        Ok(SendOutcome {
            thread_ref: format!("{}{THREAD_REF_SEP}{}", posted.channel, posted.ts),
            transport_message_id: posted.ts,
        })
    }

    async fn send_reply(
        &self,
        thread_ref: &str,
        text: &str,
    ) -> Result<ReplyOutcome, TransportError> {
        let (channel, ts) = split_thread_ref(thread_ref)?;
        let posted = self.api.post_reply(channel, ts, text).await?;
        Ok(ReplyOutcome {
            transport_message_id: posted.ts,
        })
    }

    async fn watch(&self, inbound: mpsc::Sender<Inbound>) -> Result<(), TransportError> {
        let (events_tx, mut events_rx) = mpsc::channel::<ChatEvent>(64);
        self.api.connect_events(events_tx).await?;

        let handle = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                if !looks_like_envelope(&event.text) {
                    continue;
                }
                let anchor = event.thread_ts.as_deref().unwrap_or(&event.ts);
                let item = Inbound {
                    text: event.text,
                    thread_ref: format!("{}{THREAD_REF_SEP}{anchor}", event.channel),
                    channel_id: event.channel,
                };
                if inbound.send(item).await.is_err() {
                    break; // receiver dropped
                }
            }
        });

        let mut watching = self.watching.lock().expect("watch lock poisoned");
        if let Some(old) = watching.replace(handle) {
            old.abort();
        }
        Ok(())
    }

    async fn unwatch(&self) {
        self.api.disconnect_events().await;
        let handle = self.watching.lock().expect("watch lock poisoned").take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }

    async fn fetch_replies(&self, thread_ref: &str) -> Result<Vec<String>, TransportError> {
        let (channel, ts) = split_thread_ref(thread_ref)?;
        self.api.fetch_thread(channel, ts).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
