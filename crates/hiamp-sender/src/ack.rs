// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inbound delivery and acknowledgment handling.
//!
//! Wired behind a transport's `watch` callback: parses the envelope, stores
//! it in the addressed worker's inbox, appends it to its thread, and — when
//! the sender asked for one — posts an automatic acknowledgment. Acks and
//! errors are never acked themselves, which breaks the only reply-graph
//! cycle source.

use crate::dispatch_failure;
use hiamp_config::HqConfig;
use hiamp_error::{ErrorCode, HqError};
use hiamp_events::{DomainEvent, EventBus};
use hiamp_inbox::{InboxEntry, InboxStore};
use hiamp_message::{AckMode, HiampMessage, Intent, codec};
use hiamp_thread::ThreadStore;
use hiamp_transport::{Inbound, Transport, with_deadline};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What became of one inbound text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Not addressed to this HQ; left for its real recipient.
    Ignored {
        /// The owner the message was addressed to.
        addressed_to: String,
    },
    /// Stored; an auto-ack went out when requested.
    Stored {
        /// Message id.
        message_id: String,
        /// Local worker it was delivered to.
        worker: String,
        /// Whether this id replaced an existing entry.
        duplicate: bool,
        /// Whether an auto-ack was posted.
        acked: bool,
    },
    /// Rejected by receive policy; a negative ack went out.
    Rejected {
        /// Message id.
        message_id: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Inbound processor: inbox + thread recording + ack/nack emission.
pub struct AckHandler {
    config: Arc<HqConfig>,
    transport: Arc<dyn Transport>,
    inbox: InboxStore,
    threads: ThreadStore,
    bus: EventBus,
    ack_timeout: Duration,
}

impl AckHandler {
    /// Build a handler sharing the sender's transport and stores.
    #[must_use]
    pub fn new(
        config: Arc<HqConfig>,
        transport: Arc<dyn Transport>,
        inbox: InboxStore,
        threads: ThreadStore,
        bus: EventBus,
    ) -> Self {
        let ack_timeout = Duration::from_secs(config.settings.ack_timeout_secs);
        Self {
            config,
            transport,
            inbox,
            threads,
            bus,
            ack_timeout,
        }
    }

    /// Process one inbound text from the transport's watch callback.
    ///
    /// # Errors
    ///
    /// Codec failures surface with their validation codes; storage failures
    /// as `TRANSPORT_ERROR`. Ack emission failures are logged, not returned —
    /// the message itself was delivered.
    pub async fn handle_inbound(&self, inbound: Inbound) -> Result<InboundOutcome, HqError> {
        let message = codec::parse(&inbound.text)
            .map_err(|e| HqError::new(e.code(), e.to_string()))?;

        if message.to.owner != self.config.identity.owner {
            debug!(to = %message.to, "inbound message for another HQ — ignoring");
            return Ok(InboundOutcome::Ignored {
                addressed_to: message.to.owner.clone(),
            });
        }

        let worker = message.to.worker.clone();
        if !self.config.worker_permissions.receive_allowed(&worker) {
            let reason = format!("worker '{worker}' does not accept messages");
            self.nack(&message, &inbound, &reason).await;
            return Ok(InboundOutcome::Rejected {
                message_id: message.id.clone(),
                reason,
            });
        }

        let entry = InboxEntry {
            message: message.clone(),
            raw: inbound.text.clone(),
            received_at: hiamp_id::utc_timestamp(),
            channel_id: inbound.channel_id.clone(),
            transport_ref: Some(inbound.thread_ref.clone()),
            read: false,
        };
        let outcome = self
            .inbox
            .add(&worker, &entry)
            .map_err(|e| HqError::new(ErrorCode::TransportError, format!("inbox store: {e}")))?;
        if outcome.duplicate {
            warn!(id = %message.id, "duplicate inbound id — stored as update");
        }
        self.bus.publish(&DomainEvent::MessageReceived {
            id: message.id.clone(),
            from: message.from.to_string(),
            worker: worker.clone(),
            duplicate: outcome.duplicate,
        });

        if let Some(thread) = &message.thread {
            match self.threads.append_message(thread, &message) {
                Ok(state) => self.bus.publish(&DomainEvent::ThreadUpdated {
                    thread: thread.clone(),
                    message_count: state.messages.len(),
                }),
                Err(e) => warn!(thread, error = %e, "thread append failed for inbound"),
            }
        }

        let mut acked = false;
        if message.wants_ack() {
            acked = self.emit_ack(&message, &inbound).await;
        }

        Ok(InboundOutcome::Stored {
            message_id: message.id,
            worker,
            duplicate: outcome.duplicate,
            acked,
        })
    }

    /// Compose and post the automatic acknowledgment. Never retried.
    async fn emit_ack(&self, inbound_msg: &HiampMessage, inbound: &Inbound) -> bool {
        let ack = self.reply_to(inbound_msg, Intent::Acknowledge, format!(
            "Acknowledged {}.",
            inbound_msg.id
        ));
        match self.post_reply(&ack, inbound).await {
            Ok(()) => {
                self.bus.publish(&DomainEvent::AckEmitted {
                    reply_to: inbound_msg.id.clone(),
                    thread: inbound_msg.thread.clone().unwrap_or_default(),
                    negative: false,
                });
                info!(reply_to = %inbound_msg.id, "auto-ack emitted");
                true
            }
            Err(e) => {
                warn!(reply_to = %inbound_msg.id, error = %e, "auto-ack failed");
                false
            }
        }
    }

    /// Post a negative acknowledgment: an `error`-intent reply carrying a
    /// human-readable reason.
    pub async fn nack(&self, inbound_msg: &HiampMessage, inbound: &Inbound, reason: &str) {
        let reply = self.reply_to(inbound_msg, Intent::Error, reason.to_string());
        match self.post_reply(&reply, inbound).await {
            Ok(()) => {
                self.bus.publish(&DomainEvent::AckEmitted {
                    reply_to: inbound_msg.id.clone(),
                    thread: inbound_msg.thread.clone().unwrap_or_default(),
                    negative: true,
                });
                info!(reply_to = %inbound_msg.id, reason, "nack emitted");
            }
            Err(e) => warn!(reply_to = %inbound_msg.id, error = %e, "nack failed"),
        }
    }

    fn reply_to(&self, inbound_msg: &HiampMessage, intent: Intent, body: String) -> HiampMessage {
        let mut builder = HiampMessage::builder(
            &inbound_msg.to.to_string(),
            &inbound_msg.from.to_string(),
        )
        .expect("stored addresses re-parse")
        .intent(intent)
        .body(body)
        .reply_to(inbound_msg.id.clone())
        .ack(AckMode::None);
        if let Some(thread) = &inbound_msg.thread {
            builder = builder.thread(thread.clone());
        }
        builder.build()
    }

    async fn post_reply(&self, reply: &HiampMessage, inbound: &Inbound) -> Result<(), HqError> {
        let text = codec::compose(reply);
        with_deadline(self.ack_timeout, "ack", async {
            self.transport.send_reply(&inbound.thread_ref, &text).await
        })
        .await
        .map_err(dispatch_failure)?;

        // Acks and nacks are part of the conversation record too.
        if let Some(thread) = &reply.thread
            && let Err(e) = self.threads.append_message(thread, reply)
        {
            warn!(thread, error = %e, "thread append failed for ack");
        }
        Ok(())
    }
}
