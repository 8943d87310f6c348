// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-sender
#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ack;

use hiamp_config::HqConfig;
use hiamp_error::{ErrorCode, HqError};
use hiamp_events::{DomainEvent, EventBus};
use hiamp_id::Address;
use hiamp_message::{AckMode, HiampMessage, Intent, Priority, codec};
use hiamp_thread::ThreadStore;
use hiamp_transport::{Transport, TransportError, with_deadline};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Base delay of the rate-limit backoff; doubles per attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// A worker's request to send one message.
#[derive(Debug, Clone, Default)]
pub struct SendRequest {
    /// Full sender address; derived from `worker` when absent.
    pub from: Option<String>,
    /// Local worker id (combined with the HQ owner when `from` is absent).
    pub worker: Option<String>,
    /// Destination address (`peer/worker`).
    pub to: String,
    /// Intent; defaults to `inform`.
    pub intent: Option<Intent>,
    /// Body text.
    pub body: String,
    /// Existing thread to continue; a fresh thread is opened when absent.
    pub thread: Option<String>,
    /// Message id this send answers (kept as a weak reference).
    pub reply_to: Option<String>,
    /// Priority hint.
    pub priority: Option<Priority>,
    /// Ack expectation.
    pub ack: Option<AckMode>,
    /// Context tag (channel routing input).
    pub context: Option<String>,
    /// External reference URL.
    pub reference: Option<String>,
    /// Explicit transport endpoint, bypassing strategy resolution.
    pub channel_id: Option<String>,
}

/// Successful send result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Id of the dispatched message.
    pub message_id: String,
    /// Endpoint the message was posted to.
    pub channel_id: String,
    /// Thread the message belongs to (freshly opened when none was given).
    pub thread: String,
    /// The exact envelope text that went over the wire.
    pub message_text: String,
}

/// What the sender knows about a thread's endpoint.
#[derive(Debug, Clone)]
struct ThreadBinding {
    channel_id: String,
    /// Anchor for threaded replies; set once the root post lands.
    thread_ref: Option<String>,
}

/// Outbound delivery engine.
///
/// One instance per HQ process; clone-free, share via [`Arc`].
pub struct Sender {
    config: Arc<HqConfig>,
    transport: Arc<dyn Transport>,
    threads: ThreadStore,
    bus: EventBus,
    /// thread id → endpoint binding. Lock scope is a single map operation.
    memo: Mutex<HashMap<String, ThreadBinding>>,
    /// Per-thread dispatch locks: async, held across the transport await so
    /// message order within a thread equals dispatch order.
    dispatch_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    send_timeout: Duration,
}

impl Sender {
    /// Build a sender over an already-constructed transport.
    #[must_use]
    pub fn new(
        config: Arc<HqConfig>,
        transport: Arc<dyn Transport>,
        threads: ThreadStore,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            transport,
            threads,
            bus,
            memo: Mutex::new(HashMap::new()),
            dispatch_locks: Mutex::new(HashMap::new()),
            send_timeout: hiamp_transport::DEFAULT_SEND_TIMEOUT,
        }
    }

    /// Override the outbound deadline (tests use short ones).
    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    /// The channel binding recorded for a thread, if any.
    #[must_use]
    pub fn channel_for_thread(&self, thread: &str) -> Option<String> {
        self.memo
            .lock()
            .expect("memo lock poisoned")
            .get(thread)
            .map(|b| b.channel_id.clone())
    }

    fn dispatch_lock(&self, thread: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.dispatch_locks
            .lock()
            .expect("dispatch lock table poisoned")
            .entry(thread.to_string())
            .or_default()
            .clone()
    }

    /// Send one message, walking the full preflight.
    ///
    /// # Errors
    ///
    /// Fails with the first violated rule, in the fixed order
    /// `KILL_SWITCH` > `DISABLED` > `INVALID_MESSAGE` (from/address) >
    /// `PERMISSION_DENIED` > `CHANNEL_RESOLVE_FAILED` > transport codes.
    pub async fn send(&self, request: SendRequest) -> Result<SendReceipt, HqError> {
        // 1. Kill switch.
        if self.config.security.kill_switch {
            return Err(HqError::new(ErrorCode::KillSwitch, "kill switch is engaged"));
        }
        // 2. Disabled.
        if !self.config.settings.enabled {
            return Err(HqError::new(ErrorCode::Disabled, "messaging is disabled in settings"));
        }

        // 3. From resolution.
        let from = self.resolve_from(&request)?;
        // 4. Address validation.
        let to = self.validate_destination(&request.to)?;
        if request.body.len() > self.config.settings.message_max_bytes {
            return Err(HqError::new(
                ErrorCode::InvalidMessage,
                format!(
                    "body is {} bytes, settings cap it at {}",
                    request.body.len(),
                    self.config.settings.message_max_bytes
                ),
            ));
        }

        // 5. Worker permission.
        self.check_send_permission(&from, &to, request.intent.unwrap_or(Intent::Inform))?;

        // Thread identity is fixed before channel selection so the memo and
        // the dispatch lock key agree.
        let thread = match &request.thread {
            Some(existing) => existing.clone(),
            None => hiamp_id::thread_id(),
        };

        // 6. Channel selection.
        let (channel_id, known_thread_ref) =
            self.select_channel(&thread, &to.owner, &request).await?;

        // 7. Compose.
        let message = self.build_message(&from, &to, &thread, &request)?;
        let text = codec::compose(&message);

        // 8. Dispatch (per-thread ordering lock held across the await).
        let lock = self.dispatch_lock(&thread);
        let _guard = lock.lock().await;
        let thread_ref = self
            .dispatch(&channel_id, known_thread_ref.as_deref(), &text)
            .await?;

        // 9. Record the thread → channel binding.
        self.memo.lock().expect("memo lock poisoned").insert(
            thread.clone(),
            ThreadBinding {
                channel_id: channel_id.clone(),
                thread_ref: Some(thread_ref),
            },
        );

        // Thread log, then event.
        let state = self
            .threads
            .append_message(&thread, &message)
            .map_err(|e| {
                HqError::new(ErrorCode::TransportError, format!("thread log append failed: {e}"))
            })?;
        self.bus.publish(&DomainEvent::ThreadUpdated {
            thread: thread.clone(),
            message_count: state.messages.len(),
        });

        // 10. Emit.
        self.bus.publish(&DomainEvent::MessageSent {
            id: message.id.clone(),
            from: from.to_string(),
            to: to.to_string(),
            intent: message.intent.as_str().into(),
            thread: thread.clone(),
            channel_id: channel_id.clone(),
        });
        info!(id = %message.id, to = %to, channel = %channel_id, "message dispatched");

        Ok(SendReceipt {
            message_id: message.id,
            channel_id,
            thread,
            message_text: text,
        })
    }

    fn resolve_from(&self, request: &SendRequest) -> Result<Address, HqError> {
        let raw = match (&request.from, &request.worker) {
            (Some(from), _) => from.clone(),
            (None, Some(worker)) => format!("{}/{worker}", self.config.identity.owner),
            (None, None) => {
                return Err(HqError::new(
                    ErrorCode::InvalidMessage,
                    "neither 'from' nor 'worker' was supplied",
                ));
            }
        };
        raw.parse().map_err(|_| {
            HqError::new(ErrorCode::InvalidMessage, format!("'{raw}' is not a sender address"))
        })
    }

    fn validate_destination(&self, to: &str) -> Result<Address, HqError> {
        let address: Address = to.parse().map_err(|_| {
            HqError::new(ErrorCode::InvalidMessage, format!("'{to}' is not a peer/worker address"))
        })?;
        let peer = self.config.peer(&address.owner).ok_or_else(|| {
            HqError::new(
                ErrorCode::InvalidMessage,
                format!("'{}' is not a declared peer", address.owner),
            )
        })?;
        if !peer.workers.iter().any(|w| w == &address.worker) {
            return Err(HqError::new(
                ErrorCode::InvalidMessage,
                format!("peer '{}' has no worker '{}'", address.owner, address.worker),
            ));
        }
        Ok(address)
    }

    fn check_send_permission(
        &self,
        from: &Address,
        to: &Address,
        intent: Intent,
    ) -> Result<(), HqError> {
        let permissions = &self.config.worker_permissions;
        let worker = &from.worker;
        if !permissions.send_allowed(worker) {
            return Err(HqError::new(
                ErrorCode::PermissionDenied,
                format!("worker '{worker}' has no send permission"),
            )
            .with_context("worker", worker));
        }
        if let Some(entry) = permissions.entry(worker) {
            if !entry.allows_intent(intent) {
                return Err(HqError::new(
                    ErrorCode::PermissionDenied,
                    format!("worker '{worker}' may not send intent '{intent}'"),
                ));
            }
            if !entry.allows_peer(&to.owner) {
                return Err(HqError::new(
                    ErrorCode::PermissionDenied,
                    format!("worker '{worker}' may not address peer '{}'", to.owner),
                ));
            }
        }
        Ok(())
    }

    /// Pick the endpoint: explicit channel beats the thread memo beats fresh
    /// resolution. Returns the endpoint plus any known reply anchor.
    async fn select_channel(
        &self,
        thread: &str,
        target_peer: &str,
        request: &SendRequest,
    ) -> Result<(String, Option<String>), HqError> {
        if let Some(explicit) = &request.channel_id {
            // Still goes through the transport's explicit path — the tracker
            // maps an issue identifier to its UUID there — but no strategy
            // cascade runs.
            let resolution = with_deadline(
                hiamp_transport::DEFAULT_RESOLVE_TIMEOUT,
                "resolve",
                self.transport.resolve_channel(target_peer, None, Some(explicit)),
            )
            .await
            .map_err(resolve_failure)?;
            return Ok((resolution.channel_id, None));
        }

        if let Some(binding) = self.memo.lock().expect("memo lock poisoned").get(thread) {
            debug!(thread, channel = %binding.channel_id, "thread memo hit");
            return Ok((binding.channel_id.clone(), binding.thread_ref.clone()));
        }

        let context = request.context.as_deref().or(request.reference.as_deref());
        let resolution = with_deadline(
            hiamp_transport::DEFAULT_RESOLVE_TIMEOUT,
            "resolve",
            self.transport.resolve_channel(target_peer, context, None),
        )
        .await
        .map_err(resolve_failure)?;
        Ok((resolution.channel_id, None))
    }

    fn build_message(
        &self,
        from: &Address,
        to: &Address,
        thread: &str,
        request: &SendRequest,
    ) -> Result<HiampMessage, HqError> {
        let id = hiamp_id::fresh_id(hiamp_id::message_id, |candidate| {
            self.threads
                .contains_message(thread, candidate)
                .unwrap_or(false)
        });
        let mut builder = HiampMessage::builder(&from.to_string(), &to.to_string())
            .map_err(|e| HqError::new(ErrorCode::InvalidMessage, e.to_string()))?
            .id(id)
            .intent(request.intent.unwrap_or(Intent::Inform))
            .body(request.body.clone())
            .thread(thread);
        if let Some(r) = &request.reply_to {
            builder = builder.reply_to(r.clone());
        }
        if let Some(p) = request.priority {
            builder = builder.priority(p);
        }
        if let Some(a) = request.ack {
            builder = builder.ack(a);
        }
        if let Some(c) = &request.context {
            builder = builder.context(c.clone());
        }
        if let Some(r) = &request.reference {
            builder = builder.reference(r.clone());
        }
        Ok(builder.build())
    }

    /// Post the text, retrying only rate-limited failures, with exponential
    /// backoff bounded by `settings.max-retries`.
    async fn dispatch(
        &self,
        channel_id: &str,
        thread_ref: Option<&str>,
        text: &str,
    ) -> Result<String, HqError> {
        let max_retries = self.config.settings.max_retries;
        let mut attempt = 0u32;
        loop {
            let result = match thread_ref {
                Some(anchor) => with_deadline(
                    self.send_timeout,
                    "send-reply",
                    async {
                        self.transport
                            .send_reply(anchor, text)
                            .await
                            .map(|_| anchor.to_string())
                    },
                )
                .await,
                None => with_deadline(self.send_timeout, "send", async {
                    self.transport.send(channel_id, text).await.map(|o| o.thread_ref)
                })
                .await,
            };

            match result {
                Ok(anchor) => return Ok(anchor),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                    debug!(attempt, delay_ms = delay.as_millis() as u64, "rate limited, backing off");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(dispatch_failure(e)),
            }
        }
    }
}

/// Map a resolver failure onto the sender contract.
fn resolve_failure(e: TransportError) -> HqError {
    HqError::new(
        ErrorCode::ChannelResolveFailed,
        format!("channel resolution failed: {e}"),
    )
    .with_context("cause", e.code.as_str())
}

/// Map a dispatch failure onto the sender contract: permission and rate
/// limiting keep their codes, everything else is a transport error.
fn dispatch_failure(e: TransportError) -> HqError {
    match e.code {
        ErrorCode::PermissionDenied | ErrorCode::RateLimited => HqError::new(e.code, e.message),
        _ => HqError::new(ErrorCode::TransportError, e.message),
    }
}

// ---------------------------------------------------------------------------
// Tests (unit level; full scenarios live in tests/)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_failure_keeps_policy_codes() {
        let kept = dispatch_failure(TransportError::from_status(403, "no access"));
        assert_eq!(kept.code, ErrorCode::PermissionDenied);
        let kept = dispatch_failure(TransportError::from_status(429, "slow down"));
        assert_eq!(kept.code, ErrorCode::RateLimited);
        let wrapped = dispatch_failure(TransportError::from_status(500, "boom"));
        assert_eq!(wrapped.code, ErrorCode::TransportError);
        let network = dispatch_failure(TransportError::network("down"));
        assert_eq!(network.code, ErrorCode::TransportError);
    }

    #[test]
    fn resolve_failure_wraps_with_cause_context() {
        let e = resolve_failure(TransportError::new(ErrorCode::IssueNotFound, "no ENG-9"));
        assert_eq!(e.code, ErrorCode::ChannelResolveFailed);
        assert_eq!(e.context["cause"], serde_json::json!("ISSUE_NOT_FOUND"));
    }
}
