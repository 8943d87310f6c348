// SPDX-License-Identifier: MIT OR Apache-2.0
#![doc = include_str!("../README.md")]
//! hiamp-events
#![deny(unsafe_code)]
#![warn(missing_docs)]

use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::warn;

// ---------------------------------------------------------------------------
// DomainEvent
// ---------------------------------------------------------------------------

/// A domain event published on the HQ's in-process bus.
///
/// The serialized form is one JSON object tagged by `event`, e.g.
/// `{"event":"message-sent","id":"msg-…",…}` — this is also the wire shape
/// consumed by the external WebSocket feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum DomainEvent {
    /// An outbound message was dispatched.
    #[serde(rename_all = "kebab-case")]
    MessageSent {
        /// Message id.
        id: String,
        /// Sender address.
        from: String,
        /// Recipient address.
        to: String,
        /// Intent string.
        intent: String,
        /// Thread id.
        thread: String,
        /// Endpoint the message was posted to.
        channel_id: String,
    },

    /// An inbound message was stored.
    #[serde(rename_all = "kebab-case")]
    MessageReceived {
        /// Message id.
        id: String,
        /// Sender address.
        from: String,
        /// Local worker the message was delivered to.
        worker: String,
        /// True when this id replaced an existing inbox entry.
        duplicate: bool,
    },

    /// A thread gained a message or changed status.
    #[serde(rename_all = "kebab-case")]
    ThreadUpdated {
        /// Thread id.
        thread: String,
        /// Messages now recorded on the thread.
        message_count: usize,
    },

    /// An approved bundle was staged into the world inbox.
    #[serde(rename_all = "kebab-case")]
    TransferStaged {
        /// Transfer id.
        transfer_id: String,
        /// Peer that produced the bundle.
        peer: String,
        /// `knowledge` or `worker-pattern`.
        transfer_type: String,
        /// Directory the bundle was staged into.
        staged_to: String,
    },

    /// A staged bundle was integrated into the live tree.
    #[serde(rename_all = "kebab-case")]
    TransferIntegrated {
        /// Transfer id.
        transfer_id: String,
        /// Path the content was integrated to.
        integrated_to: String,
    },

    /// An automatic acknowledgment was sent.
    #[serde(rename_all = "kebab-case")]
    AckEmitted {
        /// Id of the message being acknowledged.
        reply_to: String,
        /// Thread the ack was posted on.
        thread: String,
        /// True for a negative ack (error-intent reply).
        negative: bool,
    },

    /// The configuration was reloaded.
    #[serde(rename_all = "kebab-case")]
    ConfigReloaded {
        /// Owner of the reloaded config.
        owner: String,
    },
}

impl DomainEvent {
    /// The kebab-case event name (the `event` tag of the feed line).
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSent { .. } => "message-sent",
            Self::MessageReceived { .. } => "message-received",
            Self::ThreadUpdated { .. } => "thread-updated",
            Self::TransferStaged { .. } => "transfer-staged",
            Self::TransferIntegrated { .. } => "transfer-integrated",
            Self::AckEmitted { .. } => "ack-emitted",
            Self::ConfigReloaded { .. } => "config-reloaded",
        }
    }

    /// Serialize to the single-line JSON feed shape.
    #[must_use]
    pub fn feed_line(&self) -> String {
        serde_json::to_string(self).expect("domain events always serialize")
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Opaque handle for cancelling a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn Fn(&DomainEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    name: String,
    callback: Callback,
}

/// Synchronous in-process fan-out of [`DomainEvent`]s.
///
/// Clone freely; clones share the subscriber list.
///
/// # Examples
///
/// ```
/// use hiamp_events::{DomainEvent, EventBus};
/// use std::sync::{Arc, Mutex};
///
/// let bus = EventBus::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// bus.subscribe("collector", move |e| sink.lock().unwrap().push(e.name()));
/// bus.publish(&DomainEvent::ConfigReloaded { owner: "stefan".into() });
/// assert_eq!(*seen.lock().unwrap(), vec!["config-reloaded"]);
/// ```
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Arc<Subscriber>>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a subscriber; delivery order follows registration order.
    pub fn subscribe(
        &self,
        name: impl Into<String>,
        callback: impl Fn(&DomainEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let sub = Arc::new(Subscriber {
            id,
            name: name.into(),
            callback: Box::new(callback),
        });
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .push(sub);
        id
    }

    /// Register a feed subscriber receiving each event as a JSON line.
    pub fn subscribe_feed(
        &self,
        name: impl Into<String>,
        sink: impl Fn(String) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(name, move |event| sink(event.feed_line()))
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .retain(|s| s.id != id);
    }

    /// Deliver an event to every subscriber, in registration order.
    ///
    /// The subscriber list is snapshotted before delivery, so callbacks may
    /// themselves subscribe or unsubscribe without deadlocking. A panicking
    /// subscriber is logged and skipped; the rest still receive the event.
    pub fn publish(&self, event: &DomainEvent) {
        let snapshot: Vec<Arc<Subscriber>> = self
            .subscribers
            .lock()
            .expect("event bus lock poisoned")
            .clone();
        for sub in snapshot {
            let result = catch_unwind(AssertUnwindSafe(|| (sub.callback)(event)));
            if result.is_err() {
                warn!(subscriber = %sub.name, event = event.name(), "subscriber panicked");
            }
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("event bus lock poisoned")
            .len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
