// SPDX-License-Identifier: MIT OR Apache-2.0
//! Inbound delivery and acknowledgment scenarios.

use hiamp_error::ErrorCode;
use hiamp_events::{DomainEvent, EventBus};
use hiamp_inbox::InboxStore;
use hiamp_message::{AckMode, HiampMessage, Intent, codec};
use hiamp_sender::ack::{AckHandler, InboundOutcome};
use hiamp_thread::ThreadStore;
use hiamp_transport::{Inbound, Transport};
use hiamp_transport_chat::ChatTransport;
use hiamp_transport_chat::mock::InMemoryChatApi;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const CONFIG: &str = r#"
identity:
  owner: stefan
  instance-id: stefan-hq-primary

peers:
  - owner: alex
    workers: [backend-dev]

transport: slack

slack:
  bot-token: xoxb-test
  strategy: dedicated
  dedicated-channel: C-DEDICATED

worker-permissions:
  default: deny
  workers:
    - id: architect
      send: true
      receive: true
    - id: vault-keeper
      send: false
      receive: false
"#;

struct Fixture {
    handler: AckHandler,
    api: Arc<InMemoryChatApi>,
    inbox: InboxStore,
    threads: ThreadStore,
    bus: EventBus,
    _dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let config = Arc::new(hiamp_config::parse_str(CONFIG).unwrap());
    let api = Arc::new(InMemoryChatApi::new());
    let transport: Arc<dyn Transport> = Arc::new(ChatTransport::new(
        api.clone(),
        config.slack.clone().unwrap(),
        "stefan",
        BTreeMap::new(),
    ));
    let dir = tempfile::tempdir().unwrap();
    let inbox = InboxStore::new(dir.path().join("inbox"));
    let threads = ThreadStore::new(dir.path().join("threads"));
    let bus = EventBus::new();
    let handler = AckHandler::new(
        config,
        transport,
        inbox.clone(),
        threads.clone(),
        bus.clone(),
    );
    Fixture {
        handler,
        api,
        inbox,
        threads,
        bus,
        _dir: dir,
    }
}

fn inbound_from_alex(
    intent: Intent,
    ack: Option<AckMode>,
    thread: Option<&str>,
) -> (HiampMessage, Inbound) {
    let mut builder = HiampMessage::builder("alex/backend-dev", "stefan/architect")
        .unwrap()
        .intent(intent)
        .body("please take over");
    if let Some(a) = ack {
        builder = builder.ack(a);
    }
    if let Some(t) = thread {
        builder = builder.thread(t);
    }
    let message = builder.build();
    let inbound = Inbound {
        text: codec::compose(&message),
        thread_ref: "C-DEDICATED:1700.1".into(),
        channel_id: "C-DEDICATED".into(),
    };
    (message, inbound)
}

#[tokio::test]
async fn requested_ack_gets_an_automatic_reply() {
    let f = fixture();
    let (message, inbound) =
        inbound_from_alex(Intent::Request, Some(AckMode::Requested), Some("thr-00aa11bb"));

    let outcome = f.handler.handle_inbound(inbound).await.unwrap();
    assert_eq!(
        outcome,
        InboundOutcome::Stored {
            message_id: message.id.clone(),
            worker: "architect".into(),
            duplicate: false,
            acked: true,
        }
    );

    // The ack went out as a threaded reply and is a parseable envelope.
    let replies = f.posted_replies().await;
    assert_eq!(replies.len(), 1);
    let ack = codec::parse(&replies[0]).unwrap();
    assert_eq!(ack.intent, Intent::Acknowledge);
    assert_eq!(ack.reply_to.as_deref(), Some(message.id.as_str()));
    assert_eq!(ack.ack, Some(AckMode::None));
    assert_eq!(ack.thread.as_deref(), Some("thr-00aa11bb"));
    assert_eq!(ack.from.to_string(), "stefan/architect");
    assert_eq!(ack.to.to_string(), "alex/backend-dev");

    // Inbox holds the original; the thread holds original + ack.
    assert!(f.inbox.get("architect", &message.id).unwrap().is_some());
    let thread = f.threads.load("thr-00aa11bb").unwrap().unwrap();
    assert_eq!(thread.messages.len(), 2);
}

impl Fixture {
    async fn posted_replies(&self) -> Vec<String> {
        use hiamp_transport_chat::api::ChatApi;
        self.api.fetch_thread("C-DEDICATED", "1700.1").await.unwrap()
    }
}

#[tokio::test]
async fn acks_and_errors_are_never_acked() {
    let f = fixture();
    for intent in [Intent::Acknowledge, Intent::Error] {
        let (_, inbound) = inbound_from_alex(intent, Some(AckMode::Requested), None);
        let outcome = f.handler.handle_inbound(inbound).await.unwrap();
        assert!(matches!(outcome, InboundOutcome::Stored { acked: false, .. }));
    }
    assert!(f.posted_replies().await.is_empty());
}

#[tokio::test]
async fn optional_and_absent_ack_modes_stay_quiet() {
    let f = fixture();
    let (_, inbound) = inbound_from_alex(Intent::Inform, Some(AckMode::Optional), None);
    f.handler.handle_inbound(inbound).await.unwrap();
    let (_, inbound) = inbound_from_alex(Intent::Inform, None, None);
    f.handler.handle_inbound(inbound).await.unwrap();
    assert!(f.posted_replies().await.is_empty());
}

#[tokio::test]
async fn messages_for_other_hqs_are_ignored() {
    let f = fixture();
    let message = HiampMessage::builder("alex/backend-dev", "jordan/ops")
        .unwrap()
        .body("not for stefan")
        .build();
    let inbound = Inbound {
        text: codec::compose(&message),
        thread_ref: "C-DEDICATED:1700.9".into(),
        channel_id: "C-DEDICATED".into(),
    };
    let outcome = f.handler.handle_inbound(inbound).await.unwrap();
    assert_eq!(
        outcome,
        InboundOutcome::Ignored {
            addressed_to: "jordan".into()
        }
    );
    assert!(f.inbox.list("ops", true).unwrap().is_empty());
}

#[tokio::test]
async fn receive_denied_worker_triggers_a_nack() {
    let f = fixture();
    let message = HiampMessage::builder("alex/backend-dev", "stefan/vault-keeper")
        .unwrap()
        .intent(Intent::Request)
        .body("open the vault")
        .thread("thr-00aa11bb")
        .build();
    let inbound = Inbound {
        text: codec::compose(&message),
        thread_ref: "C-DEDICATED:1700.1".into(),
        channel_id: "C-DEDICATED".into(),
    };

    let outcome = f.handler.handle_inbound(inbound).await.unwrap();
    assert!(matches!(outcome, InboundOutcome::Rejected { .. }));

    let replies = f.posted_replies().await;
    assert_eq!(replies.len(), 1);
    let nack = codec::parse(&replies[0]).unwrap();
    assert_eq!(nack.intent, Intent::Error);
    assert!(nack.body.contains("vault-keeper"));

    // Nothing stored for a rejected delivery.
    assert!(f.inbox.list("vault-keeper", true).unwrap().is_empty());
}

#[tokio::test]
async fn duplicate_delivery_is_stored_as_update_and_flagged() {
    let f = fixture();
    let (_message, inbound) = inbound_from_alex(Intent::Inform, None, None);
    f.handler.handle_inbound(inbound.clone()).await.unwrap();
    let outcome = f.handler.handle_inbound(inbound).await.unwrap();
    assert!(matches!(outcome, InboundOutcome::Stored { duplicate: true, .. }));
    assert_eq!(f.inbox.list("architect", true).unwrap().len(), 1);
}

#[tokio::test]
async fn non_envelope_text_is_a_codec_error() {
    let f = fixture();
    let inbound = Inbound {
        text: "just chatter".into(),
        thread_ref: "C-DEDICATED:1700.1".into(),
        channel_id: "C-DEDICATED".into(),
    };
    let err = f.handler.handle_inbound(inbound).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidEnvelope);
}

#[tokio::test]
async fn events_flow_for_stored_and_acked_messages() {
    let f = fixture();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    f.bus.subscribe("test", move |e: &DomainEvent| sink.lock().unwrap().push(e.name()));

    let (_, inbound) =
        inbound_from_alex(Intent::Request, Some(AckMode::Requested), Some("thr-00aa11bb"));
    f.handler.handle_inbound(inbound).await.unwrap();

    let names = seen.lock().unwrap().clone();
    assert_eq!(names, vec!["message-received", "thread-updated", "ack-emitted"]);
}
