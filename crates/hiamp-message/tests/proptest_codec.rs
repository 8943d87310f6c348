// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests: compose/parse round-trips every legal message.

use hiamp_message::codec::{compose, parse};
use hiamp_message::{AckMode, HiampMessage, Intent, Priority};
use proptest::prelude::*;

fn intent_strategy() -> impl Strategy<Value = Intent> {
    proptest::sample::select(Intent::ALL.to_vec())
}

fn priority_strategy() -> impl Strategy<Value = Priority> {
    proptest::sample::select(vec![
        Priority::Low,
        Priority::Normal,
        Priority::High,
        Priority::Urgent,
    ])
}

fn ack_strategy() -> impl Strategy<Value = AckMode> {
    proptest::sample::select(vec![AckMode::None, AckMode::Optional, AckMode::Requested])
}

/// Bodies: printable ASCII plus newlines. Carriage returns are excluded —
/// the envelope is a Unix-newline text format.
fn body_strategy() -> impl Strategy<Value = String> {
    "[ -~\n]{0,200}"
}

/// Context tags and refs must not contain the token separator or newlines.
fn tag_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_:/?=.-]{1,40}"
}

fn message_strategy() -> impl Strategy<Value = HiampMessage> {
    (
        "[a-f0-9]{8,12}",
        "[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?",
        "[a-z0-9-]{1,12}",
        "[a-z0-9]([a-z0-9-]{0,10}[a-z0-9])?",
        "[a-z0-9-]{1,12}",
        intent_strategy(),
        body_strategy(),
        (
            proptest::option::of("[a-f0-9]{8,12}"),
            proptest::option::of("[a-f0-9]{8,12}"),
            proptest::option::of(priority_strategy()),
            proptest::option::of(ack_strategy()),
            proptest::option::of(tag_strategy()),
            proptest::option::of(tag_strategy()),
        ),
    )
        .prop_map(
            |(id_hex, owner_a, worker_a, owner_b, worker_b, intent, body, opts)| {
                let (thread, reply_to, priority, ack, context, reference) = opts;
                let mut builder = HiampMessage::builder(
                    &format!("{owner_a}/{worker_a}"),
                    &format!("{owner_b}/{worker_b}"),
                )
                .expect("generated addresses are valid")
                .id(format!("msg-{id_hex}"))
                .intent(intent)
                .body(body);
                if let Some(t) = thread {
                    builder = builder.thread(format!("thr-{t}"));
                }
                if let Some(r) = reply_to {
                    builder = builder.reply_to(format!("msg-{r}"));
                }
                if let Some(p) = priority {
                    builder = builder.priority(p);
                }
                if let Some(a) = ack {
                    builder = builder.ack(a);
                }
                if let Some(c) = context {
                    builder = builder.context(c);
                }
                if let Some(u) = reference {
                    builder = builder.reference(u);
                }
                builder.build()
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(512))]

    #[test]
    fn compose_then_parse_roundtrips(msg in message_strategy()) {
        let text = compose(&msg);
        let parsed = parse(&text).expect("composed text must parse");
        prop_assert_eq!(parsed, msg);
    }

    #[test]
    fn compose_is_deterministic(msg in message_strategy()) {
        prop_assert_eq!(compose(&msg), compose(&msg));
    }

    #[test]
    fn trailer_is_always_the_last_line(msg in message_strategy()) {
        let text = compose(&msg);
        let last = text.lines().last().unwrap();
        prop_assert!(last.starts_with("hq-msg:v1 | id:"));
    }
}
