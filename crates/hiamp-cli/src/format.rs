// SPDX-License-Identifier: MIT OR Apache-2.0
//! Plain-text rendering for the CLI.

use hiamp_inbox::InboxEntry;
use hiamp_sender::SendReceipt;
use hiamp_thread::{ThreadState, ThreadStatus};

/// One-screen confirmation for a dispatched message.
pub fn render_receipt(receipt: &SendReceipt) -> String {
    format!(
        "sent:    {}\nchannel: {}\nthread:  {}\n",
        receipt.message_id, receipt.channel_id, receipt.thread
    )
}

/// A worker's inbox listing, newest first.
pub fn render_inbox(worker: &str, unread: usize, entries: &[InboxEntry]) -> String {
    let mut out = format!("inbox {worker} ({unread} unread)\n");
    if entries.is_empty() {
        out.push_str("  (no messages)\n");
        return out;
    }
    for entry in entries {
        let marker = if entry.read { ' ' } else { '*' };
        let first_line = entry.message.body.lines().next().unwrap_or("");
        out.push_str(&format!(
            "{marker} {}  {}  {}  {}  {}\n",
            entry.message.id,
            entry.received_at,
            entry.message.from,
            entry.message.intent,
            truncate(first_line, 60),
        ));
    }
    out
}

/// Full thread log.
pub fn render_thread(state: &ThreadState) -> String {
    let status = match state.status {
        ThreadStatus::Open => "open",
        ThreadStatus::Closed => "closed",
    };
    let participants: Vec<String> = state.participants.iter().map(ToString::to_string).collect();
    let mut out = format!(
        "thread {} ({status}, {} message(s))\nparticipants: {}\n",
        state.id,
        state.messages.len(),
        participants.join(", "),
    );
    for msg in &state.messages {
        out.push_str(&format!(
            "\n[{}] {} → {} ({})\n",
            msg.timestamp, msg.from, msg.to, msg.intent
        ));
        if let Some(reply_to) = &msg.reply_to {
            out.push_str(&format!("  in reply to {reply_to}\n"));
        }
        for line in msg.body.lines() {
            out.push_str(&format!("  {line}\n"));
        }
    }
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hiamp_message::{HiampMessage, Intent};
    use hiamp_thread::ThreadStore;

    fn entry(id: &str, body: &str, read: bool) -> InboxEntry {
        let message = HiampMessage::builder("alex/backend-dev", "stefan/architect")
            .unwrap()
            .id(id)
            .intent(Intent::Inform)
            .body(body)
            .build();
        InboxEntry {
            raw: hiamp_message::codec::compose(&message),
            message,
            received_at: "2026-08-01T10:00:00Z".into(),
            channel_id: "C1".into(),
            transport_ref: None,
            read,
        }
    }

    #[test]
    fn inbox_listing_marks_unread() {
        let rendered = render_inbox(
            "architect",
            1,
            &[entry("msg-0a0a0a0a", "hello there", false), entry("msg-0b0b0b0b", "old", true)],
        );
        assert!(rendered.starts_with("inbox architect (1 unread)\n"));
        assert!(rendered.contains("* msg-0a0a0a0a"));
        assert!(rendered.contains("  msg-0b0b0b0b"));
    }

    #[test]
    fn empty_inbox_says_so() {
        let rendered = render_inbox("architect", 0, &[]);
        assert!(rendered.contains("(no messages)"));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let rendered = render_inbox("w", 1, &[entry("msg-0a0a0a0a", &"x".repeat(200), false)]);
        assert!(rendered.contains('…'));
    }

    #[test]
    fn thread_rendering_includes_replies() {
        let dir = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(dir.path());
        let root = HiampMessage::builder("a1/w1", "b2/w2")
            .unwrap()
            .intent(Intent::Query)
            .body("first?")
            .build();
        store.append_message("thr-aabbccdd", &root).unwrap();
        let reply = HiampMessage::builder("b2/w2", "a1/w1")
            .unwrap()
            .intent(Intent::Response)
            .body("answer")
            .reply_to(root.id.clone())
            .build();
        let state = store.append_message("thr-aabbccdd", &reply).unwrap();

        let rendered = render_thread(&state);
        assert!(rendered.starts_with("thread thr-aabbccdd (open, 2 message(s))"));
        assert!(rendered.contains("participants: a1/w1, b2/w2"));
        assert!(rendered.contains(&format!("in reply to {}", root.id)));
        assert!(rendered.contains("  answer"));
    }
}
