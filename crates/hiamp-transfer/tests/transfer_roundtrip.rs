// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cross-HQ transfer scenarios: round-trip, tampering, chains, quarantine.

use hiamp_config::Settings;
use hiamp_config::paths::HqPaths;
use hiamp_events::{DomainEvent, EventBus};
use hiamp_integrity::verify::IssueKind;
use hiamp_transfer::export::{KnowledgeExport, export_knowledge};
use hiamp_transfer::import::{preview, quarantine, record_integration, reject, stage};
use hiamp_transfer::{Direction, TransferEvent, TransferLog};
use std::path::Path;
use std::sync::{Arc, Mutex};

struct Hq {
    root: tempfile::TempDir,
    log: TransferLog,
}

impl Hq {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let log = TransferLog::new(root.path().join("workspace/world/log"));
        Self { root, log }
    }

    fn paths(&self) -> HqPaths {
        HqPaths::new(self.root.path(), &Settings::default())
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.root.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }
}

fn export_request(sequence: Option<u32>, supersedes: Option<String>) -> KnowledgeExport {
    KnowledgeExport {
        paths: vec!["knowledge/testing/e2e-patterns.md".into()],
        domain: "testing".into(),
        to_peer: "alex".into(),
        owner: "stefan".into(),
        instance_id: "stefan-hq-primary".into(),
        transport: "slack".into(),
        description: Some("hard-won e2e patterns".into()),
        supersedes,
        sequence,
    }
}

fn sha256_of(path: &Path) -> String {
    hiamp_integrity::hash_file(path).unwrap()
}

// -- Scenario 5: round-trip knowledge transfer --------------------------------

#[test]
fn knowledge_round_trip_between_two_hqs() {
    let hq_a = Hq::new();
    let hq_b = Hq::new();
    hq_a.write("knowledge/testing/e2e-patterns.md", "# E2E\nalways retry twice\n");

    // HQ-A exports.
    let outbox = hq_a.root.path().join("workspace/world/outbox");
    let summary =
        export_knowledge(hq_a.root.path(), &outbox, &export_request(None, None), &hq_a.log)
            .unwrap();

    // HQ-B previews: clean verification, no conflicts.
    let view = preview(&summary.bundle_path, hq_b.root.path(), &hq_b.log).unwrap();
    assert!(view.verification.valid);
    assert!(view.conflicts.is_empty());
    assert!(view.summary.contains("knowledge bundle"));
    assert!(view.summary.contains("from stefan"));

    // HQ-B stages.
    let bus = EventBus::new();
    let staged = stage(&summary.bundle_path, &hq_b.paths(), &hq_b.log, &bus, "alex").unwrap();
    let staged_file = Path::new(&staged.staged_to).join("payload/knowledge/testing/e2e-patterns.md");
    assert!(staged.staged_to.contains("workspace/world/inbox/stefan/knowledge/"));
    assert_eq!(
        sha256_of(&staged_file),
        sha256_of(&hq_a.root.path().join("knowledge/testing/e2e-patterns.md"))
    );

    // Logs: sent on A; received + approved on B.
    let a_entries = hq_a.log.entries_for(&summary.transfer_id).unwrap();
    assert_eq!(a_entries.len(), 1);
    assert_eq!(a_entries[0].event, TransferEvent::Sent);
    assert_eq!(a_entries[0].direction, Direction::Outbound);

    let b_events: Vec<TransferEvent> = hq_b
        .log
        .entries_for(&summary.transfer_id)
        .unwrap()
        .iter()
        .map(|e| e.event)
        .collect();
    assert_eq!(b_events, vec![TransferEvent::Received, TransferEvent::Approved]);
}

#[test]
fn staging_emits_a_transfer_staged_event() {
    let hq_a = Hq::new();
    let hq_b = Hq::new();
    hq_a.write("knowledge/testing/e2e-patterns.md", "content\n");
    let outbox = hq_a.root.path().join("outbox");
    let summary =
        export_knowledge(hq_a.root.path(), &outbox, &export_request(None, None), &hq_a.log)
            .unwrap();

    let bus = EventBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    bus.subscribe("test", move |e: &DomainEvent| sink.lock().unwrap().push(e.feed_line()));
    stage(&summary.bundle_path, &hq_b.paths(), &hq_b.log, &bus, "alex").unwrap();

    let lines = seen.lock().unwrap();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(r#""event":"transfer-staged""#));
    assert!(lines[0].contains(&summary.transfer_id));
}

// -- Scenario 6: tampered bundle ----------------------------------------------

#[test]
fn tampered_bundle_fails_preview_and_staging() {
    let hq_a = Hq::new();
    let hq_b = Hq::new();
    hq_a.write("knowledge/testing/e2e-patterns.md", "original content\n");
    let outbox = hq_a.root.path().join("outbox");
    let summary =
        export_knowledge(hq_a.root.path(), &outbox, &export_request(None, None), &hq_a.log)
            .unwrap();

    std::fs::write(
        summary.bundle_path.join("payload/knowledge/testing/e2e-patterns.md"),
        "maliciously rewritten",
    )
    .unwrap();

    let view = preview(&summary.bundle_path, hq_b.root.path(), &hq_b.log).unwrap();
    assert!(!view.verification.valid);
    assert!(view.verification.kinds().contains(&IssueKind::HashMismatch));
    assert!(
        view.verification
            .errors
            .iter()
            .any(|e| e.path.as_deref() == Some("payload/knowledge/testing/e2e-patterns.md"))
    );
    assert!(view.summary.contains("integrity FAILED"));

    let bus = EventBus::new();
    let err = stage(&summary.bundle_path, &hq_b.paths(), &hq_b.log, &bus, "alex").unwrap_err();
    assert_eq!(err.code().as_str(), "ERR_TXFR_INTEGRITY");
}

#[test]
fn quarantine_moves_the_bundle_and_logs_the_errors() {
    let hq_a = Hq::new();
    let hq_b = Hq::new();
    hq_a.write("knowledge/testing/e2e-patterns.md", "original content\n");
    let outbox = hq_a.root.path().join("outbox");
    let summary =
        export_knowledge(hq_a.root.path(), &outbox, &export_request(None, None), &hq_a.log)
            .unwrap();
    std::fs::write(
        summary.bundle_path.join("payload/knowledge/testing/e2e-patterns.md"),
        "tampered",
    )
    .unwrap();

    let view = preview(&summary.bundle_path, hq_b.root.path(), &hq_b.log).unwrap();
    let outcome =
        quarantine(&summary.bundle_path, &hq_b.paths(), &hq_b.log, &view.verification).unwrap();

    // Moved, not copied.
    assert!(!summary.bundle_path.exists());
    assert!(Path::new(&outcome.staged_to).join("envelope.yaml").exists());
    assert!(outcome.staged_to.contains("workspace/world/quarantine/"));

    let entries = hq_b.log.entries_for(&summary.transfer_id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event, TransferEvent::Quarantined);
    assert_eq!(entries[0].error_code.as_deref(), Some("ERR_TXFR_INTEGRITY"));
    assert!(entries[0].error_detail.as_deref().unwrap().contains("HASH_MISMATCH"));
}

// -- Scenario 7: chain transfer ----------------------------------------------

#[test]
fn superseding_export_surfaces_in_the_preview_summary() {
    let hq_a = Hq::new();
    let hq_b = Hq::new();
    hq_a.write("knowledge/testing/e2e-patterns.md", "v1 content\n");
    let outbox = hq_a.root.path().join("outbox");

    let first =
        export_knowledge(hq_a.root.path(), &outbox, &export_request(None, None), &hq_a.log)
            .unwrap();
    assert_eq!(first.envelope.sequence, 1);
    assert_eq!(first.envelope.supersedes, None);

    hq_a.write("knowledge/testing/e2e-patterns.md", "v2 content, improved\n");
    let second = export_knowledge(
        hq_a.root.path(),
        &outbox,
        &export_request(Some(2), Some(first.transfer_id.clone())),
        &hq_a.log,
    )
    .unwrap();
    assert_eq!(second.envelope.sequence, 2);
    assert_eq!(second.envelope.supersedes.as_deref(), Some(first.transfer_id.as_str()));

    let view = preview(&second.bundle_path, hq_b.root.path(), &hq_b.log).unwrap();
    assert!(view.summary.contains("sequence 2"));
    assert!(view.summary.contains("supersedes"));
    assert!(view.summary.contains(&first.transfer_id));
}

// -- Conflict detection -------------------------------------------------------

#[test]
fn local_divergence_is_reported_as_a_conflict() {
    let hq_a = Hq::new();
    let hq_b = Hq::new();
    hq_a.write("knowledge/testing/e2e-patterns.md", "incoming version\n");
    hq_b.write("knowledge/testing/e2e-patterns.md", "local version, different\n");

    let outbox = hq_a.root.path().join("outbox");
    let summary =
        export_knowledge(hq_a.root.path(), &outbox, &export_request(None, None), &hq_a.log)
            .unwrap();

    let view = preview(&summary.bundle_path, hq_b.root.path(), &hq_b.log).unwrap();
    assert!(view.verification.valid);
    assert_eq!(view.conflicts.len(), 1);
    assert_eq!(view.conflicts[0].local_path, "knowledge/testing/e2e-patterns.md");
    assert_eq!(view.conflicts[0].description, "local differs from incoming");
    assert!(view.summary.contains("1 conflict(s)"));
}

#[test]
fn identical_local_content_is_not_a_conflict() {
    let hq_a = Hq::new();
    let hq_b = Hq::new();
    hq_a.write("knowledge/testing/e2e-patterns.md", "same bytes\n");
    hq_b.write("knowledge/testing/e2e-patterns.md", "same bytes\n");

    let outbox = hq_a.root.path().join("outbox");
    let summary =
        export_knowledge(hq_a.root.path(), &outbox, &export_request(None, None), &hq_a.log)
            .unwrap();
    let view = preview(&summary.bundle_path, hq_b.root.path(), &hq_b.log).unwrap();
    assert!(view.conflicts.is_empty());
}

#[test]
fn modification_after_integration_is_flagged() {
    let hq_a = Hq::new();
    let hq_b = Hq::new();
    hq_a.write("knowledge/testing/e2e-patterns.md", "shared content\n");
    hq_b.write("knowledge/testing/e2e-patterns.md", "shared content\n");

    let outbox = hq_a.root.path().join("outbox");
    let first =
        export_knowledge(hq_a.root.path(), &outbox, &export_request(None, None), &hq_a.log)
            .unwrap();

    // HQ-B integrates the first transfer, then edits the file locally.
    let bus = EventBus::new();
    record_integration(
        &first.envelope,
        "knowledge/testing/e2e-patterns.md",
        hq_b.root.path(),
        &hq_b.log,
        &bus,
    )
    .unwrap();
    hq_b.write("knowledge/testing/e2e-patterns.md", "shared content\nplus local edits\n");

    // A re-share of the same path now reports both conflict kinds.
    hq_a.write("knowledge/testing/e2e-patterns.md", "updated upstream\n");
    let second = export_knowledge(
        hq_a.root.path(),
        &outbox,
        &export_request(Some(2), Some(first.transfer_id.clone())),
        &hq_a.log,
    )
    .unwrap();
    let view = preview(&second.bundle_path, hq_b.root.path(), &hq_b.log).unwrap();

    let descriptions: Vec<&str> =
        view.conflicts.iter().map(|c| c.description.as_str()).collect();
    assert!(descriptions.contains(&"local differs from incoming"));
    assert!(descriptions.contains(&"modified since integration"));
}

// -- Rejection ----------------------------------------------------------------

#[test]
fn rejection_only_writes_a_log_entry() {
    let hq_a = Hq::new();
    let hq_b = Hq::new();
    hq_a.write("knowledge/testing/e2e-patterns.md", "content\n");
    let outbox = hq_a.root.path().join("outbox");
    let summary =
        export_knowledge(hq_a.root.path(), &outbox, &export_request(None, None), &hq_a.log)
            .unwrap();

    reject(&summary.envelope, "not relevant to this HQ", &hq_b.log).unwrap();

    let entries = hq_b.log.entries_for(&summary.transfer_id).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].event, TransferEvent::Rejected);
    assert_eq!(entries[0].error_detail.as_deref(), Some("not relevant to this HQ"));
    // Nothing staged.
    assert!(!hq_b.paths().world_inbox().exists());
}
