//! Integration tests for the RocksDB edit journal behind the change tracker.
//!
//! Verifies:
//! - Sessions and edits written through the tracker survive a reopen
//! - A restored tracker keeps the last-write-wins baseline and sequence
//! - Submitted status written by `mark_published` is restored
//! - Active sessions resume instead of being recreated

use std::sync::Arc;

use glossa_collab::storage::{JournalConfig, RocksJournal};
use glossa_core::changes::{ChangeFilter, ChangeTracker, EditOutcome};
use glossa_core::model::{CatalogLocator, EditRecord, Identity};
use glossa_core::publish::PublicationHandle;

fn fr() -> CatalogLocator {
    CatalogLocator::new("app", "fr")
}

fn open(dir: &tempfile::TempDir) -> Arc<RocksJournal> {
    Arc::new(RocksJournal::open(JournalConfig::for_testing(dir.path())).unwrap())
}

fn recorded(outcome: EditOutcome) -> EditRecord {
    match outcome {
        EditOutcome::Recorded(record) => record,
        EditOutcome::Unchanged => panic!("expected a recorded edit"),
    }
}

// ─── Restore ────────────────────────────────────────────────────────

#[test]
fn test_tracker_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (session_a, last_sequence) = {
        let tracker = ChangeTracker::with_journal(open(&dir));
        let a = tracker.open_session(&Identity::new("a", "Ana"), &fr()).unwrap();
        let b = tracker.open_session(&Identity::new("b", "Bo"), &fr()).unwrap();
        tracker.record_edit(a.session_id, "greeting", "Hello", Some("")).unwrap();
        let last = recorded(tracker.record_edit(b.session_id, "greeting", "Hola", None).unwrap());
        (a.session_id, last.sequence)
    };

    let tracker = ChangeTracker::restore(open(&dir)).unwrap();
    assert_eq!(tracker.sessions().len(), 2);

    let history = tracker.history(&fr(), "greeting");
    assert_eq!(history.len(), 2);
    assert_eq!(
        (history[0].previous_value.as_str(), history[0].new_value.as_str()),
        ("", "Hello")
    );
    assert_eq!(
        (history[1].previous_value.as_str(), history[1].new_value.as_str()),
        ("Hello", "Hola")
    );

    let batch = tracker.pending_changes(&ChangeFilter::default());
    assert_eq!(batch.len(), 1);
    assert_eq!(batch.groups[0].changes[0].new_value, "Hola");

    // Baseline and sequence carry over.
    let next = recorded(tracker.record_edit(session_a, "greeting", "Salut", None).unwrap());
    assert_eq!(next.previous_value, "Hola");
    assert!(next.sequence > last_sequence);
}

#[test]
fn test_resubmission_after_restore_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let session_id = {
        let tracker = ChangeTracker::with_journal(open(&dir));
        let s = tracker.open_session(&Identity::new("a", "Ana"), &fr()).unwrap();
        tracker.record_edit(s.session_id, "greeting", "Hello", Some("")).unwrap();
        s.session_id
    };

    let tracker = ChangeTracker::restore(open(&dir)).unwrap();
    let outcome = tracker.record_edit(session_id, "greeting", "Hello", None).unwrap();
    assert_eq!(outcome, EditOutcome::Unchanged);
    assert_eq!(tracker.history(&fr(), "greeting").len(), 1);
}

#[test]
fn test_open_session_resumes_restored_session() {
    let dir = tempfile::tempdir().unwrap();
    let original = {
        let tracker = ChangeTracker::with_journal(open(&dir));
        tracker.open_session(&Identity::new("a", "Ana"), &fr()).unwrap()
    };

    let tracker = ChangeTracker::restore(open(&dir)).unwrap();
    let resumed = tracker.open_session(&Identity::new("a", "Ana"), &fr()).unwrap();
    assert_eq!(resumed.session_id, original.session_id);
    assert!(resumed.last_active_at >= original.last_active_at);
}

// ─── Publication ────────────────────────────────────────────────────

#[test]
fn test_submitted_status_is_durable() {
    let dir = tempfile::tempdir().unwrap();
    let handle = PublicationHandle {
        publication_url: "file:///tmp/app/fr.po".into(),
        publication_id: "pub-1".into(),
    };
    {
        let tracker = ChangeTracker::with_journal(open(&dir));
        let s = tracker.open_session(&Identity::new("a", "Ana"), &fr()).unwrap();
        tracker.record_edit(s.session_id, "greeting", "Hello", Some("")).unwrap();
        tracker.record_edit(s.session_id, "farewell", "Bye", Some("")).unwrap();

        let batch = tracker.pending_changes(&ChangeFilter::default());
        assert_eq!(tracker.mark_published(&batch.change_ids(), &handle).unwrap(), 2);
    }

    let tracker = ChangeTracker::restore(open(&dir)).unwrap();
    assert!(tracker.pending_changes(&ChangeFilter::default()).is_empty());
    let history = tracker.history(&fr(), "greeting");
    assert!(!history[0].is_pending());

    let ids: Vec<_> = history.iter().map(|r| r.id).collect();
    assert_eq!(tracker.mark_published(&ids, &handle).unwrap(), 0);
}
