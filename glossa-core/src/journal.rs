//! Persistence seam for the change tracker.

use crate::error::Result;
use crate::model::{EditRecord, WorkingSession};

/// Everything needed to rebuild a tracker after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JournalSnapshot {
    pub sessions: Vec<WorkingSession>,
    pub records: Vec<EditRecord>,
}

/// Durable log of sessions and edit records.
///
/// The tracker writes here before touching its in-memory state, so a
/// failed write leaves both sides unchanged.
pub trait EditJournal: Send + Sync {
    fn save_session(&self, session: &WorkingSession) -> Result<()>;

    fn append_edit(&self, record: &EditRecord) -> Result<()>;

    /// Store the new status of every record in one atomic write.
    fn mark_submitted(&self, records: &[EditRecord]) -> Result<()>;

    fn load(&self) -> Result<JournalSnapshot>;
}
