//! Per-session edit tracking.
//!
//! Every accepted save becomes an immutable [`EditRecord`] in the log of the
//! session that made it. Pending records are folded per key into a
//! [`PendingChangeBatch`] for publication; publication flips their status to
//! `submitted`, the only mutation a record ever sees.
//!
//! ```text
//!   record_edit ──▶ session shard (append) ──▶ key index (last value)
//!                                │
//!   pending_changes ◀────────────┘  fold by (catalog, language, key)
//!        │
//!        ▼
//!   Publisher ──▶ mark_published (all shards, one batch lock)
//! ```
//!
//! Lock order: `active` → `sessions` → session shard → key index.
//! `mark_published` takes `publish_lock` and then every shard in
//! session-id order; it never touches a key index.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::error::{GlossaError, Result};
use crate::journal::EditJournal;
use crate::model::{
    now_millis, CatalogEntry, CatalogLocator, EditRecord, EditStatus, Identity, WorkingSession,
    CONTEXT_SEPARATOR,
};
use crate::publish::{
    LanguageChanges, PendingChange, PendingChangeBatch, PublicationHandle, PublicationOutcome,
    Publisher,
};
use crate::store::CatalogStore;

struct SessionLog {
    session: WorkingSession,
    records: Vec<EditRecord>,
}

/// Most recent save of one key.
#[derive(Debug, Clone)]
struct LastSave {
    value: String,
    previous: String,
}

/// Last save per key of one catalog.
type KeyIndex = HashMap<String, LastSave>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Source text of a key (the part after the context separator).
fn original_text_of(key: &str) -> &str {
    key.split_once(CONTEXT_SEPARATOR)
        .map(|(_, original)| original)
        .unwrap_or(key)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    Recorded(EditRecord),
    /// The value already equals the last recorded one; nothing appended.
    Unchanged,
}

/// Selects pending changes. `user_id` keeps keys that user touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeFilter {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub catalog: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReport {
    pub outcome: PublicationOutcome,
    pub batch: PendingChangeBatch,
    /// Records moved to `submitted`.
    pub submitted: usize,
}

pub struct ChangeTracker {
    sessions: RwLock<HashMap<Uuid, Arc<Mutex<SessionLog>>>>,
    /// Active session per (user, catalog/language).
    active: Mutex<HashMap<(String, CatalogLocator), Uuid>>,
    latest: RwLock<HashMap<CatalogLocator, Arc<Mutex<KeyIndex>>>>,
    sequence: AtomicU64,
    publish_lock: Mutex<()>,
    journal: Option<Arc<dyn EditJournal>>,
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeTracker {
    /// In-memory tracker.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            latest: RwLock::new(HashMap::new()),
            sequence: AtomicU64::new(0),
            publish_lock: Mutex::new(()),
            journal: None,
        }
    }

    pub fn with_journal(journal: Arc<dyn EditJournal>) -> Self {
        Self {
            journal: Some(journal),
            ..Self::new()
        }
    }

    /// Rebuild a tracker from everything the journal holds.
    pub fn restore(journal: Arc<dyn EditJournal>) -> Result<Self> {
        let snapshot = journal.load()?;
        let tracker = Self::with_journal(journal);

        let mut sessions = snapshot.sessions;
        sessions.sort_by_key(|s| s.started_at);
        let mut records = snapshot.records;
        records.sort_by_key(|r| r.sequence);

        {
            let mut shards = write(&tracker.sessions);
            let mut active = lock(&tracker.active);
            let mut latest = write(&tracker.latest);

            for session in sessions {
                active.insert((session.user_id.clone(), session.locator()), session.session_id);
                shards.insert(
                    session.session_id,
                    Arc::new(Mutex::new(SessionLog {
                        session,
                        records: Vec::new(),
                    })),
                );
            }

            let restored = records.len();
            let mut next_sequence = 0;
            for record in records {
                let shard = shards.get(&record.session_id).ok_or_else(|| {
                    GlossaError::Journal(format!(
                        "record {} references unknown session {}",
                        record.id, record.session_id
                    ))
                })?;
                let mut log = lock(shard);
                log.session.last_active_at = log.session.last_active_at.max(record.timestamp);

                let index = latest.entry(record.locator()).or_default().clone();
                lock(&index).insert(
                    record.key.clone(),
                    LastSave {
                        value: record.new_value.clone(),
                        previous: record.previous_value.clone(),
                    },
                );

                next_sequence = next_sequence.max(record.sequence + 1);
                log.records.push(record);
            }
            tracker.sequence.store(next_sequence, Ordering::SeqCst);

            log::info!(
                "restored {} sessions with {} edits from journal",
                shards.len(),
                restored
            );
        }
        Ok(tracker)
    }

    fn journal_write(&self, op: impl FnOnce(&dyn EditJournal) -> Result<()>) -> Result<()> {
        if let Some(journal) = &self.journal {
            op(journal.as_ref()).inspect_err(|e| log::error!("journal write failed: {}", e))?;
        }
        Ok(())
    }

    fn shard(&self, session_id: Uuid) -> Result<Arc<Mutex<SessionLog>>> {
        read(&self.sessions)
            .get(&session_id)
            .cloned()
            .ok_or_else(|| GlossaError::NotFound(format!("session {session_id}")))
    }

    fn key_index(&self, locator: &CatalogLocator) -> Arc<Mutex<KeyIndex>> {
        if let Some(index) = read(&self.latest).get(locator) {
            return index.clone();
        }
        write(&self.latest).entry(locator.clone()).or_default().clone()
    }

    fn shards(&self) -> Vec<Arc<Mutex<SessionLog>>> {
        read(&self.sessions).values().cloned().collect()
    }

    // ─── Sessions ───────────────────────────────────────────────────

    /// Return the caller's active session for this catalog, creating it on
    /// first access.
    pub fn open_session(
        &self,
        identity: &Identity,
        locator: &CatalogLocator,
    ) -> Result<WorkingSession> {
        identity.validate()?;
        locator.validate()?;

        let slot = (identity.user_id.clone(), locator.clone());
        let mut active = lock(&self.active);
        if let Some(existing) = active.get(&slot).copied() {
            drop(active);
            return self.touch(existing);
        }

        let now = now_millis();
        let session = WorkingSession {
            session_id: Uuid::new_v4(),
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
            catalog: locator.catalog.clone(),
            language: locator.language.clone(),
            started_at: now,
            last_active_at: now,
        };
        self.journal_write(|j| j.save_session(&session))?;

        write(&self.sessions).insert(
            session.session_id,
            Arc::new(Mutex::new(SessionLog {
                session: session.clone(),
                records: Vec::new(),
            })),
        );
        active.insert(slot, session.session_id);
        log::info!(
            "session {} opened for {} on {}",
            session.session_id,
            session.user_id,
            locator
        );
        Ok(session)
    }

    /// Heartbeat bump of `last_active_at`.
    pub fn touch(&self, session_id: Uuid) -> Result<WorkingSession> {
        let shard = self.shard(session_id)?;
        let mut log = lock(&shard);
        let mut updated = log.session.clone();
        updated.last_active_at = updated.last_active_at.max(now_millis());
        self.journal_write(|j| j.save_session(&updated))?;
        log.session = updated.clone();
        Ok(updated)
    }

    pub fn session(&self, session_id: Uuid) -> Option<WorkingSession> {
        let shard = self.shard(session_id).ok()?;
        let log = lock(&shard);
        Some(log.session.clone())
    }

    pub fn sessions(&self) -> Vec<WorkingSession> {
        let mut sessions: Vec<WorkingSession> = self
            .shards()
            .iter()
            .map(|shard| lock(shard).session.clone())
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    // ─── Edits ──────────────────────────────────────────────────────

    /// Append an edit to the session's log.
    ///
    /// The baseline is the last value recorded for the key by any session;
    /// `previous_value` is only consulted when the key has no record yet.
    /// A value equal to the baseline appends nothing, which makes
    /// re-submissions idempotent.
    pub fn record_edit(
        &self,
        session_id: Uuid,
        key: &str,
        new_value: &str,
        previous_value: Option<&str>,
    ) -> Result<EditOutcome> {
        if key.is_empty() {
            return Err(GlossaError::validation("key is required"));
        }
        let shard = self.shard(session_id)?;
        let mut log = lock(&shard);
        let locator = log.session.locator();
        let index = self.key_index(&locator);
        let mut index = lock(&index);

        let baseline = match (index.get(key).map(|save| &save.value), previous_value) {
            (Some(known), Some(claimed)) if known != claimed => {
                log::debug!("ignoring stale baseline for '{}' in {}", key, locator);
                known.clone()
            }
            (Some(known), _) => known.clone(),
            (None, Some(claimed)) => claimed.to_string(),
            (None, None) => String::new(),
        };

        let now = now_millis();
        if new_value == baseline {
            log.session.last_active_at = log.session.last_active_at.max(now);
            return Ok(EditOutcome::Unchanged);
        }

        let record = EditRecord {
            id: Uuid::new_v4(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            session_id,
            user_id: log.session.user_id.clone(),
            catalog: locator.catalog.clone(),
            language: locator.language.clone(),
            key: key.to_string(),
            previous_value: baseline,
            new_value: new_value.to_string(),
            timestamp: now,
            status: EditStatus::Pending,
        };
        self.journal_write(|j| j.append_edit(&record))?;

        index.insert(
            key.to_string(),
            LastSave {
                value: record.new_value.clone(),
                previous: record.previous_value.clone(),
            },
        );
        log.records.push(record.clone());
        log.session.last_active_at = log.session.last_active_at.max(now);
        log::debug!(
            "recorded edit #{} on '{}' in {} by {}",
            record.sequence,
            key,
            locator,
            record.user_id
        );
        Ok(EditOutcome::Recorded(record))
    }

    /// Record an edit of an entry served by `store`.
    ///
    /// For a key no session has saved yet, the store's current value is the
    /// baseline; the client's view of the previous value is not consulted.
    /// A key the catalog does not contain is rejected.
    pub async fn record_catalog_edit(
        &self,
        store: &CatalogStore,
        session_id: Uuid,
        key: &str,
        new_value: &str,
    ) -> Result<EditOutcome> {
        if key.is_empty() {
            return Err(GlossaError::validation("key is required"));
        }
        let locator = self
            .session(session_id)
            .ok_or_else(|| GlossaError::NotFound(format!("session {session_id}")))?
            .locator();

        let stored = match self.last_recorded(&locator, key) {
            Some(_) => None,
            None => {
                let entry = store
                    .find(&locator, key)
                    .await?
                    .ok_or_else(|| GlossaError::NotFound(format!("key '{key}' in {locator}")))?;
                Some(entry.current_text)
            }
        };
        // A save by another session between the lookup and this call wins
        // over the stored value inside `record_edit`.
        self.record_edit(session_id, key, new_value, stored.as_deref())
    }

    /// Value of the most recent save of a key, if any session saved it.
    pub fn last_recorded(&self, locator: &CatalogLocator, key: &str) -> Option<String> {
        let index = read(&self.latest).get(locator).cloned()?;
        let index = lock(&index);
        index.get(key).map(|save| save.value.clone())
    }

    /// Apply recorded saves to entries read from the store: `current_text`
    /// becomes the latest saved value and `previous_text` the value it
    /// replaced. Entries nobody saved are left alone.
    pub fn overlay(&self, locator: &CatalogLocator, entries: &mut [CatalogEntry]) {
        let Some(index) = read(&self.latest).get(locator).cloned() else {
            return;
        };
        let index = lock(&index);
        for entry in entries {
            if let Some(save) = index.get(&entry.key) {
                entry.current_text = save.value.clone();
                entry.previous_text = Some(save.previous.clone());
            }
        }
    }

    /// Full audit trail of one key, in acceptance order.
    pub fn history(&self, locator: &CatalogLocator, key: &str) -> Vec<EditRecord> {
        let mut records: Vec<EditRecord> = self
            .shards()
            .iter()
            .flat_map(|shard| {
                let log = lock(shard);
                if log.session.locator() != *locator {
                    return Vec::new();
                }
                log.records.iter().filter(|r| r.key == key).cloned().collect()
            })
            .collect();
        records.sort_by_key(|r| r.sequence);
        records
    }

    // ─── Publication ────────────────────────────────────────────────

    /// Fold pending records into one net change per key.
    ///
    /// A key whose latest value equals its value before the first pending
    /// edit has no net change and is left out.
    pub fn pending_changes(&self, filter: &ChangeFilter) -> PendingChangeBatch {
        let mut pending: Vec<EditRecord> = Vec::new();
        for shard in self.shards() {
            let log = lock(&shard);
            if filter
                .catalog
                .as_deref()
                .is_some_and(|c| c != log.session.catalog)
            {
                continue;
            }
            pending.extend(log.records.iter().filter(|r| r.is_pending()).cloned());
        }
        pending.sort_by_key(|r| r.sequence);

        // Chains per key, in order of first pending edit.
        let mut chains: BTreeMap<CatalogLocator, Vec<Vec<EditRecord>>> = BTreeMap::new();
        let mut positions: HashMap<(CatalogLocator, String), usize> = HashMap::new();
        for record in pending {
            let locator = record.locator();
            let slot = chains.entry(locator.clone()).or_default();
            match positions.get(&(locator.clone(), record.key.clone())) {
                Some(&at) => slot[at].push(record),
                None => {
                    positions.insert((locator, record.key.clone()), slot.len());
                    slot.push(vec![record]);
                }
            }
        }

        let mut batch = PendingChangeBatch::default();
        for (locator, key_chains) in chains {
            let changes: Vec<PendingChange> = key_chains
                .into_iter()
                .filter_map(|chain| {
                    let first = chain.first()?;
                    let last = chain.last()?;
                    if last.new_value == first.previous_value {
                        return None;
                    }
                    if let Some(user) = filter.user_id.as_deref() {
                        if !chain.iter().any(|r| r.user_id == user) {
                            return None;
                        }
                    }
                    Some(PendingChange {
                        key: last.key.clone(),
                        original_text: original_text_of(&last.key).to_string(),
                        previous_value: first.previous_value.clone(),
                        new_value: last.new_value.clone(),
                        author: last.user_id.clone(),
                        change_ids: chain.iter().map(|r| r.id).collect(),
                    })
                })
                .collect();
            if !changes.is_empty() {
                batch.groups.push(LanguageChanges {
                    path: locator.relative_path(),
                    catalog: locator.catalog,
                    language: locator.language,
                    changes,
                });
            }
        }
        batch
    }

    /// Move the given records to `submitted`.
    ///
    /// All ids must exist or nothing changes. Records already submitted are
    /// skipped, so repeating a call is a no-op. Returns how many records
    /// changed status.
    pub fn mark_published(&self, change_ids: &[Uuid], handle: &PublicationHandle) -> Result<usize> {
        let _batch = lock(&self.publish_lock);

        let mut shards: Vec<(Uuid, Arc<Mutex<SessionLog>>)> = read(&self.sessions)
            .iter()
            .map(|(id, shard)| (*id, shard.clone()))
            .collect();
        shards.sort_by_key(|(id, _)| *id);
        let mut logs: Vec<MutexGuard<'_, SessionLog>> =
            shards.iter().map(|(_, shard)| lock(shard)).collect();

        let wanted: HashSet<Uuid> = change_ids.iter().copied().collect();
        let mut seen = HashSet::with_capacity(wanted.len());
        let mut updates: Vec<(usize, usize)> = Vec::new();
        for (shard_at, log) in logs.iter().enumerate() {
            for (record_at, record) in log.records.iter().enumerate() {
                if wanted.contains(&record.id) {
                    seen.insert(record.id);
                    if record.is_pending() {
                        updates.push((shard_at, record_at));
                    }
                }
            }
        }
        if let Some(missing) = wanted.difference(&seen).next() {
            return Err(GlossaError::NotFound(format!("change {missing}")));
        }
        if updates.is_empty() {
            return Ok(0);
        }

        let status = EditStatus::Submitted {
            publication_id: handle.publication_id.clone(),
        };
        let updated: Vec<EditRecord> = updates
            .iter()
            .map(|&(shard_at, record_at)| {
                let mut record = logs[shard_at].records[record_at].clone();
                record.status = status.clone();
                record
            })
            .collect();
        self.journal_write(|j| j.mark_submitted(&updated))?;

        let count = updated.len();
        for (&(shard_at, record_at), record) in updates.iter().zip(updated) {
            logs[shard_at].records[record_at] = record;
        }
        log::info!(
            "marked {} records submitted under publication {}",
            count,
            handle.publication_id
        );
        Ok(count)
    }

    /// Fold, hand off, and mark on success.
    pub async fn publish(
        &self,
        filter: &ChangeFilter,
        publisher: &dyn Publisher,
    ) -> Result<PublishReport> {
        let batch = self.pending_changes(filter);
        if batch.is_empty() {
            return Err(GlossaError::validation("no pending changes to publish"));
        }

        let outcome = publisher.publish(&batch).await?;
        let submitted = match outcome.handle() {
            Some(handle) => self.mark_published(&batch.change_ids(), handle)?,
            None => {
                log::info!("publication of {} changes deferred", batch.len());
                0
            }
        };
        Ok(PublishReport {
            outcome,
            batch,
            submitted,
        })
    }
}
