//! RocksDB-backed edit journal.
//!
//! Column families:
//! - `sessions` — working sessions, keyed by session id (16 bytes)
//! - `edits`    — edit records, keyed by tracker sequence (8 bytes big-endian)
//!
//! Values are bincode-encoded with the standard config. Iterating `edits`
//! from the start yields records in the order the tracker accepted them.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use glossa_core::journal::{EditJournal, JournalSnapshot};
use glossa_core::model::{EditRecord, WorkingSession};
use glossa_core::GlossaError;

const CF_SESSIONS: &str = "sessions";
const CF_EDITS: &str = "edits";

const COLUMN_FAMILIES: &[&str] = &[CF_SESSIONS, CF_EDITS];

/// Journal configuration.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes (default: 64MB)
    pub block_cache_size: usize,
    /// Bloom filter bits per key (default: 10)
    pub bloom_filter_bits: i32,
    /// fsync every write (default: true; an acknowledged edit must survive a crash)
    pub sync_writes: bool,
    /// Max open files for RocksDB (default: 256)
    pub max_open_files: i32,
    /// Write buffer size per column family (default: 16MB)
    pub write_buffer_size: usize,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("glossa_journal"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: true,
            max_open_files: 256,
            write_buffer_size: 16 * 1024 * 1024,
        }
    }
}

impl JournalConfig {
    /// Small caches, no fsync.
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
            write_buffer_size: 4 * 1024 * 1024,
        }
    }
}

/// Journal storage errors.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<StoreError> for GlossaError {
    fn from(e: StoreError) -> Self {
        GlossaError::Journal(e.to_string())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map_err(|e| StoreError::Deserialization(e.to_string()))?;
    Ok(value)
}

/// Durable [`EditJournal`] on RocksDB.
pub struct RocksJournal {
    db: DBWithThreadMode<SingleThreaded>,
    config: JournalConfig,
}

impl RocksJournal {
    /// Open the journal, creating the database and column families if missing.
    pub fn open(config: JournalConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);
        db_opts.increase_parallelism(num_cpus());

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(name, &config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;
        log::info!("Edit journal opened at {}", config.path.display());

        Ok(Self { db, config })
    }

    pub fn open_path(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        Self::open(JournalConfig {
            path: path.into(),
            ..JournalConfig::default()
        })
    }

    fn cf_options(name: &str, config: &JournalConfig) -> Options {
        let mut opts = Options::default();

        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_compression_type(DBCompressionType::Lz4);

        match name {
            CF_SESSIONS => {
                opts.optimize_for_point_lookup(config.block_cache_size as u64);
            }
            CF_EDITS => {
                // Append-mostly, read back sequentially on restore.
                opts.set_max_write_buffer_number(4);
            }
            _ => {}
        }

        opts
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn write_options(&self) -> WriteOptions {
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }

    pub fn put_session(&self, session: &WorkingSession) -> Result<(), StoreError> {
        let cf = self.cf(CF_SESSIONS)?;
        self.db.put_cf_opt(
            cf,
            session.session_id.as_bytes(),
            encode(session)?,
            &self.write_options(),
        )?;
        Ok(())
    }

    pub fn put_edit(&self, record: &EditRecord) -> Result<(), StoreError> {
        let cf = self.cf(CF_EDITS)?;
        self.db.put_cf_opt(
            cf,
            record.sequence.to_be_bytes(),
            encode(record)?,
            &self.write_options(),
        )?;
        Ok(())
    }

    /// Overwrite a set of records in one atomic batch.
    pub fn put_edits(&self, records: &[EditRecord]) -> Result<(), StoreError> {
        let cf = self.cf(CF_EDITS)?;
        let mut batch = WriteBatch::default();
        for record in records {
            batch.put_cf(cf, record.sequence.to_be_bytes(), encode(record)?);
        }
        self.db.write_opt(batch, &self.write_options())?;
        Ok(())
    }

    pub fn sessions(&self) -> Result<Vec<WorkingSession>, StoreError> {
        self.scan(CF_SESSIONS)
    }

    /// Every record in sequence order.
    pub fn edits(&self) -> Result<Vec<EditRecord>, StoreError> {
        self.scan(CF_EDITS)
    }

    fn scan<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, StoreError> {
        let cf = self.cf(name)?;
        let mut out = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    /// Flush memtables to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        for name in COLUMN_FAMILIES {
            self.db.flush_cf(self.cf(name)?)?;
        }
        Ok(())
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("Column family '{name}' not found")))
    }
}

impl EditJournal for RocksJournal {
    fn save_session(&self, session: &WorkingSession) -> glossa_core::Result<()> {
        Ok(self.put_session(session)?)
    }

    fn append_edit(&self, record: &EditRecord) -> glossa_core::Result<()> {
        Ok(self.put_edit(record)?)
    }

    fn mark_submitted(&self, records: &[EditRecord]) -> glossa_core::Result<()> {
        Ok(self.put_edits(records)?)
    }

    fn load(&self) -> glossa_core::Result<JournalSnapshot> {
        let sessions = self.sessions()?;
        let records = self.edits()?;
        log::debug!(
            "Journal holds {} sessions and {} edits",
            sessions.len(),
            records.len()
        );
        Ok(JournalSnapshot { sessions, records })
    }
}

/// Get number of CPU cores for RocksDB parallelism.
fn num_cpus() -> i32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as i32)
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use glossa_core::model::EditStatus;
    use uuid::Uuid;

    fn session() -> WorkingSession {
        WorkingSession {
            session_id: Uuid::new_v4(),
            user_id: "u1".into(),
            display_name: "Ana".into(),
            catalog: "app".into(),
            language: "fr".into(),
            started_at: 1,
            last_active_at: 1,
        }
    }

    fn record(session: &WorkingSession, sequence: u64, new_value: &str) -> EditRecord {
        EditRecord {
            id: Uuid::new_v4(),
            sequence,
            session_id: session.session_id,
            user_id: session.user_id.clone(),
            catalog: session.catalog.clone(),
            language: session.language.clone(),
            key: "greeting".into(),
            previous_value: String::new(),
            new_value: new_value.into(),
            timestamp: sequence,
            status: EditStatus::Pending,
        }
    }

    #[test]
    fn test_open_creates_column_families() {
        let dir = tempfile::tempdir().unwrap();
        let journal = RocksJournal::open(JournalConfig::for_testing(dir.path())).unwrap();
        assert!(journal.cf(CF_SESSIONS).is_ok());
        assert!(journal.cf(CF_EDITS).is_ok());
        assert!(journal.load().unwrap().records.is_empty());
    }

    #[test]
    fn test_edits_come_back_in_sequence_order() {
        let dir = tempfile::tempdir().unwrap();
        let journal = RocksJournal::open(JournalConfig::for_testing(dir.path())).unwrap();
        let s = session();
        // 256 sorts before 3 lexicographically unless keys are big-endian.
        for seq in [256, 3, 70_000] {
            journal.put_edit(&record(&s, seq, &format!("v{seq}"))).unwrap();
        }
        let sequences: Vec<u64> = journal.edits().unwrap().iter().map(|r| r.sequence).collect();
        assert_eq!(sequences, vec![3, 256, 70_000]);
    }

    #[test]
    fn test_session_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let journal = RocksJournal::open(JournalConfig::for_testing(dir.path())).unwrap();
        let mut s = session();
        journal.save_session(&s).unwrap();
        s.last_active_at = 99;
        journal.save_session(&s).unwrap();
        let sessions = journal.sessions().unwrap();
        assert_eq!(sessions, vec![s]);
    }

    #[test]
    fn test_mark_submitted_overwrites_status() {
        let dir = tempfile::tempdir().unwrap();
        let journal = RocksJournal::open(JournalConfig::for_testing(dir.path())).unwrap();
        let s = session();
        let mut a = record(&s, 0, "Hello");
        let b = record(&s, 1, "Hola");
        journal.append_edit(&a).unwrap();
        journal.append_edit(&b).unwrap();

        a.status = EditStatus::Submitted {
            publication_id: "pub-1".into(),
        };
        journal.mark_submitted(std::slice::from_ref(&a)).unwrap();

        let records = journal.edits().unwrap();
        assert_eq!(records[0].status, a.status);
        assert!(records[1].is_pending());
    }

    #[test]
    fn test_reopen_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let s = session();
        {
            let journal = RocksJournal::open(JournalConfig::for_testing(dir.path())).unwrap();
            journal.save_session(&s).unwrap();
            journal.append_edit(&record(&s, 0, "Hello")).unwrap();
            journal.flush().unwrap();
        }
        let journal = RocksJournal::open(JournalConfig::for_testing(dir.path())).unwrap();
        let snapshot = journal.load().unwrap();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.records[0].new_value, "Hello");
    }

    #[test]
    fn test_store_error_maps_to_journal_error() {
        let err: GlossaError = StoreError::Database("disk full".into()).into();
        assert!(matches!(err, GlossaError::Journal(msg) if msg.contains("disk full")));
    }
}
