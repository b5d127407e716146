//! Persistent storage for the change tracker.
//!
//! ```text
//! ┌───────────────┐  sessions, edits   ┌──────────────┐
//! │ ChangeTracker │ ─────────────────► │ RocksJournal │
//! │ (in-memory)   │                    │ (RocksDB)    │
//! └──────┬────────┘                    └──────┬───────┘
//!        │                                    │
//!        │ on startup                         │ column families
//!        ▼                                    ▼
//! ┌───────────────┐        ┌──────────────────────────────────┐
//! │ restore()     │ ◄───── │ CF "sessions" — working sessions │
//! └───────────────┘        │ CF "edits"    — edit records     │
//!                          └──────────────────────────────────┘
//! ```

pub mod rocks;

pub use rocks::{JournalConfig, RocksJournal, StoreError};
