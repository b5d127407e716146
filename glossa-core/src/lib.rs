//! Glossa core: translation catalog model, streaming codec, paginated
//! store, and change tracking.
//!
//! Transport (presence rooms, HTTP) lives in `glossa-collab` and
//! `glossa-server`; this crate has no network code.

pub mod cache;
pub mod changes;
pub mod codec;
pub mod error;
pub mod journal;
pub mod model;
pub mod publish;
pub mod source;
pub mod store;
pub mod stream;

pub use changes::{ChangeFilter, ChangeTracker, EditOutcome, PublishReport};
pub use codec::{parse_catalog, parse_entries, serialize_entries, try_serialize_entries, StreamingParser};
pub use error::{GlossaError, Result};
pub use journal::{EditJournal, JournalSnapshot};
pub use model::{
    CatalogEntry, CatalogHeader, CatalogLocator, EditRecord, EditStatus, Identity, LanguageInfo,
    WorkingSession,
};
pub use publish::{
    DeferredPublisher, FilePublisher, PendingChangeBatch, PublicationHandle, PublicationOutcome,
    Publisher,
};
pub use source::{ChunkSource, FileSource, MemorySource};
pub use store::{CatalogStore, Page, PageQuery, StoreConfig};
