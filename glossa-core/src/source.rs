//! Chunked catalog retrieval.
//!
//! A [`ChunkSource`] hands out the raw bytes of one catalog as a stream of
//! chunks and lists the languages of a catalog from its layout alone. The
//! store never needs a whole catalog in memory.
//!
//! Layout used by [`FileSource`]:
//!
//! ```text
//! <root>/<catalog>/<language>.po
//! ```

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::AsyncReadExt;

use crate::error::{GlossaError, Result};
use crate::model::{CatalogLocator, LanguageInfo};

/// Stream of raw catalog bytes.
pub type ChunkStream = BoxStream<'static, Result<Vec<u8>>>;

/// Default chunk size for file reads (64KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

pub trait ChunkSource: Send + Sync {
    /// Stream one catalog's bytes. A failed fetch yields a single
    /// `Retrieval` error and ends the stream.
    fn open(&self, locator: &CatalogLocator) -> ChunkStream;

    /// Languages of a catalog, discovered without opening catalog files.
    fn languages(&self, catalog: &str) -> BoxFuture<'static, Result<Vec<LanguageInfo>>>;
}

fn validate_catalog_name(catalog: &str) -> Result<()> {
    CatalogLocator::new(catalog, "-").validate()
}

// ───────────────────────────────────────────────────────────────────
// Filesystem
// ───────────────────────────────────────────────────────────────────

/// Reads catalogs from a directory tree.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: PathBuf,
    chunk_size: usize,
}

enum ReadState {
    Start(PathBuf),
    Reading { file: tokio::fs::File, offset: u64 },
    Done,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_chunk_size(root, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(root: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            root: root.into(),
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    pub fn path_of(&self, locator: &CatalogLocator) -> PathBuf {
        self.root.join(&locator.catalog).join(format!("{}.po", locator.language))
    }

    async fn read_next(
        mut file: tokio::fs::File,
        offset: u64,
        chunk_size: usize,
    ) -> Option<(Result<Vec<u8>>, ReadState)> {
        let mut buf = vec![0u8; chunk_size];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((
                    Ok(buf),
                    ReadState::Reading {
                        file,
                        offset: offset + n as u64,
                    },
                ))
            }
            Err(e) => Some((Err(GlossaError::retrieval(offset, e.to_string())), ReadState::Done)),
        }
    }
}

impl ChunkSource for FileSource {
    fn open(&self, locator: &CatalogLocator) -> ChunkStream {
        if let Err(e) = locator.validate() {
            return stream::once(async move { Err(e) }).boxed();
        }
        let chunk_size = self.chunk_size;
        let path = self.path_of(locator);
        let display = locator.to_string();

        stream::unfold(ReadState::Start(path), move |state| {
            let display = display.clone();
            async move {
                match state {
                    ReadState::Start(path) => match tokio::fs::File::open(&path).await {
                        Ok(file) => Self::read_next(file, 0, chunk_size).await,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some((
                            Err(GlossaError::NotFound(format!("catalog {display}"))),
                            ReadState::Done,
                        )),
                        Err(e) => Some((
                            Err(GlossaError::retrieval(0, e.to_string())),
                            ReadState::Done,
                        )),
                    },
                    ReadState::Reading { file, offset } => {
                        Self::read_next(file, offset, chunk_size).await
                    }
                    ReadState::Done => None,
                }
            }
        })
        .boxed()
    }

    fn languages(&self, catalog: &str) -> BoxFuture<'static, Result<Vec<LanguageInfo>>> {
        let catalog = catalog.to_string();
        let dir = self.root.join(&catalog);
        Box::pin(async move {
            validate_catalog_name(&catalog)?;
            let mut read_dir = match tokio::fs::read_dir(&dir).await {
                Ok(rd) => rd,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(GlossaError::NotFound(format!("catalog {catalog}")));
                }
                Err(e) => return Err(GlossaError::retrieval(0, e.to_string())),
            };

            let mut languages = Vec::new();
            while let Some(item) = read_dir
                .next_entry()
                .await
                .map_err(|e| GlossaError::retrieval(0, e.to_string()))?
            {
                let path = item.path();
                if path.extension().and_then(|e| e.to_str()) != Some("po") {
                    continue;
                }
                if let Some(code) = path.file_stem().and_then(|s| s.to_str()) {
                    languages.push(LanguageInfo {
                        code: code.to_string(),
                        path: CatalogLocator::new(&catalog, code).relative_path(),
                    });
                }
            }
            languages.sort_by(|a, b| a.code.cmp(&b.code));
            Ok(languages)
        })
    }
}

// ───────────────────────────────────────────────────────────────────
// In-memory
// ───────────────────────────────────────────────────────────────────

/// Catalogs held in memory, served in fixed-size chunks.
///
/// `fail_after` makes every stream fail once that many chunks have been
/// delivered, which is how partial-retrieval behavior is exercised.
pub struct MemorySource {
    catalogs: RwLock<HashMap<CatalogLocator, Arc<Vec<u8>>>>,
    chunk_size: usize,
    fail_after: Option<usize>,
    opens: Arc<AtomicUsize>,
}

impl MemorySource {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            catalogs: RwLock::new(HashMap::new()),
            chunk_size: chunk_size.max(1),
            fail_after: None,
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_catalog(self, locator: CatalogLocator, text: impl Into<String>) -> Self {
        self.insert(locator, text);
        self
    }

    pub fn failing_after(mut self, chunks: usize) -> Self {
        self.fail_after = Some(chunks);
        self
    }

    pub fn insert(&self, locator: CatalogLocator, text: impl Into<String>) {
        let bytes = Arc::new(text.into().into_bytes());
        self.catalogs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator, bytes);
    }

    /// Number of streams opened so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::Relaxed)
    }
}

impl ChunkSource for MemorySource {
    fn open(&self, locator: &CatalogLocator) -> ChunkStream {
        self.opens.fetch_add(1, Ordering::Relaxed);
        let bytes = self
            .catalogs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(locator)
            .cloned();
        let Some(bytes) = bytes else {
            let missing = GlossaError::NotFound(format!("catalog {locator}"));
            return stream::once(async move { Err(missing) }).boxed();
        };

        let chunk_size = self.chunk_size;
        let fail_after = self.fail_after;
        let total = bytes.len().div_ceil(chunk_size);

        stream::iter(0..total)
            .map(move |index| {
                if fail_after.is_some_and(|limit| index >= limit) {
                    return Err(GlossaError::retrieval(
                        (index * chunk_size) as u64,
                        "injected chunk failure",
                    ));
                }
                let start = index * chunk_size;
                let end = (start + chunk_size).min(bytes.len());
                Ok(bytes[start..end].to_vec())
            })
            .scan(false, |failed, item| {
                // End the stream right after the first error.
                if *failed {
                    return futures_util::future::ready(None);
                }
                *failed = item.is_err();
                futures_util::future::ready(Some(item))
            })
            .boxed()
    }

    fn languages(&self, catalog: &str) -> BoxFuture<'static, Result<Vec<LanguageInfo>>> {
        let mut languages: Vec<LanguageInfo> = self
            .catalogs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .filter(|l| l.catalog == catalog)
            .map(|l| LanguageInfo {
                code: l.language.clone(),
                path: l.relative_path(),
            })
            .collect();
        languages.sort_by(|a, b| a.code.cmp(&b.code));
        let catalog = catalog.to_string();
        Box::pin(async move {
            if languages.is_empty() {
                return Err(GlossaError::NotFound(format!("catalog {catalog}")));
            }
            Ok(languages)
        })
    }
}
