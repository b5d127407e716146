//! Time-bounded page cache.
//!
//! Pages are keyed by (catalog, language, page, page size). An entry older
//! than the TTL is treated as absent and evicted on the next lookup.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::model::CatalogLocator;
use crate::store::Page;

/// Five minutes.
pub const DEFAULT_PAGE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub locator: CatalogLocator,
    pub page: usize,
    pub page_size: usize,
}

impl PageKey {
    pub fn new(locator: CatalogLocator, page: usize, page_size: usize) -> Self {
        Self {
            locator,
            page,
            page_size,
        }
    }
}

struct CachedPage {
    page: Page,
    stored_at: Instant,
}

pub struct PageCache {
    pages: Mutex<LruCache<PageKey, CachedPage>>,
    ttl: Duration,
}

impl PageCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            pages: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    fn pages(&self) -> MutexGuard<'_, LruCache<PageKey, CachedPage>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &PageKey) -> Option<Page> {
        let mut pages = self.pages();
        let fresh = pages.get(key).map(|c| c.stored_at.elapsed() < self.ttl)?;
        if fresh {
            pages.get(key).map(|c| c.page.clone())
        } else {
            pages.pop(key);
            None
        }
    }

    pub fn put(&self, key: PageKey, page: Page) {
        self.pages().put(
            key,
            CachedPage {
                page,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every cached page of one catalog.
    pub fn invalidate(&self, locator: &CatalogLocator) -> usize {
        let mut pages = self.pages();
        let stale: Vec<PageKey> = pages
            .iter()
            .filter(|(k, _)| &k.locator == locator)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &stale {
            pages.pop(key);
        }
        stale.len()
    }

    pub fn len(&self) -> usize {
        self.pages().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
