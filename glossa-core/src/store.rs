//! Paginated, searchable, cached access to catalogs.

use futures_util::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{PageCache, PageKey, DEFAULT_PAGE_TTL};
use crate::error::{GlossaError, Result};
use crate::model::{CatalogEntry, CatalogLocator, LanguageInfo};
use crate::source::ChunkSource;
use crate::stream::entry_stream;

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// One page of entries in file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub entries: Vec<CatalogEntry>,
    pub has_more: bool,
    pub page: usize,
    pub page_size: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_results: Option<usize>,
}

/// Combined pagination / search request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    #[serde(default)]
    pub page: usize,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub search: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub page_ttl: Duration,
    pub cache_capacity: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// Search terms shorter than this fall back to plain pagination.
    pub min_search_len: usize,
    /// Upper bound on matches collected for one query.
    pub max_search_results: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_ttl: DEFAULT_PAGE_TTL,
            cache_capacity: 1024,
            default_page_size: DEFAULT_PAGE_SIZE,
            max_page_size: 500,
            min_search_len: 3,
            max_search_results: 1000,
        }
    }
}

pub struct CatalogStore {
    source: Arc<dyn ChunkSource>,
    cache: PageCache,
    config: StoreConfig,
}

impl CatalogStore {
    pub fn new(source: Arc<dyn ChunkSource>, config: StoreConfig) -> Self {
        let cache = PageCache::new(config.cache_capacity, config.page_ttl);
        Self {
            source,
            cache,
            config,
        }
    }

    pub fn with_defaults(source: Arc<dyn ChunkSource>) -> Self {
        Self::new(source, StoreConfig::default())
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Entries of one catalog in file order, parsed as chunks arrive.
    pub fn entries(&self, locator: &CatalogLocator) -> BoxStream<'static, Result<CatalogEntry>> {
        entry_stream(self.source.open(locator))
    }

    fn check_page_size(&self, page_size: usize) -> Result<()> {
        if page_size == 0 || page_size > self.config.max_page_size {
            return Err(GlossaError::validation(format!(
                "page size must be between 1 and {}",
                self.config.max_page_size
            )));
        }
        Ok(())
    }

    /// Entries `[page * page_size, (page + 1) * page_size)`.
    ///
    /// Reading stops one entry past the page, which is enough to know
    /// whether another page follows.
    pub async fn get_page(
        &self,
        locator: &CatalogLocator,
        page: usize,
        page_size: usize,
    ) -> Result<Page> {
        locator.validate()?;
        self.check_page_size(page_size)?;

        let key = PageKey::new(locator.clone(), page, page_size);
        if let Some(cached) = self.cache.get(&key) {
            log::debug!("page cache hit for {} page {}", locator, page);
            return Ok(cached);
        }

        let skip = page.saturating_mul(page_size);
        let mut stream = self.entries(locator).skip(skip).take(page_size + 1);
        let mut entries = Vec::with_capacity(page_size + 1);
        while let Some(entry) = stream.next().await {
            entries.push(entry?);
        }

        let has_more = entries.len() > page_size;
        entries.truncate(page_size);
        let result = Page {
            entries,
            has_more,
            page,
            page_size,
            total_results: None,
        };
        self.cache.put(key, result.clone());
        Ok(result)
    }

    /// Up to `max_results` entries whose key or value contains `term`,
    /// ignoring case. Reading stops at the limit.
    pub async fn search(
        &self,
        locator: &CatalogLocator,
        term: &str,
        max_results: usize,
    ) -> Result<Vec<CatalogEntry>> {
        locator.validate()?;
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Err(GlossaError::validation("search term is empty"));
        }

        let mut found = Vec::new();
        if max_results == 0 {
            return Ok(found);
        }
        let mut stream = self.entries(locator);
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            if entry.matches(&needle) {
                found.push(entry);
                if found.len() >= max_results {
                    break;
                }
            }
        }
        Ok(found)
    }

    /// Pagination with optional search. A search term of at least
    /// `min_search_len` characters pages through matches instead.
    pub async fn query(&self, locator: &CatalogLocator, query: &PageQuery) -> Result<Page> {
        let page_size = query.page_size.unwrap_or(self.config.default_page_size);
        self.check_page_size(page_size)?;

        let term = query
            .search
            .as_deref()
            .map(str::trim)
            .filter(|t| t.chars().count() >= self.config.min_search_len);

        let Some(term) = term else {
            return self.get_page(locator, query.page, page_size).await;
        };

        let matches = self
            .search(locator, term, self.config.max_search_results)
            .await?;
        let total = matches.len();
        let start = query.page.saturating_mul(page_size).min(total);
        let end = start.saturating_add(page_size).min(total);
        Ok(Page {
            entries: matches[start..end].to_vec(),
            has_more: end < total,
            page: query.page,
            page_size,
            total_results: Some(total),
        })
    }

    /// Current entry for one key, if the catalog has it.
    pub async fn find(&self, locator: &CatalogLocator, key: &str) -> Result<Option<CatalogEntry>> {
        locator.validate()?;
        let mut stream = self.entries(locator);
        while let Some(entry) = stream.next().await {
            let entry = entry?;
            if entry.key == key {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub async fn language_directory(&self, catalog: &str) -> Result<Vec<LanguageInfo>> {
        self.source.languages(catalog).await
    }

    /// Forget cached pages of one catalog, e.g. after it was published.
    pub fn invalidate(&self, locator: &CatalogLocator) {
        let dropped = self.cache.invalidate(locator);
        log::debug!("invalidated {} cached pages for {}", dropped, locator);
    }
}
