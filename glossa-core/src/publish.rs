//! Publication seam.
//!
//! The tracker folds pending edits into a [`PendingChangeBatch`] and hands
//! it to a [`Publisher`]. Only a `Published` outcome marks records as
//! submitted; a deferred outcome leaves them pending for the next attempt.

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::codec::{parse_catalog, try_serialize_entries};
use crate::error::{GlossaError, Result};
use crate::model::{CatalogHeader, CatalogLocator};

/// Net change of one key since it was last published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChange {
    pub key: String,
    pub original_text: String,
    /// Value before the first unpublished edit.
    pub previous_value: String,
    /// Value after the latest unpublished edit.
    pub new_value: String,
    /// User of the latest edit.
    pub author: String,
    /// Every record folded into this change.
    pub change_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageChanges {
    pub catalog: String,
    pub language: String,
    pub path: String,
    pub changes: Vec<PendingChange>,
}

impl LanguageChanges {
    pub fn locator(&self) -> CatalogLocator {
        CatalogLocator::new(&self.catalog, &self.language)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingChangeBatch {
    pub groups: Vec<LanguageChanges>,
}

impl PendingChangeBatch {
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(|g| g.changes.is_empty())
    }

    /// Number of changed keys.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.changes.len()).sum()
    }

    pub fn change_ids(&self) -> Vec<Uuid> {
        self.groups
            .iter()
            .flat_map(|g| g.changes.iter())
            .flat_map(|c| c.change_ids.iter().copied())
            .collect()
    }

    pub fn locators(&self) -> Vec<CatalogLocator> {
        self.groups.iter().map(LanguageChanges::locator).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicationHandle {
    pub publication_url: String,
    pub publication_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Pending,
}

/// Result of handing a batch to a publisher.
///
/// Serializes either as `{publicationUrl, publicationId}` or as
/// `{status: "pending"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublicationOutcome {
    Published(PublicationHandle),
    Deferred { status: TicketStatus },
}

impl PublicationOutcome {
    pub fn pending() -> Self {
        Self::Deferred {
            status: TicketStatus::Pending,
        }
    }

    pub fn handle(&self) -> Option<&PublicationHandle> {
        match self {
            Self::Published(handle) => Some(handle),
            Self::Deferred { .. } => None,
        }
    }
}

/// Downstream change publication (a review request, a commit, a file drop).
pub trait Publisher: Send + Sync {
    fn publish<'a>(
        &'a self,
        batch: &'a PendingChangeBatch,
    ) -> BoxFuture<'a, Result<PublicationOutcome>>;
}

/// Accepts nothing yet; every batch stays pending.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeferredPublisher;

impl Publisher for DeferredPublisher {
    fn publish<'a>(
        &'a self,
        batch: &'a PendingChangeBatch,
    ) -> BoxFuture<'a, Result<PublicationOutcome>> {
        Box::pin(async move {
            log::info!("deferring publication of {} changes", batch.len());
            Ok(PublicationOutcome::pending())
        })
    }
}

/// Writes changes back into the catalog files under `root`.
///
/// A batch is all-or-nothing: every file is read and rendered before any is
/// written, new contents go to temporary siblings, and only once all of
/// them are on disk are they renamed into place. A failed rename restores
/// the files already replaced. Edited entries lose their `fuzzy` flag.
#[derive(Debug, Clone)]
pub struct FilePublisher {
    root: PathBuf,
}

/// One catalog file, rendered and ready to swap in.
struct Rendered {
    path: PathBuf,
    tmp: PathBuf,
    original: String,
    output: String,
    applied: usize,
}

fn publication_error(path: &Path, e: std::io::Error) -> GlossaError {
    GlossaError::Publication(format!("{}: {e}", path.display()))
}

impl FilePublisher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn render_group(&self, group: &LanguageChanges) -> Result<Rendered> {
        let locator = group.locator();
        locator.validate()?;
        let path = self.root.join(&locator.catalog).join(format!("{}.po", locator.language));

        let original = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| GlossaError::retrieval(0, format!("{}: {e}", path.display())))?;
        let mut parsed = parse_catalog(&original);

        let wanted: HashMap<&str, &PendingChange> =
            group.changes.iter().map(|c| (c.key.as_str(), c)).collect();
        let mut applied = 0;
        for entry in &mut parsed.entries {
            if let Some(change) = wanted.get(entry.key.as_str()) {
                entry.current_text = change.new_value.clone();
                entry.flags.remove("fuzzy");
                applied += 1;
            }
        }
        if applied < wanted.len() {
            log::warn!(
                "{} of {} changes for {} have no matching entry",
                wanted.len() - applied,
                wanted.len(),
                locator
            );
        }

        let header = parsed
            .header
            .unwrap_or_else(|| CatalogHeader::new(&locator.language));
        let output = try_serialize_entries(&header, &parsed.entries)?;
        Ok(Rendered {
            tmp: path.with_extension("po.tmp"),
            path,
            original,
            output,
            applied,
        })
    }

    async fn remove_temporaries(files: &[Rendered]) {
        for file in files {
            if let Err(e) = tokio::fs::remove_file(&file.tmp).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("could not remove {}: {}", file.tmp.display(), e);
                }
            }
        }
    }

    /// Put back the original contents of files already renamed into place.
    async fn restore(files: &[Rendered]) {
        for file in files {
            if let Err(e) = tokio::fs::write(&file.path, &file.original).await {
                log::error!("could not restore {}: {}", file.path.display(), e);
            }
        }
    }

    async fn write_all(files: &[Rendered]) -> Result<()> {
        for (at, file) in files.iter().enumerate() {
            if let Err(e) = tokio::fs::write(&file.tmp, &file.output).await {
                Self::remove_temporaries(&files[..=at]).await;
                return Err(publication_error(&file.tmp, e));
            }
        }
        for (at, file) in files.iter().enumerate() {
            if let Err(e) = tokio::fs::rename(&file.tmp, &file.path).await {
                Self::restore(&files[..at]).await;
                Self::remove_temporaries(&files[at..]).await;
                return Err(publication_error(&file.path, e));
            }
        }
        Ok(())
    }
}

impl Publisher for FilePublisher {
    fn publish<'a>(
        &'a self,
        batch: &'a PendingChangeBatch,
    ) -> BoxFuture<'a, Result<PublicationOutcome>> {
        Box::pin(async move {
            let mut files = Vec::with_capacity(batch.groups.len());
            for group in &batch.groups {
                files.push(self.render_group(group).await?);
            }
            Self::write_all(&files).await?;

            let applied: usize = files.iter().map(|f| f.applied).sum();
            let publication_id = Uuid::new_v4().to_string();
            log::info!(
                "published {} changes across {} catalogs as {}",
                applied,
                files.len(),
                publication_id
            );
            Ok(PublicationOutcome::Published(PublicationHandle {
                publication_url: format!("file://{}", self.root.display()),
                publication_id,
            }))
        })
    }
}
