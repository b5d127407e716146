//! Catalog, session and edit data model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::SystemTime;
use uuid::Uuid;

use crate::error::{GlossaError, Result};

/// Separator between context and source text in a derived key (gettext EOT).
pub const CONTEXT_SEPARATOR: char = '\u{4}';

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ───────────────────────────────────────────────────────────────────
// Catalog entries
// ───────────────────────────────────────────────────────────────────

/// One key/value record of a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    /// Stable identifier, derived from `context` + `original_text`.
    pub key: String,
    /// Source-language text (`msgid`).
    pub original_text: String,
    /// Stored translation (`msgstr`), empty when untranslated.
    pub current_text: String,
    /// Value before the most recent save, overlaid from the change tracker
    /// when entries are served. Not part of the file format: the codec
    /// never writes it and always reads it back as `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_text: Option<String>,
    /// Disambiguator (`msgctxt`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Source locations from `#:` lines, in file order.
    #[serde(default)]
    pub references: Vec<String>,
    /// Flags from `#,` lines (`fuzzy`, `c-format`, ...).
    #[serde(default)]
    pub flags: BTreeSet<String>,
    /// Any other comment line, stored without its leading `#`.
    #[serde(default)]
    pub comments: Vec<String>,
}

impl CatalogEntry {
    pub fn new(original_text: impl Into<String>, current_text: impl Into<String>) -> Self {
        let original_text = original_text.into();
        Self {
            key: Self::derive_key(&original_text, None),
            original_text,
            current_text: current_text.into(),
            previous_text: None,
            context: None,
            references: Vec::new(),
            flags: BTreeSet::new(),
            comments: Vec::new(),
        }
    }

    /// Attach a context; the key is re-derived.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self.key = Self::derive_key(&self.original_text, self.context.as_deref());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.references.push(reference.into());
        self
    }

    pub fn with_flag(mut self, flag: impl Into<String>) -> Self {
        self.flags.insert(flag.into());
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comments.push(comment.into());
        self
    }

    /// Key for a source text, optionally disambiguated by context.
    pub fn derive_key(original_text: &str, context: Option<&str>) -> String {
        match context {
            Some(ctx) => format!("{ctx}{CONTEXT_SEPARATOR}{original_text}"),
            None => original_text.to_string(),
        }
    }

    pub fn is_translated(&self) -> bool {
        !self.current_text.is_empty()
    }

    pub fn is_fuzzy(&self) -> bool {
        self.flags.contains("fuzzy")
    }

    /// Case-insensitive substring match over key or current value.
    /// `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        self.key.to_lowercase().contains(needle)
            || self.current_text.to_lowercase().contains(needle)
    }
}

// ───────────────────────────────────────────────────────────────────
// Header pseudo-entry
// ───────────────────────────────────────────────────────────────────

/// Catalog metadata carried by the empty-key header entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogHeader {
    pub language: String,
    pub encoding: String,
    pub generator: String,
    /// Other header fields, in file order.
    #[serde(default)]
    pub extra: Vec<(String, String)>,
}

impl CatalogHeader {
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            encoding: "UTF-8".to_string(),
            generator: concat!("glossa ", env!("CARGO_PKG_VERSION")).to_string(),
            extra: Vec::new(),
        }
    }

    /// Render as the header's `msgstr` value.
    pub fn to_value(&self) -> String {
        let mut value = format!(
            "Language: {}\nContent-Type: text/plain; charset={}\nX-Generator: {}\n",
            self.language, self.encoding, self.generator
        );
        for (name, field) in &self.extra {
            value.push_str(name);
            value.push_str(": ");
            value.push_str(field);
            value.push('\n');
        }
        value
    }

    /// Read a header `msgstr` value. Unknown fields are kept in `extra`.
    pub fn from_value(value: &str) -> Self {
        let mut header = Self {
            language: String::new(),
            encoding: "UTF-8".to_string(),
            generator: String::new(),
            extra: Vec::new(),
        };
        for line in value.lines() {
            let Some((name, field)) = line.split_once(':') else {
                continue;
            };
            let field = field.trim();
            match name.trim() {
                "Language" => header.language = field.to_string(),
                "Content-Type" => {
                    if let Some((_, charset)) = field.split_once("charset=") {
                        header.encoding = charset.trim().to_string();
                    }
                }
                "X-Generator" => header.generator = field.to_string(),
                other => header.extra.push((other.to_string(), field.to_string())),
            }
        }
        header
    }
}

// ───────────────────────────────────────────────────────────────────
// Addressing
// ───────────────────────────────────────────────────────────────────

/// A (catalog, language) pair; addresses one catalog file and one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CatalogLocator {
    pub catalog: String,
    pub language: String,
}

impl CatalogLocator {
    pub fn new(catalog: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            catalog: catalog.into(),
            language: language.into(),
        }
    }

    /// Reject empty components and anything that could escape the catalog root.
    pub fn validate(&self) -> Result<()> {
        for (name, part) in [("catalog", &self.catalog), ("language", &self.language)] {
            if part.is_empty() {
                return Err(GlossaError::validation(format!("{name} is required")));
            }
            if part.contains(['/', '\\']) || part == "." || part == ".." {
                return Err(GlossaError::validation(format!("invalid {name}: {part}")));
            }
        }
        Ok(())
    }

    /// Path of the catalog file relative to the catalog root.
    pub fn relative_path(&self) -> String {
        format!("{}/{}.po", self.catalog, self.language)
    }
}

impl std::fmt::Display for CatalogLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.catalog, self.language)
    }
}

/// One language available for a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub code: String,
    pub path: String,
}

// ───────────────────────────────────────────────────────────────────
// Identity, sessions, edits
// ───────────────────────────────────────────────────────────────────

/// Caller identity, issued by the external authentication collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(GlossaError::Authorization("user id is required".into()));
        }
        Ok(())
    }
}

/// One user's engagement with one catalog/language pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkingSession {
    pub session_id: Uuid,
    pub user_id: String,
    pub display_name: String,
    pub catalog: String,
    pub language: String,
    pub started_at: u64,
    pub last_active_at: u64,
}

impl WorkingSession {
    pub fn locator(&self) -> CatalogLocator {
        CatalogLocator::new(&self.catalog, &self.language)
    }
}

/// Publication state of an edit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EditStatus {
    Pending,
    /// Terminal.
    #[serde(rename_all = "camelCase")]
    Submitted { publication_id: String },
}

/// Append-only audit record of a single save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRecord {
    /// Change id handed to the publisher.
    pub id: Uuid,
    /// Global acceptance order; later sequence wins.
    pub sequence: u64,
    pub session_id: Uuid,
    pub user_id: String,
    pub catalog: String,
    pub language: String,
    pub key: String,
    pub previous_value: String,
    pub new_value: String,
    pub timestamp: u64,
    pub status: EditStatus,
}

impl EditRecord {
    pub fn locator(&self) -> CatalogLocator {
        CatalogLocator::new(&self.catalog, &self.language)
    }

    pub fn is_pending(&self) -> bool {
        self.status == EditStatus::Pending
    }
}
