//! Server configuration: defaults, then an optional TOML file, then flags.
//!
//! ```toml
//! [presence]
//! bind_addr = "0.0.0.0:9090"
//! stale_after_secs = 120
//!
//! [api]
//! bind_addr = "0.0.0.0:9091"
//!
//! [catalogs]
//! root = "/srv/catalogs"
//! default_page_size = 50
//!
//! [journal]
//! path = "/var/lib/glossa/journal"
//!
//! [publish]
//! mode = "files"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use glossa_collab::server::ServerConfig;
use glossa_collab::storage::JournalConfig;
use glossa_core::store::StoreConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceSection {
    pub bind_addr: String,
    pub outbox_capacity: usize,
    pub heartbeat_interval_secs: u64,
    pub stale_after_secs: u64,
}

impl Default for PresenceSection {
    fn default() -> Self {
        let server = ServerConfig::default();
        Self {
            bind_addr: server.bind_addr,
            outbox_capacity: server.outbox_capacity,
            heartbeat_interval_secs: server.heartbeat_interval_secs,
            stale_after_secs: server.stale_after_secs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub bind_addr: String,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9091".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    /// Directory holding `<catalog>/<language>.po`
    pub root: PathBuf,
    pub chunk_size: usize,
    pub page_ttl_secs: u64,
    pub cache_capacity: usize,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub min_search_len: usize,
    pub max_search_results: usize,
}

impl Default for CatalogSection {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            root: PathBuf::from("catalogs"),
            chunk_size: glossa_core::source::DEFAULT_CHUNK_SIZE,
            page_ttl_secs: store.page_ttl.as_secs(),
            cache_capacity: store.cache_capacity,
            default_page_size: store.default_page_size,
            max_page_size: store.max_page_size,
            min_search_len: store.min_search_len,
            max_search_results: store.max_search_results,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalSection {
    /// No path keeps edits in memory only.
    pub path: Option<PathBuf>,
    pub sync_writes: bool,
}

impl Default for JournalSection {
    fn default() -> Self {
        Self {
            path: None,
            sync_writes: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishMode {
    /// Write accepted changes back into the catalog files.
    #[default]
    Files,
    /// Hand nothing off; every publication stays pending.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishSection {
    pub mode: PublishMode,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlossaConfig {
    pub presence: PresenceSection,
    pub api: ApiSection,
    pub catalogs: CatalogSection,
    pub journal: JournalSection,
    pub publish: PublishSection,
}

impl GlossaConfig {
    /// Defaults, overlaid with `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.presence.bind_addr.clone(),
            outbox_capacity: self.presence.outbox_capacity,
            heartbeat_interval_secs: self.presence.heartbeat_interval_secs,
            stale_after_secs: self.presence.stale_after_secs,
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        let c = &self.catalogs;
        StoreConfig {
            page_ttl: Duration::from_secs(c.page_ttl_secs),
            cache_capacity: c.cache_capacity,
            default_page_size: c.default_page_size,
            max_page_size: c.max_page_size,
            min_search_len: c.min_search_len,
            max_search_results: c.max_search_results,
        }
    }

    pub fn journal_config(&self) -> Option<JournalConfig> {
        self.journal.path.as_ref().map(|path| JournalConfig {
            path: path.clone(),
            sync_writes: self.journal.sync_writes,
            ..JournalConfig::default()
        })
    }
}
