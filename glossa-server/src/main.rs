//! Glossa server: presence WebSocket plus the catalog HTTP API.
//!
//! ```text
//!                 ┌──────────────────┐
//!  editors ──ws──►│ PresenceServer   │  rooms per catalog/language
//!                 └──────────────────┘
//!                 ┌──────────────────┐     ┌──────────────┐
//!  editors ─http─►│ api::router      │────►│ CatalogStore │──► <root>/<catalog>/<lang>.po
//!                 │                  │     └──────────────┘
//!                 │                  │     ┌───────────────┐   ┌──────────────┐
//!                 │                  │────►│ ChangeTracker │──►│ RocksJournal │
//!                 └──────────────────┘     └───────────────┘   └──────────────┘
//! ```

mod api;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use glossa_collab::server::PresenceServer;
use glossa_collab::storage::RocksJournal;
use glossa_core::changes::ChangeTracker;
use glossa_core::publish::{DeferredPublisher, FilePublisher, Publisher};
use glossa_core::source::FileSource;
use glossa_core::store::CatalogStore;

use crate::api::AppState;
use crate::config::{GlossaConfig, PublishMode};

/// Command line arguments. Flags override the config file.
#[derive(Parser, Debug)]
#[command(name = "glossa-server")]
#[command(about = "Collaborative translation catalog server")]
struct Args {
    /// TOML configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Presence WebSocket address
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// HTTP API address
    #[arg(long, value_name = "ADDR")]
    api_bind: Option<String>,

    /// Directory holding <catalog>/<language>.po files
    #[arg(long, value_name = "DIR")]
    catalog_root: Option<PathBuf>,

    /// RocksDB journal directory; edits stay in memory without it
    #[arg(long, value_name = "DIR")]
    journal: Option<PathBuf>,

    /// Keep publications pending instead of writing catalog files
    #[arg(long)]
    defer_publish: bool,
}

impl Args {
    fn apply(self, mut config: GlossaConfig) -> GlossaConfig {
        if let Some(bind) = self.bind {
            config.presence.bind_addr = bind;
        }
        if let Some(api_bind) = self.api_bind {
            config.api.bind_addr = api_bind;
        }
        if let Some(root) = self.catalog_root {
            config.catalogs.root = root;
        }
        if let Some(journal) = self.journal {
            config.journal.path = Some(journal);
        }
        if self.defer_publish {
            config.publish.mode = PublishMode::Deferred;
        }
        config
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn build_tracker(config: &GlossaConfig) -> Result<ChangeTracker, BoxError> {
    match config.journal_config() {
        Some(journal_config) => {
            let journal = Arc::new(RocksJournal::open(journal_config)?);
            let tracker = ChangeTracker::restore(journal)?;
            info!("Change tracker restored with {} sessions", tracker.sessions().len());
            Ok(tracker)
        }
        None => {
            log::warn!("No journal configured; edits are kept in memory only");
            Ok(ChangeTracker::new())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    env_logger::init();

    let args = Args::parse();
    let config = GlossaConfig::load(args.config.as_deref())?;
    let config = args.apply(config);

    info!("Starting Glossa server...");
    info!("Serving catalogs from {}", config.catalogs.root.display());

    let source = Arc::new(FileSource::with_chunk_size(
        config.catalogs.root.clone(),
        config.catalogs.chunk_size,
    ));
    let store = Arc::new(CatalogStore::new(source, config.store_config()));
    let tracker = Arc::new(build_tracker(&config)?);
    let publisher: Arc<dyn Publisher> = match config.publish.mode {
        PublishMode::Files => Arc::new(FilePublisher::new(config.catalogs.root.clone())),
        PublishMode::Deferred => Arc::new(DeferredPublisher),
    };

    let state = AppState {
        store,
        tracker,
        publisher,
    };
    let presence = PresenceServer::new(config.server_config());
    let api_listener = TcpListener::bind(&config.api.bind_addr).await?;

    tokio::select! {
        result = presence.run() => {
            if let Err(e) = result {
                log::error!("Presence server stopped: {e}");
                return Err(e);
            }
        }
        result = api::serve(api_listener, state) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
    Ok(())
}
