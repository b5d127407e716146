//! Glossa collaboration layer: the presence channel and durable journal.
//!
//! - [`protocol`]: JSON frames exchanged over the presence WebSocket
//! - [`presence`]: per-(catalog, language) room state machine
//! - [`registry`]: room lifecycle, created on first join and retired when empty
//! - [`server`] / [`client`]: WebSocket transport on tokio-tungstenite
//! - [`storage`]: RocksDB implementation of the core's `EditJournal`

pub mod client;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod storage;

pub use client::{ConnectionState, PresenceClient, PresenceEvent};
pub use presence::{ConnectionSink, PresenceConfig, PresenceMark, PresenceRoom, RoomError};
pub use protocol::{ClientMessage, Inbound, ProtocolError, ServerMessage};
pub use registry::RoomRegistry;
pub use server::{Authenticator, ConnectParams, PresenceServer, QueryAuthenticator, ServerConfig};
pub use storage::{JournalConfig, RocksJournal, StoreError};
