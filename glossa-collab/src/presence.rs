//! Per-catalog presence rooms.
//!
//! A room tracks who is connected to one (catalog, language) pair and which
//! keys each connection is currently editing. It is a plain synchronous
//! state machine; the registry wraps each room in a lock so every
//! transition, broadcasts included, happens in one critical section.
//!
//! ## Connection lifecycle
//!
//! ```text
//!            connect()                 disconnect() / purge_stale()
//! Connecting ─────────▶ Active ──────────────────────────────▶ Closed
//!                         │ ▲                                  (marks released,
//!          startEdit/endEdit/ping/heartbeat                    userDisconnected
//!                         └─┘                                  to the others)
//! ```
//!
//! ## Delivery
//!
//! Frames are queued on each connection's [`ConnectionSink`] without
//! waiting. A sink that is full or closed gets its connection closed through
//! the same path as an ordinary disconnect, so one slow client never stalls
//! the room.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use uuid::Uuid;

use glossa_core::model::{now_millis, CatalogLocator, Identity};
use glossa_core::GlossaError;

use crate::protocol::{ClientMessage, Inbound, ProtocolError, ServerMessage};

/// How often clients are expected to show signs of life.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Silence after which a connection is purged.
pub const STALE_AFTER: Duration = Duration::from_secs(120);

// ───────────────────────────────────────────────────────────────────
// Configuration & errors
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub heartbeat_interval: Duration,
    pub stale_after: Duration,
    /// Frames buffered per connection before it counts as too slow.
    pub outbox_capacity: usize,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            stale_after: STALE_AFTER,
            outbox_capacity: 256,
        }
    }
}

#[derive(Debug, Error)]
pub enum RoomError {
    #[error(transparent)]
    Rejected(#[from] GlossaError),
    #[error("connection {0} is not active")]
    NotActive(Uuid),
    #[error("connection closed before it was accepted")]
    Closed,
}

// ───────────────────────────────────────────────────────────────────
// Delivery
// ───────────────────────────────────────────────────────────────────

/// Outbound side of one connection.
pub trait ConnectionSink: Send {
    /// Queue a frame without waiting.
    fn try_deliver(&self, msg: ServerMessage) -> Result<(), ProtocolError>;
}

impl ConnectionSink for mpsc::Sender<ServerMessage> {
    fn try_deliver(&self, msg: ServerMessage) -> Result<(), ProtocolError> {
        self.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ProtocolError::Timeout,
            mpsc::error::TrySendError::Closed(_) => ProtocolError::ConnectionClosed,
        })
    }
}

// ───────────────────────────────────────────────────────────────────
// Room state
// ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closed,
}

/// "User U is editing key K." Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceMark {
    pub key: String,
    pub user_id: String,
    pub display_name: String,
    pub connection_id: Uuid,
    /// Milliseconds since the epoch of the latest `startEdit`.
    pub since: u64,
}

struct Connection {
    identity: Identity,
    state: ConnectionState,
    sink: Box<dyn ConnectionSink>,
    last_heartbeat: Instant,
    /// Marked key → time of the latest startEdit.
    marks: BTreeMap<String, u64>,
}

pub struct PresenceRoom {
    locator: CatalogLocator,
    config: PresenceConfig,
    connections: HashMap<Uuid, Connection>,
    /// Connections whose sink failed, closed after the current transition.
    failed: Vec<Uuid>,
}

impl PresenceRoom {
    pub fn new(locator: CatalogLocator, config: PresenceConfig) -> Self {
        Self {
            locator,
            config,
            connections: HashMap::new(),
            failed: Vec::new(),
        }
    }

    pub fn locator(&self) -> &CatalogLocator {
        &self.locator
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn state(&self, connection_id: Uuid) -> ConnectionState {
        self.connections
            .get(&connection_id)
            .map(|c| c.state)
            .unwrap_or(ConnectionState::Closed)
    }

    pub fn identity(&self, connection_id: Uuid) -> Option<&Identity> {
        self.connections.get(&connection_id).map(|c| &c.identity)
    }

    /// Admit a connection and greet it with `connected`.
    pub fn connect(
        &mut self,
        identity: Identity,
        sink: Box<dyn ConnectionSink>,
        now: Instant,
    ) -> Result<Uuid, RoomError> {
        identity.validate()?;
        let connection_id = Uuid::new_v4();
        self.connections.insert(
            connection_id,
            Connection {
                identity,
                state: ConnectionState::Connecting,
                sink,
                last_heartbeat: now,
                marks: BTreeMap::new(),
            },
        );

        let greeting = ServerMessage::Connected { connection_id };
        let accepted = self
            .connections
            .get(&connection_id)
            .is_some_and(|c| c.sink.try_deliver(greeting).is_ok());
        if !accepted {
            self.connections.remove(&connection_id);
            return Err(RoomError::Closed);
        }

        if let Some(conn) = self.connections.get_mut(&connection_id) {
            conn.state = ConnectionState::Active;
            log::info!(
                "{} ({}) joined {} as {}",
                conn.identity.display_name,
                conn.identity.user_id,
                self.locator,
                connection_id
            );
        }
        Ok(connection_id)
    }

    /// Apply one inbound frame from an active connection.
    pub fn handle(
        &mut self,
        connection_id: Uuid,
        inbound: Inbound,
        now: Instant,
    ) -> Result<(), RoomError> {
        let conn = self
            .connections
            .get_mut(&connection_id)
            .filter(|c| c.state == ConnectionState::Active)
            .ok_or(RoomError::NotActive(connection_id))?;
        conn.last_heartbeat = now;
        let identity = conn.identity.clone();

        match inbound {
            Inbound::Message(ClientMessage::StartEdit { key }) => {
                if key.is_empty() {
                    self.send_to(connection_id, ServerMessage::error("startEdit requires a key"));
                } else if conn.marks.insert(key.clone(), now_millis()).is_none() {
                    log::debug!("{} started editing '{}' in {}", identity.user_id, key, self.locator);
                    self.broadcast_except(
                        connection_id,
                        ServerMessage::UserStartedEditing {
                            key,
                            user_id: identity.user_id,
                            display_name: identity.display_name,
                        },
                    );
                }
            }
            Inbound::Message(ClientMessage::EndEdit { key }) => {
                if conn.marks.remove(&key).is_some() {
                    log::debug!("{} stopped editing '{}' in {}", identity.user_id, key, self.locator);
                    self.broadcast_except(
                        connection_id,
                        ServerMessage::UserStoppedEditing {
                            key,
                            user_id: identity.user_id,
                            display_name: identity.display_name,
                        },
                    );
                }
            }
            Inbound::Message(ClientMessage::Ping) => {
                self.send_to(connection_id, ServerMessage::Pong);
            }
            Inbound::Unrecognized { reason } => {
                log::warn!(
                    "unrecognized frame from {} in {}: {}",
                    connection_id,
                    self.locator,
                    reason
                );
                self.send_to(
                    connection_id,
                    ServerMessage::error(format!("unrecognized message: {reason}")),
                );
            }
        }

        self.close_failed();
        Ok(())
    }

    /// Liveness signal that carries no message (e.g. a transport ping).
    pub fn heartbeat(&mut self, connection_id: Uuid, now: Instant) -> bool {
        match self.connections.get_mut(&connection_id) {
            Some(conn) => {
                conn.last_heartbeat = now;
                true
            }
            None => false,
        }
    }

    /// Close a connection, release its marks and tell the others.
    /// Returns false when the connection was already gone.
    pub fn disconnect(&mut self, connection_id: Uuid) -> bool {
        let closed = self.close(connection_id);
        self.close_failed();
        closed
    }

    /// Close every connection silent for longer than the staleness window.
    pub fn purge_stale(&mut self, now: Instant) -> Vec<Uuid> {
        let stale_after = self.config.stale_after;
        let stale: Vec<Uuid> = self
            .connections
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_heartbeat) >= stale_after)
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            log::warn!("purging silent connection {} from {}", id, self.locator);
            self.close(*id);
        }
        self.close_failed();
        stale
    }

    /// Who is editing `key` right now.
    pub fn editors(&self, key: &str) -> Vec<PresenceMark> {
        let mut editors: Vec<PresenceMark> = self
            .connections
            .iter()
            .filter_map(|(id, c)| {
                c.marks.get(key).map(|since| PresenceMark {
                    key: key.to_string(),
                    user_id: c.identity.user_id.clone(),
                    display_name: c.identity.display_name.clone(),
                    connection_id: *id,
                    since: *since,
                })
            })
            .collect();
        editors.sort_by_key(|m| m.since);
        editors
    }

    /// Every mark in the room, ordered by key.
    pub fn marks(&self) -> Vec<PresenceMark> {
        let mut marks: Vec<PresenceMark> = self
            .connections
            .iter()
            .flat_map(|(id, c)| {
                c.marks.iter().map(move |(key, since)| PresenceMark {
                    key: key.clone(),
                    user_id: c.identity.user_id.clone(),
                    display_name: c.identity.display_name.clone(),
                    connection_id: *id,
                    since: *since,
                })
            })
            .collect();
        marks.sort_by(|a, b| a.key.cmp(&b.key).then(a.since.cmp(&b.since)));
        marks
    }

    // ─── internals ──────────────────────────────────────────────────

    fn close(&mut self, connection_id: Uuid) -> bool {
        let Some(conn) = self.connections.remove(&connection_id) else {
            return false;
        };
        log::info!(
            "{} ({}) left {}, releasing {} marks",
            conn.identity.display_name,
            conn.identity.user_id,
            self.locator,
            conn.marks.len()
        );
        if conn.state == ConnectionState::Active {
            self.broadcast_except(
                connection_id,
                ServerMessage::UserDisconnected {
                    user_id: conn.identity.user_id,
                    display_name: conn.identity.display_name,
                },
            );
        }
        true
    }

    fn send_to(&mut self, connection_id: Uuid, msg: ServerMessage) {
        if let Some(conn) = self.connections.get(&connection_id) {
            if let Err(e) = conn.sink.try_deliver(msg) {
                log::warn!("dropping connection {} in {}: {}", connection_id, self.locator, e);
                self.failed.push(connection_id);
            }
        }
    }

    fn broadcast_except(&mut self, sender: Uuid, msg: ServerMessage) {
        for (id, conn) in &self.connections {
            if *id == sender || conn.state != ConnectionState::Active {
                continue;
            }
            if let Err(e) = conn.sink.try_deliver(msg.clone()) {
                log::warn!("dropping connection {} in {}: {}", id, self.locator, e);
                self.failed.push(*id);
            }
        }
    }

    /// Closing a failed connection broadcasts again, which may fail more.
    fn close_failed(&mut self) {
        while let Some(id) = self.failed.pop() {
            self.close(id);
        }
    }
}
