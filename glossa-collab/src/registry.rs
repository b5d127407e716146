//! Registry of live presence rooms, one per (catalog, language).
//!
//! Rooms are created on first join and retired as soon as their last
//! connection leaves. Lock order is always registry → room; `join` keeps
//! the registry read lock while it connects, so a room cannot be retired
//! between lookup and admission.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

use glossa_core::model::{CatalogLocator, Identity};

use crate::presence::{ConnectionSink, PresenceConfig, PresenceMark, PresenceRoom, RoomError};
use crate::protocol::Inbound;

pub type SharedRoom = Arc<Mutex<PresenceRoom>>;

pub struct RoomRegistry {
    rooms: RwLock<HashMap<CatalogLocator, SharedRoom>>,
    config: PresenceConfig,
}

impl RoomRegistry {
    pub fn new(config: PresenceConfig) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &PresenceConfig {
        &self.config
    }

    /// Admit a connection to the room for `locator`, creating the room if
    /// needed. Returns the room and the new connection id.
    pub async fn join(
        &self,
        locator: &CatalogLocator,
        identity: Identity,
        sink: Box<dyn ConnectionSink>,
    ) -> Result<(SharedRoom, Uuid), RoomError> {
        locator.validate()?;

        {
            let rooms = self.rooms.read().await;
            if let Some(room) = rooms.get(locator).cloned() {
                let connection_id = room.lock().await.connect(identity, sink, Instant::now())?;
                return Ok((room, connection_id));
            }
        }

        let mut rooms = self.rooms.write().await;
        let room = rooms
            .entry(locator.clone())
            .or_insert_with(|| {
                log::info!("room {} created", locator);
                Arc::new(Mutex::new(PresenceRoom::new(
                    locator.clone(),
                    self.config.clone(),
                )))
            })
            .clone();

        let mut state = room.lock().await;
        match state.connect(identity, sink, Instant::now()) {
            Ok(connection_id) => {
                drop(state);
                Ok((room, connection_id))
            }
            Err(e) => {
                if state.is_empty() {
                    rooms.remove(locator);
                    log::info!("room {} retired", locator);
                }
                Err(e)
            }
        }
    }

    /// Route one inbound frame to its room.
    pub async fn handle(
        &self,
        room: &SharedRoom,
        connection_id: Uuid,
        inbound: Inbound,
    ) -> Result<(), RoomError> {
        room.lock().await.handle(connection_id, inbound, Instant::now())
    }

    pub async fn heartbeat(&self, room: &SharedRoom, connection_id: Uuid) -> bool {
        room.lock().await.heartbeat(connection_id, Instant::now())
    }

    /// Disconnect and retire the room once empty.
    pub async fn leave(&self, locator: &CatalogLocator, connection_id: Uuid) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(locator).cloned() else {
            return false;
        };
        let mut state = room.lock().await;
        let removed = state.disconnect(connection_id);
        if state.is_empty() {
            rooms.remove(locator);
            log::info!("room {} retired", locator);
        }
        removed
    }

    /// Purge silent connections in every room. Returns how many were closed.
    pub async fn sweep_stale(&self) -> usize {
        let now = Instant::now();
        let mut rooms = self.rooms.write().await;
        let mut purged = 0;
        let mut empty = Vec::new();
        for (locator, room) in rooms.iter() {
            let mut state = room.lock().await;
            purged += state.purge_stale(now).len();
            if state.is_empty() {
                empty.push(locator.clone());
            }
        }
        for locator in empty {
            rooms.remove(&locator);
            log::info!("room {} retired", locator);
        }
        purged
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    pub async fn connection_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        let mut total = 0;
        for room in rooms.values() {
            total += room.lock().await.len();
        }
        total
    }

    /// Snapshot of the marks in one room; empty when the room is not live.
    pub async fn marks(&self, locator: &CatalogLocator) -> Vec<PresenceMark> {
        let rooms = self.rooms.read().await;
        match rooms.get(locator) {
            Some(room) => room.lock().await.marks(),
            None => Vec::new(),
        }
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(PresenceConfig::default())
    }
}
