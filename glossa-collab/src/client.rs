//! Async presence client.
//!
//! Connects to a [`PresenceServer`](crate::server::PresenceServer), waits
//! for the `connected` greeting, then runs a writer task fed by an mpsc
//! channel and a reader task that turns frames into [`PresenceEvent`]s.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::{self, Message};
use url::Url;
use uuid::Uuid;

use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};

/// How long `connect` waits for the `connected` greeting.
const GREETING_TIMEOUT: Duration = Duration::from_secs(5);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the presence client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// Another user marked a key.
    StartedEditing {
        key: String,
        user_id: String,
        display_name: String,
    },
    /// Another user released a key.
    StoppedEditing {
        key: String,
        user_id: String,
        display_name: String,
    },
    /// Another user's connection closed.
    UserLeft { user_id: String, display_name: String },
    Pong,
    /// The room rejected one of our frames.
    Error(String),
    /// Connection lost
    Disconnected,
}

impl PresenceEvent {
    fn from_server(msg: ServerMessage) -> Option<Self> {
        match msg {
            ServerMessage::Connected { .. } => None,
            ServerMessage::UserStartedEditing {
                key,
                user_id,
                display_name,
            } => Some(Self::StartedEditing {
                key,
                user_id,
                display_name,
            }),
            ServerMessage::UserStoppedEditing {
                key,
                user_id,
                display_name,
            } => Some(Self::StoppedEditing {
                key,
                user_id,
                display_name,
            }),
            ServerMessage::UserDisconnected {
                user_id,
                display_name,
            } => Some(Self::UserLeft {
                user_id,
                display_name,
            }),
            ServerMessage::Pong => Some(Self::Pong),
            ServerMessage::Error { message } => Some(Self::Error(message)),
        }
    }
}

/// The presence client.
pub struct PresenceClient {
    server_url: String,
    catalog: String,
    language: String,
    user_id: String,
    display_name: String,

    state: Arc<RwLock<ConnectionState>>,
    connection_id: Option<Uuid>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<Message>>,

    event_rx: Option<mpsc::Receiver<PresenceEvent>>,
    event_tx: mpsc::Sender<PresenceEvent>,
}

impl PresenceClient {
    pub fn new(
        server_url: impl Into<String>,
        catalog: impl Into<String>,
        language: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            server_url: server_url.into(),
            catalog: catalog.into(),
            language: language.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            connection_id: None,
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<PresenceEvent>> {
        self.event_rx.take()
    }

    /// Handshake URL carrying the catalog, language and identity.
    pub fn handshake_url(&self) -> Result<String, ProtocolError> {
        let mut url = Url::parse(&self.server_url)
            .map_err(|e| ProtocolError::Handshake(format!("invalid server url: {e}")))?;
        url.query_pairs_mut()
            .clear()
            .append_pair("catalog", &self.catalog)
            .append_pair("language", &self.language)
            .append_pair("userId", &self.user_id)
            .append_pair("displayName", &self.display_name);
        Ok(url.into())
    }

    /// Connect and wait for the room's greeting.
    pub async fn connect(&mut self) -> Result<Uuid, ProtocolError> {
        *self.state.write().await = ConnectionState::Connecting;
        match self.open().await {
            Ok(connection_id) => {
                *self.state.write().await = ConnectionState::Connected;
                Ok(connection_id)
            }
            Err(e) => {
                *self.state.write().await = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> Result<Uuid, ProtocolError> {
        let url = self.handshake_url()?;
        let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| match e {
                tungstenite::Error::Http(response) => {
                    ProtocolError::Handshake(response.status().to_string())
                }
                _ => ProtocolError::ConnectionClosed,
            })?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let connection_id = match tokio::time::timeout(GREETING_TIMEOUT, ws_reader.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => match ServerMessage::decode(text.as_str())? {
                ServerMessage::Connected { connection_id } => connection_id,
                other => {
                    return Err(ProtocolError::Handshake(format!(
                        "expected connected greeting, got {other:?}"
                    )))
                }
            },
            Ok(_) => return Err(ProtocolError::ConnectionClosed),
            Err(_) => return Err(ProtocolError::Timeout),
        };
        self.connection_id = Some(connection_id);

        // Writer task
        let (out_tx, mut out_rx) = mpsc::channel::<Message>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                if ws_writer.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        // Reader task
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_reader.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerMessage::decode(text.as_str()) {
                        Ok(msg) => {
                            if let Some(event) = PresenceEvent::from_server(msg) {
                                let _ = event_tx.send(event).await;
                            }
                        }
                        Err(e) => log::warn!("Ignoring undecodable presence frame: {e}"),
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(PresenceEvent::Disconnected).await;
        });

        log::debug!("Presence client {} connected as {}", self.user_id, connection_id);
        Ok(connection_id)
    }

    async fn send(&self, msg: ClientMessage) -> Result<(), ProtocolError> {
        let text = msg.encode()?;
        self.send_raw(Message::Text(text.into())).await
    }

    /// Send a frame as-is. Lets callers exercise the room's handling of
    /// frames the typed API cannot produce.
    pub async fn send_raw(&self, msg: Message) -> Result<(), ProtocolError> {
        match &self.outgoing_tx {
            Some(tx) => tx.send(msg).await.map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    pub async fn start_edit(&self, key: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(ClientMessage::StartEdit { key: key.into() }).await
    }

    pub async fn end_edit(&self, key: impl Into<String>) -> Result<(), ProtocolError> {
        self.send(ClientMessage::EndEdit { key: key.into() }).await
    }

    pub async fn ping(&self) -> Result<(), ProtocolError> {
        self.send(ClientMessage::Ping).await
    }

    /// Close the connection. The reader task reports `Disconnected`.
    pub async fn disconnect(&mut self) -> Result<(), ProtocolError> {
        let result = self.send_raw(Message::Close(None)).await;
        self.outgoing_tx = None;
        result
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub fn connection_id(&self) -> Option<Uuid> {
        self.connection_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_url() {
        let client = PresenceClient::new("ws://127.0.0.1:9090", "app", "pt-BR", "u 1", "Ana & Lu");
        let url = Url::parse(&client.handshake_url().unwrap()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("catalog".into(), "app".into()),
                ("language".into(), "pt-BR".into()),
                ("userId".into(), "u 1".into()),
                ("displayName".into(), "Ana & Lu".into()),
            ]
        );
    }

    #[test]
    fn test_invalid_server_url() {
        let client = PresenceClient::new("not a url", "app", "fr", "u1", "Ana");
        assert!(matches!(client.handshake_url(), Err(ProtocolError::Handshake(_))));
    }

    #[test]
    fn test_server_messages_map_to_events() {
        assert_eq!(
            PresenceEvent::from_server(ServerMessage::Connected {
                connection_id: Uuid::new_v4()
            }),
            None
        );
        assert_eq!(
            PresenceEvent::from_server(ServerMessage::error("bad")),
            Some(PresenceEvent::Error("bad".into()))
        );
    }

    #[tokio::test]
    async fn test_client_initial_state() {
        let mut client = PresenceClient::new("ws://127.0.0.1:1", "app", "fr", "u1", "Ana");
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
        assert!(client.take_event_rx().is_some());
        assert!(client.take_event_rx().is_none());
        assert!(matches!(client.ping().await, Err(ProtocolError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let mut client = PresenceClient::new("ws://127.0.0.1:1", "app", "fr", "u1", "Ana");
        assert!(client.connect().await.is_err());
        assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
    }
}
