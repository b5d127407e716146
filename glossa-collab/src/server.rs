//! WebSocket presence server.
//!
//! ```text
//! ws://host:port/?catalog=app&language=fr&userId=u1&displayName=Ana
//!
//! Client A ──┐
//!             ├── RoomRegistry ── PresenceRoom (app/fr) ── outbox per connection
//! Client B ──┘                 └─ PresenceRoom (app/de)
//! ```
//!
//! The handshake query is checked before the upgrade completes: a missing
//! catalog or language is answered with `400`, a missing user with `401`.
//! Each accepted connection owns a bounded outbox; the room only ever
//! `try_send`s into it, so a slow socket cannot stall the room.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use glossa_core::model::{CatalogLocator, Identity};
use glossa_core::{GlossaError, Result as CoreResult};

use crate::presence::{PresenceConfig, RoomError, HEARTBEAT_INTERVAL, STALE_AFTER};
use crate::protocol::{Inbound, ServerMessage};
use crate::registry::RoomRegistry;

pub type ServerError = Box<dyn std::error::Error + Send + Sync>;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Frames queued per connection before it is dropped as slow
    pub outbox_capacity: usize,
    /// Sweep interval in seconds
    pub heartbeat_interval_secs: u64,
    /// Silence tolerated before a connection is purged, in seconds
    pub stale_after_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            outbox_capacity: 256,
            heartbeat_interval_secs: HEARTBEAT_INTERVAL.as_secs(),
            stale_after_secs: STALE_AFTER.as_secs(),
        }
    }
}

impl ServerConfig {
    pub fn presence_config(&self) -> PresenceConfig {
        PresenceConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs.max(1)),
            stale_after: Duration::from_secs(self.stale_after_secs),
            outbox_capacity: self.outbox_capacity.max(1),
        }
    }
}

// ───────────────────────────────────────────────────────────────────
// Handshake
// ───────────────────────────────────────────────────────────────────

/// Raw handshake parameters taken from the upgrade request's query string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectParams {
    pub catalog: Option<String>,
    pub language: Option<String>,
    pub user_id: Option<String>,
    pub display_name: Option<String>,
}

impl ConnectParams {
    pub fn from_query(query: Option<&str>) -> Self {
        let mut params = Self::default();
        let Some(query) = query else {
            return params;
        };
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let value = Some(value.into_owned()).filter(|v| !v.trim().is_empty());
            match name.as_ref() {
                "catalog" => params.catalog = value,
                "language" => params.language = value,
                "userId" => params.user_id = value,
                "displayName" => params.display_name = value,
                _ => {}
            }
        }
        params
    }

    pub fn locator(&self) -> CoreResult<CatalogLocator> {
        match (&self.catalog, &self.language) {
            (Some(catalog), Some(language)) => {
                let locator = CatalogLocator::new(catalog.clone(), language.clone());
                locator.validate()?;
                Ok(locator)
            }
            (None, _) => Err(GlossaError::validation("missing catalog parameter")),
            (_, None) => Err(GlossaError::validation("missing language parameter")),
        }
    }
}

/// Turns handshake parameters into an identity. Supplied to the server
/// explicitly so deployments can plug in their own scheme.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, params: &ConnectParams) -> CoreResult<Identity>;
}

/// Trusts the `userId`/`displayName` query parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAuthenticator;

impl Authenticator for QueryAuthenticator {
    fn authenticate(&self, params: &ConnectParams) -> CoreResult<Identity> {
        let user_id = params
            .user_id
            .clone()
            .ok_or_else(|| GlossaError::Authorization("missing userId parameter".into()))?;
        let display_name = params.display_name.clone().unwrap_or_else(|| user_id.clone());
        let identity = Identity::new(user_id, display_name);
        identity.validate()?;
        Ok(identity)
    }
}

fn admit(
    authenticator: &dyn Authenticator,
    query: Option<&str>,
) -> CoreResult<(CatalogLocator, Identity)> {
    let params = ConnectParams::from_query(query);
    let locator = params.locator()?;
    let identity = authenticator.authenticate(&params)?;
    Ok((locator, identity))
}

fn rejection(error: &GlossaError) -> ErrorResponse {
    let status = match error {
        GlossaError::Authorization(_) => StatusCode::UNAUTHORIZED,
        GlossaError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let mut response = ErrorResponse::new(Some(error.to_string()));
    *response.status_mut() = status;
    response
}

// ───────────────────────────────────────────────────────────────────
// Server
// ───────────────────────────────────────────────────────────────────

/// The presence server.
#[derive(Clone)]
pub struct PresenceServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    authenticator: Arc<dyn Authenticator>,
}

impl PresenceServer {
    pub fn new(config: ServerConfig) -> Self {
        Self::with_authenticator(config, Arc::new(QueryAuthenticator))
    }

    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    pub fn with_authenticator(config: ServerConfig, authenticator: Arc<dyn Authenticator>) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.presence_config()));
        Self {
            config,
            registry,
            authenticator,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.registry.clone()
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Presence server listening on {}", self.config.bind_addr);
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let sweeper = tokio::spawn(Self::sweep_loop(
            self.registry.clone(),
            self.registry.config().heartbeat_interval,
        ));

        let result = loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => break Err(e.into()),
            };
            log::debug!("New TCP connection from {addr}");

            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        };

        sweeper.abort();
        result
    }

    async fn sweep_loop(registry: Arc<RoomRegistry>, every: Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = registry.sweep_stale().await;
            if purged > 0 {
                log::warn!("Purged {purged} stale presence connections");
            }
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), ServerError> {
        let mut admitted: Option<(CatalogLocator, Identity)> = None;
        let authenticator = self.authenticator.clone();
        let callback = |request: &Request, response: Response| {
            match admit(authenticator.as_ref(), request.uri().query()) {
                Ok(accepted) => {
                    admitted = Some(accepted);
                    Ok(response)
                }
                Err(e) => {
                    log::warn!("Rejected handshake from {addr}: {e}");
                    Err(rejection(&e))
                }
            }
        };
        let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
        let Some((locator, identity)) = admitted else {
            return Ok(());
        };
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(self.config.outbox_capacity.max(1));
        let (room, connection_id) = match self.registry.join(&locator, identity, Box::new(out_tx)).await {
            Ok(joined) => joined,
            Err(e) => {
                log::warn!("Connection from {addr} refused by {locator}: {e}");
                let _ = ws_sender.send(Message::Close(None)).await;
                return Ok(());
            }
        };
        log::debug!("WebSocket connection {connection_id} established from {addr}");

        let result = self
            .pump(&room, connection_id, &mut ws_sender, &mut ws_receiver, &mut out_rx)
            .await;

        self.registry.leave(&locator, connection_id).await;
        let _ = ws_sender.close().await;
        log::debug!("Connection {connection_id} from {addr} finished");
        result
    }

    async fn pump<W, R>(
        &self,
        room: &crate::registry::SharedRoom,
        connection_id: uuid::Uuid,
        ws_sender: &mut W,
        ws_receiver: &mut R,
        out_rx: &mut mpsc::Receiver<ServerMessage>,
    ) -> Result<(), ServerError>
    where
        W: futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
        R: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            tokio::select! {
                frame = ws_receiver.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            let inbound = Inbound::parse(text.as_str());
                            match self.registry.handle(room, connection_id, inbound).await {
                                Ok(()) => {}
                                Err(RoomError::NotActive(_)) => break,
                                Err(e) => log::warn!("Room rejected frame from {connection_id}: {e}"),
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.registry.heartbeat(room, connection_id).await;
                            ws_sender.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Err(e)) => {
                            log::warn!("WebSocket error on {connection_id}: {e}");
                            break;
                        }
                        Some(Ok(_)) => {}
                    }
                }

                outbound = out_rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            let text = msg.encode()?;
                            ws_sender.send(Message::Text(text.into())).await?;
                        }
                        // The room dropped this connection (stale or failed sink).
                        None => break,
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.heartbeat_interval_secs, 30);
        assert_eq!(config.stale_after_secs, 120);
        assert_eq!(config.presence_config().stale_after, STALE_AFTER);
    }

    #[test]
    fn test_connect_params_from_query() {
        let params = ConnectParams::from_query(Some(
            "catalog=app&language=pt-BR&userId=u%201&displayName=Ana+Lu&extra=1",
        ));
        assert_eq!(params.catalog.as_deref(), Some("app"));
        assert_eq!(params.language.as_deref(), Some("pt-BR"));
        assert_eq!(params.user_id.as_deref(), Some("u 1"));
        assert_eq!(params.display_name.as_deref(), Some("Ana Lu"));
        assert_eq!(params.locator().unwrap(), CatalogLocator::new("app", "pt-BR"));
    }

    #[test]
    fn test_missing_locator_is_validation() {
        let params = ConnectParams::from_query(Some("catalog=app&userId=u1"));
        assert!(matches!(params.locator(), Err(GlossaError::Validation(_))));
        let params = ConnectParams::from_query(None);
        assert!(matches!(params.locator(), Err(GlossaError::Validation(_))));
    }

    #[test]
    fn test_query_authenticator() {
        let auth = QueryAuthenticator;
        let missing = ConnectParams::from_query(Some("catalog=app&language=fr&userId="));
        assert!(matches!(auth.authenticate(&missing), Err(GlossaError::Authorization(_))));

        let anonymous_name = ConnectParams::from_query(Some("userId=u1"));
        let identity = auth.authenticate(&anonymous_name).unwrap();
        assert_eq!(identity.display_name, "u1");
    }

    #[test]
    fn test_rejection_status() {
        assert_eq!(
            rejection(&GlossaError::validation("x")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            rejection(&GlossaError::Authorization("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_admit_checks_locator_before_identity() {
        let err = admit(&QueryAuthenticator, Some("language=fr")).unwrap_err();
        assert!(matches!(err, GlossaError::Validation(_)));
        let err = admit(&QueryAuthenticator, Some("catalog=app&language=fr")).unwrap_err();
        assert!(matches!(err, GlossaError::Authorization(_)));
    }
}
