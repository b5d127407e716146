//! Integration tests for the presence WebSocket server.
//!
//! Verifies:
//! - Handshake validation (400 for a missing catalog/language, 401 for a missing user)
//! - The `connected` greeting and connection state on the client
//! - Presence symmetry: one `userStartedEditing` per other connection, none to the sender
//! - No retroactive notification for later joiners
//! - Room isolation between languages
//! - Malformed frames answered with `error` to the sender only
//! - `userDisconnected` on close and on staleness

use glossa_collab::client::{ConnectionState, PresenceClient, PresenceEvent};
use glossa_collab::protocol::ProtocolError;
use glossa_collab::server::{PresenceServer, ServerConfig};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::Message;

async fn start_server_with(config: ServerConfig) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = PresenceServer::new(ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        ..config
    });
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });
    format!("ws://127.0.0.1:{port}/")
}

async fn start_test_server() -> String {
    start_server_with(ServerConfig::default()).await
}

async fn join(
    url: &str,
    language: &str,
    user: &str,
) -> (PresenceClient, mpsc::Receiver<PresenceEvent>) {
    let mut client = PresenceClient::new(url, "app", language, user, user.to_uppercase());
    let events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    (client, events)
}

async fn next_event(events: &mut mpsc::Receiver<PresenceEvent>) -> PresenceEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

/// Round-trips a ping and asserts nothing else was queued before the pong.
async fn assert_quiet(client: &PresenceClient, events: &mut mpsc::Receiver<PresenceEvent>) {
    client.ping().await.unwrap();
    assert_eq!(next_event(events).await, PresenceEvent::Pong);
}

// ─── Handshake ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_client_connects_and_is_greeted() {
    let url = start_test_server().await;
    let mut client = PresenceClient::new(&url, "app", "fr", "u1", "Ana");
    let connection_id = client.connect().await.unwrap();
    assert_eq!(client.connection_id(), Some(connection_id));
    assert_eq!(client.connection_state().await, ConnectionState::Connected);
}

#[tokio::test]
async fn test_missing_language_is_rejected_with_400() {
    let url = start_test_server().await;
    let result = tokio_tungstenite::connect_async(format!("{url}?catalog=app&userId=u1")).await;
    match result {
        Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
            assert_eq!(response.status().as_u16(), 400);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_user_is_rejected_with_401() {
    let url = start_test_server().await;
    let mut client = PresenceClient::new(&url, "app", "fr", "", "Nobody");
    match client.connect().await {
        Err(ProtocolError::Handshake(status)) => assert!(status.starts_with("401"), "{status}"),
        other => panic!("expected handshake rejection, got {other:?}"),
    }
    assert_eq!(client.connection_state().await, ConnectionState::Disconnected);
}

// ─── Presence ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_edit_reaches_every_other_connection_once() {
    let url = start_test_server().await;
    let (a, mut events_a) = join(&url, "fr", "a").await;
    let (b, mut events_b) = join(&url, "fr", "b").await;
    let (c, mut events_c) = join(&url, "fr", "c").await;

    a.start_edit("greeting").await.unwrap();

    let expected = PresenceEvent::StartedEditing {
        key: "greeting".into(),
        user_id: "a".into(),
        display_name: "A".into(),
    };
    assert_eq!(next_event(&mut events_b).await, expected);
    assert_eq!(next_event(&mut events_c).await, expected);

    assert_quiet(&a, &mut events_a).await;
    assert_quiet(&b, &mut events_b).await;
    assert_quiet(&c, &mut events_c).await;
}

#[tokio::test]
async fn test_later_joiner_is_not_notified_retroactively() {
    let url = start_test_server().await;
    let (a, _events_a) = join(&url, "fr", "a").await;
    let (_b, mut events_b) = join(&url, "fr", "b").await;

    a.start_edit("greeting").await.unwrap();
    assert!(matches!(
        next_event(&mut events_b).await,
        PresenceEvent::StartedEditing { .. }
    ));

    let (d, mut events_d) = join(&url, "fr", "d").await;
    assert_quiet(&d, &mut events_d).await;
}

#[tokio::test]
async fn test_end_edit_is_broadcast() {
    let url = start_test_server().await;
    let (a, _events_a) = join(&url, "fr", "a").await;
    let (_b, mut events_b) = join(&url, "fr", "b").await;

    a.start_edit("greeting").await.unwrap();
    a.end_edit("greeting").await.unwrap();

    assert!(matches!(
        next_event(&mut events_b).await,
        PresenceEvent::StartedEditing { .. }
    ));
    assert_eq!(
        next_event(&mut events_b).await,
        PresenceEvent::StoppedEditing {
            key: "greeting".into(),
            user_id: "a".into(),
            display_name: "A".into(),
        }
    );
}

#[tokio::test]
async fn test_rooms_are_isolated_by_language() {
    let url = start_test_server().await;
    let (a, _events_a) = join(&url, "fr", "a").await;
    let (de, mut events_de) = join(&url, "de", "b").await;

    a.start_edit("greeting").await.unwrap();
    assert_quiet(&de, &mut events_de).await;
}

#[tokio::test]
async fn test_malformed_frame_gets_error_and_connection_survives() {
    let url = start_test_server().await;
    let (a, mut events_a) = join(&url, "fr", "a").await;
    let (b, mut events_b) = join(&url, "fr", "b").await;

    a.send_raw(Message::Text(r#"{"type":"renameCatalog"}"#.into()))
        .await
        .unwrap();
    assert!(matches!(next_event(&mut events_a).await, PresenceEvent::Error(_)));

    assert_quiet(&a, &mut events_a).await;
    assert_quiet(&b, &mut events_b).await;
}

// ─── Disconnects ────────────────────────────────────────────────────

#[tokio::test]
async fn test_disconnect_is_broadcast() {
    let url = start_test_server().await;
    let (a, mut events_a) = join(&url, "fr", "a").await;
    let (mut b, _events_b) = join(&url, "fr", "b").await;

    b.start_edit("greeting").await.unwrap();
    assert!(matches!(
        next_event(&mut events_a).await,
        PresenceEvent::StartedEditing { .. }
    ));

    b.disconnect().await.unwrap();
    assert_eq!(
        next_event(&mut events_a).await,
        PresenceEvent::UserLeft {
            user_id: "b".into(),
            display_name: "B".into(),
        }
    );
    assert_quiet(&a, &mut events_a).await;
}

#[tokio::test]
async fn test_silent_connection_is_purged() {
    let url = start_server_with(ServerConfig {
        heartbeat_interval_secs: 1,
        stale_after_secs: 1,
        ..ServerConfig::default()
    })
    .await;
    let (_silent, mut silent_events) = join(&url, "fr", "silent").await;
    let (talker, mut talker_events) = join(&url, "fr", "talker").await;

    let left = timeout(Duration::from_secs(6), async {
        loop {
            talker.ping().await.unwrap();
            match timeout(Duration::from_millis(250), talker_events.recv()).await {
                Ok(Some(PresenceEvent::UserLeft { user_id, .. })) => return user_id,
                Ok(Some(_)) | Err(_) => {}
                Ok(None) => panic!("talker lost its connection"),
            }
        }
    })
    .await
    .expect("stale connection purged");
    assert_eq!(left, "silent");

    let ended = timeout(Duration::from_secs(2), silent_events.recv()).await.unwrap();
    assert_eq!(ended, Some(PresenceEvent::Disconnected));
}
