//! Presence channel wire protocol.
//!
//! One JSON object per WebSocket text frame, discriminated by `type`:
//!
//! ```text
//! client → room   {"type":"startEdit","key":"greeting"}
//!                 {"type":"endEdit","key":"greeting"}
//!                 {"type":"ping"}
//!
//! room → client   {"type":"connected","connectionId":"…"}
//!                 {"type":"userStartedEditing","key":"…","userId":"…","displayName":"…"}
//!                 {"type":"userStoppedEditing","key":"…","userId":"…","displayName":"…"}
//!                 {"type":"userDisconnected","userId":"…","displayName":"…"}
//!                 {"type":"pong"}
//!                 {"type":"error","message":"…"}
//! ```
//!
//! Anything that does not decode into [`ClientMessage`] becomes
//! [`Inbound::Unrecognized`], which the room answers with an `error` frame
//! to the sender only.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    StartEdit { key: String },
    EndEdit { key: String },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Connected {
        connection_id: Uuid,
    },
    UserStartedEditing {
        key: String,
        user_id: String,
        display_name: String,
    },
    UserStoppedEditing {
        key: String,
        user_id: String,
        display_name: String,
    },
    UserDisconnected {
        user_id: String,
        display_name: String,
    },
    Pong,
    Error {
        message: String,
    },
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Message(ClientMessage),
    Unrecognized { reason: String },
}

impl Inbound {
    pub fn parse(text: &str) -> Self {
        match ClientMessage::decode(text) {
            Ok(msg) => Inbound::Message(msg),
            Err(e) => Inbound::Unrecognized {
                reason: e.to_string(),
            },
        }
    }
}

impl ClientMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Deserialization(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Deserialization error: {0}")]
    Deserialization(String),
    #[error("Handshake rejected: {0}")]
    Handshake(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection timeout")]
    Timeout,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_frames() {
        assert_eq!(
            Inbound::parse(r#"{"type":"startEdit","key":"greeting"}"#),
            Inbound::Message(ClientMessage::StartEdit {
                key: "greeting".into()
            })
        );
        assert_eq!(
            Inbound::parse(r#"{"type":"ping"}"#),
            Inbound::Message(ClientMessage::Ping)
        );
    }

    #[test]
    fn test_unknown_type_is_unrecognized() {
        assert!(matches!(
            Inbound::parse(r#"{"type":"deleteEverything"}"#),
            Inbound::Unrecognized { .. }
        ));
        assert!(matches!(Inbound::parse("not json"), Inbound::Unrecognized { .. }));
        assert!(matches!(
            Inbound::parse(r#"{"type":"startEdit"}"#),
            Inbound::Unrecognized { .. }
        ));
    }

    #[test]
    fn test_server_frame_field_names() {
        let msg = ServerMessage::UserStartedEditing {
            key: "greeting".into(),
            user_id: "u1".into(),
            display_name: "Ana".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "userStartedEditing",
                "key": "greeting",
                "userId": "u1",
                "displayName": "Ana",
            })
        );

        let id = Uuid::new_v4();
        let value: serde_json::Value =
            serde_json::from_str(&ServerMessage::Connected { connection_id: id }.encode().unwrap())
                .unwrap();
        assert_eq!(value["connectionId"], id.to_string());
        assert_eq!(ServerMessage::Pong.encode().unwrap(), r#"{"type":"pong"}"#);
    }

    #[test]
    fn test_server_decode_for_clients() {
        let decoded = ServerMessage::decode(r#"{"type":"error","message":"bad frame"}"#).unwrap();
        assert_eq!(decoded, ServerMessage::error("bad frame"));
    }
}
