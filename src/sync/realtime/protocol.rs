//! Real-time wire protocol.
//!
//! Messages are JSON objects tagged by a `type` field:
//!
//! ```json
//! // Client → Server
//! {"type": "ping"}
//! {"type": "sync_request", "last_sync": "2024-05-01T10:00:00Z"}
//!
//! // Server → Client
//! {"type": "pong"}
//! {"type": "sync_ack", "timestamp": "2024-05-01T10:00:01Z"}
//! {"type": "memory_updated", "memory_id": "uuid", "device_id": "laptop"}
//! ```

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::sync::core::errors::SyncResult;
use crate::sync::core::ids::{DeviceId, MemoryId};

/// Message received from a device, decoded once at the socket boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientMessage {
    /// Liveness probe.
    Ping,
    /// The device reports its sync watermark.
    SyncRequest {
        /// Raw watermark as sent; parsed leniently by the registry.
        last_sync: Option<String>,
    },
    /// Well-formed JSON with a `type` the server does not know.
    Unknown(String),
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownClientMessage {
    Ping,
    SyncRequest {
        #[serde(default)]
        last_sync: Option<String>,
    },
}

impl ClientMessage {
    /// Decode a text frame.
    ///
    /// # Errors
    /// Returns an error if the frame is not JSON or a known message type has
    /// the wrong shape.
    pub fn decode(raw: &str) -> SyncResult<Self> {
        let value: Value = serde_json::from_str(raw)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match kind.as_str() {
            "ping" | "sync_request" => Ok(match serde_json::from_value(value)? {
                KnownClientMessage::Ping => Self::Ping,
                KnownClientMessage::SyncRequest { last_sync } => Self::SyncRequest { last_sync },
            }),
            _ => Ok(Self::Unknown(kind)),
        }
    }
}

/// Message pushed by the server.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Reply to `ping`.
    Pong,
    /// Reply to `sync_request`.
    SyncAck {
        /// Server time when the request was handled.
        timestamp: DateTime<Utc>,
    },
    /// A memory finished processing or changed.
    MemoryUpdated {
        /// Memory that changed.
        memory_id: MemoryId,
        /// Device owning the memory.
        device_id: DeviceId,
    },
}

impl ServerMessage {
    /// Encode as a JSON text frame.
    ///
    /// # Errors
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> SyncResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse an ISO 8601 timestamp; naive timestamps are taken as UTC.
#[must_use]
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_ping() {
        assert_eq!(ClientMessage::decode(r#"{"type":"ping"}"#).unwrap(), ClientMessage::Ping);
    }

    #[test]
    fn test_decode_sync_request_with_and_without_watermark() {
        assert_eq!(
            ClientMessage::decode(r#"{"type":"sync_request","last_sync":"2024-05-01T10:00:00Z"}"#)
                .unwrap(),
            ClientMessage::SyncRequest {
                last_sync: Some("2024-05-01T10:00:00Z".to_string())
            }
        );
        assert_eq!(
            ClientMessage::decode(r#"{"type":"sync_request"}"#).unwrap(),
            ClientMessage::SyncRequest { last_sync: None }
        );
    }

    #[test]
    fn test_decode_unknown_and_missing_type() {
        assert_eq!(
            ClientMessage::decode(r#"{"type":"subscribe"}"#).unwrap(),
            ClientMessage::Unknown("subscribe".to_string())
        );
        assert_eq!(
            ClientMessage::decode(r#"{"hello":1}"#).unwrap(),
            ClientMessage::Unknown(String::new())
        );
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(ClientMessage::decode("not json").is_err());
        assert!(ClientMessage::decode(r#"{"type":"sync_request","last_sync":42}"#).is_err());
    }

    #[test]
    fn test_server_message_shapes() {
        let pong: Value = serde_json::from_str(&ServerMessage::Pong.encode().unwrap()).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "pong"}));

        let memory_id = MemoryId::new();
        let updated = ServerMessage::MemoryUpdated {
            memory_id,
            device_id: DeviceId::new("A").unwrap(),
        };
        let value: Value = serde_json::from_str(&updated.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "memory_updated",
                "memory_id": memory_id.to_string(),
                "device_id": "A"
            })
        );

        let ack: Value = serde_json::from_str(
            &ServerMessage::SyncAck {
                timestamp: Utc::now(),
            }
            .encode()
            .unwrap(),
        )
        .unwrap();
        assert_eq!(ack["type"], "sync_ack");
        assert!(parse_timestamp(ack["timestamp"].as_str().unwrap()).is_some());
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert!(parse_timestamp("2024-05-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp("2024-05-01T10:00:00.123456").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
