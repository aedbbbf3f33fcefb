//! Registry of live real-time sessions and the router fanning messages out
//! to them.
//!
//! The registry holds no message history: a device offline at broadcast time
//! catches up through delta sync.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::sync::core::errors::SyncError;
use crate::sync::core::ids::{ConnectionId, DeviceId};
use crate::sync::realtime::protocol::{ClientMessage, ServerMessage, parse_timestamp};
use crate::sync::realtime::sink::SessionSink;

struct SessionEntry {
    device_id: DeviceId,
    sink: Arc<dyn SessionSink>,
}

type Target = (ConnectionId, DeviceId, Arc<dyn SessionSink>);

/// Live sessions keyed by connection id.
#[derive(Default)]
pub struct ConnectionRegistry {
    sessions: DashMap<ConnectionId, SessionEntry>,
    last_sync: DashMap<DeviceId, DateTime<Utc>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handshaken session for `device_id`.
    ///
    /// Records the current time as the device's last sync.
    pub fn connect(&self, device_id: DeviceId, sink: Arc<dyn SessionSink>) -> ConnectionId {
        let connection_id = ConnectionId::new();
        self.last_sync.insert(device_id.clone(), Utc::now());
        info!(%connection_id, device = %device_id, "Device connected");
        self.sessions.insert(connection_id, SessionEntry { device_id, sink });
        connection_id
    }

    /// Remove a session. Returns `false` if it was not registered.
    pub fn disconnect(&self, connection_id: ConnectionId) -> bool {
        match self.sessions.remove(&connection_id) {
            Some((_, entry)) => {
                info!(%connection_id, device = %entry.device_id, "Device disconnected");
                true
            }
            None => false,
        }
    }

    /// Deliver to every session of `device_id`. Returns the delivery count.
    pub async fn unicast(&self, device_id: &DeviceId, message: &ServerMessage) -> usize {
        let targets = self.targets(|device| device == device_id);
        self.deliver(targets, message).await
    }

    /// Deliver to every session except those of `exclude_device`.
    /// Returns the delivery count.
    pub async fn broadcast(
        &self,
        message: &ServerMessage,
        exclude_device: Option<&DeviceId>,
    ) -> usize {
        let targets = self.targets(|device| Some(device) != exclude_device);
        self.deliver(targets, message).await
    }

    /// Handle one text frame received on `connection_id`, replying on the
    /// same session when the protocol calls for it.
    pub async fn handle_message(&self, connection_id: ConnectionId, raw: &str) {
        let Some((device_id, sink)) = self
            .sessions
            .get(&connection_id)
            .map(|entry| (entry.device_id.clone(), Arc::clone(&entry.sink)))
        else {
            debug!(%connection_id, "Message for unknown session ignored");
            return;
        };

        let message = match ClientMessage::decode(raw) {
            Ok(message) => message,
            Err(err) => {
                warn!(device = %device_id, error = %err, "Malformed message ignored");
                return;
            }
        };

        let Some(reply) = self.respond(&device_id, message) else {
            return;
        };
        if let Err(err) = sink.send(&reply).await {
            warn!(device = %device_id, error = %err, "Failed to reply");
        }
    }

    /// Apply a decoded message and produce the reply, if any.
    fn respond(&self, device_id: &DeviceId, message: ClientMessage) -> Option<ServerMessage> {
        match message {
            ClientMessage::Ping => Some(ServerMessage::Pong),
            ClientMessage::SyncRequest { last_sync } => {
                if let Some(raw) = last_sync {
                    match parse_timestamp(&raw) {
                        Some(at) => {
                            self.last_sync.insert(device_id.clone(), at);
                        }
                        None => debug!(device = %device_id, last_sync = %raw, "Unparseable last_sync"),
                    }
                }
                Some(ServerMessage::SyncAck {
                    timestamp: Utc::now(),
                })
            }
            ClientMessage::Unknown(kind) => {
                warn!(device = %device_id, kind = %kind, "Unknown message type");
                None
            }
        }
    }

    /// Distinct devices with at least one live session.
    #[must_use]
    pub fn connected_devices(&self) -> HashSet<DeviceId> {
        self.sessions
            .iter()
            .map(|entry| entry.device_id.clone())
            .collect()
    }

    /// Whether `device_id` has at least one live session.
    #[must_use]
    pub fn is_connected(&self, device_id: &DeviceId) -> bool {
        self.sessions
            .iter()
            .any(|entry| &entry.device_id == device_id)
    }

    /// Number of live sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Last sync time recorded for `device_id`.
    #[must_use]
    pub fn last_sync(&self, device_id: &DeviceId) -> Option<DateTime<Utc>> {
        self.last_sync.get(device_id).map(|at| *at)
    }

    /// Snapshot matching sessions so no map guard is held while sending.
    fn targets(&self, include: impl Fn(&DeviceId) -> bool) -> Vec<Target> {
        self.sessions
            .iter()
            .filter(|entry| include(&entry.device_id))
            .map(|entry| {
                (
                    *entry.key(),
                    entry.device_id.clone(),
                    Arc::clone(&entry.sink),
                )
            })
            .collect()
    }

    async fn deliver(&self, targets: Vec<Target>, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        for (connection_id, device_id, sink) in targets {
            match sink.send(message).await {
                Ok(()) => delivered += 1,
                Err(SyncError::SessionClosed) => {
                    warn!(%connection_id, device = %device_id, "Session closed, pruning");
                    self.disconnect(connection_id);
                }
                Err(err) => {
                    error!(%connection_id, device = %device_id, error = %err, "Delivery failed");
                }
            }
        }
        delivered
    }
}
