//! Outbound side of a real-time session.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::warn;

use crate::sync::core::errors::{SyncError, SyncResult};
use crate::sync::realtime::protocol::ServerMessage;

/// Boxed future type for sink operations.
pub type SinkFuture<'a> = Pin<Box<dyn Future<Output = SyncResult<()>> + Send + 'a>>;

/// Transport handle able to push messages to one connected client.
pub trait SessionSink: Send + Sync {
    /// Send one message.
    ///
    /// # Errors
    /// Returns [`SyncError::SessionClosed`] once the client is gone, or
    /// another error if this particular delivery failed.
    fn send(&self, message: &ServerMessage) -> SinkFuture<'_>;
}

/// Sink feeding a per-connection writer task through a bounded channel.
#[derive(Clone, Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<ServerMessage>,
}

impl ChannelSink {
    /// Outbound buffer per connection.
    pub const BUFFER: usize = 256;

    /// Create a sink and the receiver the writer task drains.
    #[must_use]
    pub fn channel() -> (Self, mpsc::Receiver<ServerMessage>) {
        let (tx, rx) = mpsc::channel(Self::BUFFER);
        (Self { tx }, rx)
    }
}

impl SessionSink for ChannelSink {
    /// Never waits on the writer: a full buffer drops the message.
    fn send(&self, message: &ServerMessage) -> SinkFuture<'_> {
        let result = match self.tx.try_send(message.clone()) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Outbound buffer full, dropping message");
                Err(SyncError::Delivery("outbound buffer full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SyncError::SessionClosed),
        };
        Box::pin(async move { result })
    }
}
