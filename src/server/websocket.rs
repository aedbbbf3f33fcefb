//! Real-time sync endpoint.
//!
//! `GET /sync/realtime?device_id=..&token=..` upgrades to a WebSocket. Each
//! connection registers a [`ChannelSink`] with the registry; a writer task
//! drains it into the socket while the read loop hands text frames to the
//! registry. A wrong token closes the socket with code 4001.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::sync::core::ids::DeviceId;
use crate::sync::realtime::sink::ChannelSink;

use super::state::AppState;

/// Close code sent when the token does not match the API key.
pub const INVALID_TOKEN_CLOSE_CODE: u16 = 4001;

/// Query parameters of the real-time endpoint.
#[derive(Debug, Deserialize)]
pub struct RealtimeParams {
    /// Device opening the session.
    pub device_id: String,
    /// Shared API key; optional for local clients.
    pub token: Option<String>,
}

/// Upgrade to a WebSocket session.
#[allow(clippy::unused_async)] // Required for axum handler
pub async fn realtime_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<RealtimeParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let device_id = match DeviceId::new(&params.device_id) {
        Ok(device_id) => device_id,
        Err(err) => return (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    };
    let authorized = token_accepted(params.token.as_deref(), &state.api_key);

    ws.on_upgrade(move |socket| async move {
        if authorized {
            handle_socket(socket, state, device_id).await;
        } else {
            reject(socket, &device_id).await;
        }
    })
}

/// An absent token is accepted; a present one must match the API key.
fn token_accepted(token: Option<&str>, api_key: &str) -> bool {
    token.is_none_or(|token| token == api_key)
}

async fn reject(mut socket: WebSocket, device_id: &DeviceId) {
    warn!(device = %device_id, "Real-time connection with invalid token");
    let frame = CloseFrame {
        code: INVALID_TOKEN_CLOSE_CODE,
        reason: "invalid token".into(),
    };
    if let Err(err) = socket.send(Message::Close(Some(frame))).await {
        debug!(error = %err, "Failed to send close frame");
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, device_id: DeviceId) {
    let (mut sender, mut receiver) = socket.split();
    let (sink, mut outbound) = ChannelSink::channel();
    let registry = Arc::clone(state.orchestrator.registry());
    let connection_id = registry.connect(device_id, Arc::new(sink));

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match message.encode() {
                Ok(json) => json,
                Err(err) => {
                    error!(error = %err, "Failed to encode message");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                debug!("Failed to send message, client disconnected");
                break;
            }
        }
    });

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => registry.handle_message(connection_id, text.as_str()).await,
            Ok(Message::Close(_)) => {
                debug!(%connection_id, "Client sent close message");
                break;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%connection_id, error = %err, "WebSocket error");
                break;
            }
        }
    }

    registry.disconnect(connection_id);
    writer.abort();
}
