//! Agent transport over WebSocket.
//!
//! Each upgraded socket gets its own task and its own [`Session`]. Every
//! text or binary frame carries one JSON `AgentToServer` document; each
//! reply goes back as one text frame. The socket is closed after
//! `websocket_timeout_seconds` without inbound traffic.
//!
//! [`Session`]: fleetwatch_control::Session

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use fleetwatch_control::protocol::{self, MAX_MESSAGE_BYTES};
use fleetwatch_control::{ConnectionId, FleetControl, SessionHandler};

use crate::state::GatewayState;

/// Upgrade an agent connection.
pub async fn opamp_handler<C>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState<C>>>,
) -> Response
where
    C: FleetControl + 'static,
{
    let sessions = state.control.sessions();
    let idle_timeout = state.config.websocket_timeout();

    ws.max_message_size(MAX_MESSAGE_BYTES)
        .on_upgrade(move |socket| serve_agent(socket, sessions, idle_timeout))
}

/// Drive one agent session until either side goes away.
async fn serve_agent(socket: WebSocket, sessions: Arc<SessionHandler>, idle_timeout: Duration) {
    let connection_id = ConnectionId::generate();
    let mut session = match sessions.connect(connection_id) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(connection_id = %connection_id, error = %e, "Failed to register connection");
            return;
        }
    };
    tracing::info!(connection_id = %connection_id, "Agent connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        let message = match tokio::time::timeout(idle_timeout, receiver.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "Socket error");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                tracing::info!(connection_id = %connection_id, "Closing idle agent connection");
                break;
            }
        };

        let reply = match message {
            Message::Text(text) => sessions.handle_frame(&mut session, text.as_str().as_bytes()),
            Message::Binary(data) => sessions.handle_frame(&mut session, &data),
            Message::Ping(_) | Message::Pong(_) => continue,
            Message::Close(_) => {
                tracing::debug!(connection_id = %connection_id, "Agent closed connection");
                break;
            }
        };

        if let Some(reply) = reply {
            match protocol::encode(&reply) {
                Ok(json) => {
                    if let Err(e) = sender.send(Message::Text(json.into())).await {
                        tracing::debug!(connection_id = %connection_id, error = %e, "Failed to send reply");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(connection_id = %connection_id, error = %e, "Failed to encode reply");
                }
            }
        }

        if session.is_closed() {
            break;
        }
    }

    sessions.disconnect(&mut session);
    let _ = sender.close().await;
}
