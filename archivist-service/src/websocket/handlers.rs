//! WebSocket message handlers.
//!
//! Contains the logic for handling incoming notification sockets
//! and processing client messages.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::manager::NotificationHub;
use super::messages::{ClientMessage, ServerMessage};

/// Handle a notification socket
///
/// The connection is subscribed to all document events until the client
/// narrows or cancels the subscription.
pub async fn handle_ws_connection(socket: WebSocket, hub: Arc<NotificationHub>) {
    let session_id = uuid::Uuid::new_v4().to_string();
    info!(session_id = %session_id, "New notification connection");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (msg_tx, mut msg_rx) = mpsc::unbounded_channel::<ServerMessage>();

    hub.add_connection(session_id.clone(), msg_tx);

    // Forward queued messages to the socket
    let session_id_clone = session_id.clone();
    let send_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to serialize WebSocket message");
                }
            }
        }
        debug!(session_id = %session_id_clone, "WebSocket send task ended");
    });

    while let Some(result) = ws_rx.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_client_message(&session_id, &text, &hub);
            }
            Ok(Message::Binary(data)) => {
                if let Ok(text) = String::from_utf8(data.to_vec()) {
                    handle_client_message(&session_id, &text, &hub);
                }
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(session_id = %session_id, "Notification connection closed by client");
                break;
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    hub.remove_connection(&session_id);
    send_task.abort();
    info!(session_id = %session_id, "Notification connection closed");
}

/// Handle a client message
pub(crate) fn handle_client_message(session_id: &str, text: &str, hub: &NotificationHub) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(
                session_id = %session_id,
                error = %e,
                text = %text,
                "Failed to parse client message"
            );
            hub.send_to(
                session_id,
                ServerMessage::Error {
                    code: "parse_error".to_string(),
                    message: format!("Failed to parse message: {}", e),
                    recoverable: true,
                },
            );
            return;
        }
    };

    match msg {
        ClientMessage::Subscribe { workspace_id } => {
            let workspace_id = workspace_id.filter(|w| !w.is_empty());
            hub.set_subscription(session_id, true, workspace_id.clone());
            hub.send_to(
                session_id,
                ServerMessage::Subscribed {
                    active: true,
                    workspace_id,
                },
            );
        }
        ClientMessage::Unsubscribe => {
            hub.set_subscription(session_id, false, None);
            hub.send_to(
                session_id,
                ServerMessage::Subscribed {
                    active: false,
                    workspace_id: None,
                },
            );
        }
        ClientMessage::Ping => {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0);

            hub.send_to(session_id, ServerMessage::Pong { timestamp });
        }
    }
}
