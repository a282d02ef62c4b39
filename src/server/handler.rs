//! WebSocket connection handlers.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{sink::SinkExt, stream::StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::ClientEvent;
use super::state::AppState;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    // Connection identity is opaque and server-generated; nothing from the
    // client is trusted for identity.
    let connection_id = Uuid::new_v4();

    // Create a channel for this connection to receive coordinator events
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.on_connect(connection_id, tx).await;
    tracing::info!("Connection '{}' established", connection_id);

    let (mut sender, mut receiver) = socket.split();

    let recv_state = Arc::clone(&state);
    // Receive events from this client and dispatch them to the coordinator
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::error!("WebSocket error: {}", e);
                    break;
                }
            };

            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => recv_state.on_event(connection_id, event).await,
                    Err(e) => {
                        // Malformed frames are dropped, never fatal
                        tracing::warn!(
                            "Dropping unparseable frame from '{}': {}",
                            connection_id,
                            e
                        );
                    }
                },
                Message::Close(_) => {
                    tracing::info!("Connection '{}' requested close", connection_id);
                    break;
                }
                Message::Ping(_) => {
                    tracing::debug!("Received ping");
                    // Ping/pong is handled automatically by the WebSocket protocol
                }
                _ => {}
            }
        }
    });

    // Forward coordinator events to this client's socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // If any one of the tasks completes, abort the other
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    state.on_disconnect(connection_id).await;
    tracing::info!("Connection '{}' closed", connection_id);
}

/// Health check endpoint
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}
