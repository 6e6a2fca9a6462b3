use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;

use super::state::AppState;
use crate::events::{ClientMessage, ServerEvent};

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(client_id): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!("WebSocket connection request from client: {}", client_id);
    ws.on_upgrade(move |socket| handle_socket(socket, client_id, state))
}

async fn handle_socket(socket: WebSocket, client_id: String, state: Arc<AppState>) {
    tracing::info!("WebSocket connected: {}", client_id);

    let (mut sender, mut receiver) = socket.split();

    // Late joiners get the current queue state immediately.
    let status = state.queue.status().await;
    let hello = ServerEvent::QueueStatus {
        state: status.state,
        remaining: status.remaining,
        current_index: status.current_index,
        next_instruction: status.next_instruction,
    };
    if let Ok(json) = serde_json::to_string(&hello) {
        let _ = sender.send(Message::Text(json.into())).await;
    }

    // Forward broadcast events to this client.
    let mut rx = state.subscribe();
    let send_task = tokio::spawn(async move {
        loop {
            let event = match rx.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("WebSocket client lagged, {} events dropped", skipped);
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(_) => continue,
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Dispatch incoming client messages.
    let state_clone = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => state_clone.handle_client_message(message).await,
                    Err(e) => {
                        tracing::debug!("Unparseable client message: {}", e);
                        state_clone
                            .broadcaster
                            .publish(ServerEvent::error("Unrecognized message".to_string()));
                    }
                }
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    tracing::info!("WebSocket disconnected: {}", client_id);
}
