// ============================
// aura-backend-lib/src/ws_router.rs
// ============================
//! WebSocket router and connection handling.
use crate::error::AppError;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION};
use crate::storage::RecordStore;
use crate::websocket::ConnectionHandler;
use crate::AppState;
use aura_common::{ChatEvent, ServerEvent};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, error};

/// Capacity of each connection's outbound queue
pub const OUTBOUND_QUEUE_CAPACITY: usize = 32;

/// Create the hub router
pub fn create_router<S: RecordStore>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler::<S>))
        .route("/health", get(health))
        .route("/api/history", get(history::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

async fn history<S: RecordStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<ChatEvent>>, AppError> {
    Ok(Json(state.store.load_history().await?))
}

/// Handler for WebSocket connections
pub async fn ws_handler<S: RecordStore>(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState<S>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection<S: RecordStore>(socket: WebSocket, state: Arc<AppState<S>>) {
    counter!(WS_CONNECTION).increment(1);
    gauge!(WS_ACTIVE).increment(1.0);

    let (mut tx, mut rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerEvent>(OUTBOUND_QUEUE_CAPACITY);

    let handler = ConnectionHandler::new(state, outbound_tx);
    let connection_id = handler.connection_id();
    debug!(%connection_id, "connection opened");

    // Drain the outbound queue into the socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    error!(%connection_id, error = %e, "failed to serialize server event");
                    continue;
                },
            };
            if tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = rx.next().await {
        match message {
            Message::Text(text) => handler.handle_text(text.as_str()).await,
            Message::Close(_) => break,
            _ => {},
        }
    }

    handler.disconnect().await;
    debug!(%connection_id, "connection closed");

    gauge!(WS_ACTIVE).decrement(1.0);
    send_task.abort();
}
