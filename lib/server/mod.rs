pub mod monitoring;

use crate::state::AppState;
use prometheus_client::encoding::text::encode;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::{extract::State, routing::get, Router};
use log::{debug, warn};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> String {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).unwrap();
    buffer
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| forward_notifications(socket, state))
}

/// Relays gateway events to one WebSocket client until it disconnects or the
/// server shuts down. Clients filter by channel name on their side.
async fn forward_notifications(mut socket: WebSocket, state: Arc<AppState>) {
    let mut events = state.gateway.subscribe();
    loop {
        tokio::select! {
            _ = state.shutdown_token.cancelled() => break,
            event = events.recv() => match event {
                Ok(notification) => {
                    let frame = json!({
                        "channel": notification.channel,
                        "payload": notification.payload,
                    });
                    if socket.send(Message::Text(frame.to_string())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("WebSocket client lagged, {skipped} notifications dropped");
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                // Inbound frames (pings etc.) are consumed and ignored.
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
    debug!("WebSocket session closed");
}

pub async fn setup_server(state: Arc<AppState>, addr: SocketAddr) -> tokio::task::JoinHandle<()> {
    let shutdown_token = state.shutdown_token.clone();
    let app = Router::new()
        .route("/", get(|| async { "portal-backend" }))
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let server_handle = tokio::spawn(async move {
        axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .with_graceful_shutdown(async {
                shutdown_token.cancelled().await;
            })
            .await
            .unwrap();
    });

    server_handle
}
