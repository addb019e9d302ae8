//! # Downstream WebSocket Server
//!
//! The subscriber-serving worker. Each WebSocket connection on `/ws` becomes one hub
//! subscriber; its task forwards queued payloads to the socket until the peer goes
//! away, a send stalls past `send_timeout`, the hub drops it, or shutdown is
//! signaled. `/health` reports liveness and the current subscriber count.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;

use crate::core::errors::StartupError;
use crate::core::hub::{BroadcastHub, Subscription};
use crate::core::shutdown::ShutdownCoordinator;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct DownstreamState {
    /// The hub subscribers register with.
    pub hub: Arc<BroadcastHub>,
    /// Stop signal; closes every connection and the listener.
    pub shutdown: ShutdownCoordinator,
    /// Upper bound on a single socket write.
    pub send_timeout: Duration,
}

/// Binds the listening socket. Failure here is fatal for startup.
pub async fn bind(addr: &str) -> Result<TcpListener, StartupError> {
    TcpListener::bind(addr).await.map_err(|source| StartupError::Bind {
        addr: addr.to_string(),
        source,
    })
}

/// Routes served by the push server.
pub fn router(state: DownstreamState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serves subscribers until shutdown is signaled.
pub async fn serve(listener: TcpListener, state: DownstreamState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Downstream server listening on ws://{}/ws", addr);
    }

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown.cancelled().await;
        tracing::info!("Downstream server shutting down.");
    })
    .await
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(state): State<DownstreamState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer))
}

async fn health_handler(State(state): State<DownstreamState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "subscribers": state.hub.subscriber_count(),
    }))
}

async fn handle_socket(socket: WebSocket, state: DownstreamState, peer: SocketAddr) {
    let Subscription { id, mut receiver } = state.hub.connect(peer.to_string());
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = tokio::time::timeout(state.send_timeout, sink.send(Message::Close(None))).await;
                break;
            }
            // Subscribers only listen; inbound traffic matters only for detecting a close.
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(subscriber = id, %peer, "Socket read error: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            queued = receiver.recv() => {
                let Some(text) = queued else {
                    // The hub removed us (queue overflow); nothing more will arrive.
                    tracing::info!(subscriber = id, %peer, "Dropped by hub, closing socket");
                    break;
                };
                match tokio::time::timeout(state.send_timeout, sink.send(Message::Text(text.to_string().into()))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        tracing::warn!(subscriber = id, %peer, "Send failed: {}", e);
                        break;
                    }
                    Err(_) => {
                        tracing::warn!(subscriber = id, %peer, "Send timed out after {} ms", state.send_timeout.as_millis());
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(id);
}
