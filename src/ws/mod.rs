//! WebSocket transport broadcasting domain events to subscribed clients.
//!
//! ## Connection lifecycle
//!
//! 1. Client connects to `GET /api/ws`.
//! 2. Every [`crate::events::DomainEvent`] published on the shared bus is
//!    forwarded as a JSON frame.
//! 3. Client keepalive: clients send `{"type":"ping"}` roughly every 30s;
//!    the server replies `{"type":"pong"}`. Any other incoming message is
//!    ignored rather than rejected — this endpoint is receive-light by
//!    design, all real commands go through the HTTP surface.
//! 4. Disconnect (client close, or socket error) tears down the connection's
//!    background send task.

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::error;

use crate::events::Recv;
use crate::state::AppState;

/// `GET /api/ws` — WebSocket upgrade handler.
pub async fn ws_upgrade(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

/// Splits the socket into a sink (outgoing) and stream (incoming). Outgoing
/// messages funnel through an mpsc channel so the broadcast-forwarding half
/// of the loop can send without owning the sink directly.
async fn handle_ws(socket: axum::extract::ws::WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let (tx, mut rx) = mpsc::channel::<Value>(256);
    let mut subscription = state.bus.subscribe();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let text = match serde_json::to_string(&msg) {
                Ok(t) => t,
                Err(e) => {
                    error!(error = %e, "WS send: failed to serialize message");
                    continue;
                }
            };
            if ws_sink
                .send(axum::extract::ws::Message::Text(text.into()))
                .await
                .is_err()
            {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            ws_msg = ws_stream.next() => {
                let Some(Ok(msg)) = ws_msg else { break };
                match msg {
                    axum::extract::ws::Message::Text(text) => {
                        if let Ok(parsed) = serde_json::from_str::<Value>(&text) {
                            if parsed["type"].as_str() == Some("ping") {
                                let _ = tx.send(json!({"type": "pong"})).await;
                            }
                        }
                    }
                    axum::extract::ws::Message::Close(_) => break,
                    _ => {}
                }
            }
            event = subscription.recv() => {
                match event {
                    Recv::Event(event) => {
                        if let Ok(value) = serde_json::to_value(&event) {
                            let _ = tx.send(value).await;
                        }
                    }
                    Recv::Lagged(n) => {
                        let _ = tx
                            .send(json!({"type": "error", "code": "LAGGED", "missed": n}))
                            .await;
                    }
                    Recv::Closed => break,
                }
            }
        }
    }

    send_task.abort();
}
