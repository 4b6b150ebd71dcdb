//! Server-Sent Events endpoint.
//!
//! `GET /api/events` — push-based event stream mirroring the WebSocket
//! endpoint's event set, for clients that only need one-way delivery
//! (dashboards, webhooks). Subscribes to the same [`crate::events::EventBus`]
//! WS clients use.

use std::convert::Infallible;
use std::sync::atomic::Ordering;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::stream::Stream;

use crate::events::Recv;
use crate::state::AppState;

/// Maximum concurrent SSE connections before rejecting with 429.
const MAX_SSE_CONNECTIONS: u32 = 64;

/// `GET /api/events` — SSE event stream.
pub async fn event_stream(State(state): State<AppState>) -> impl IntoResponse {
    let current = state.sse_connections.load(Ordering::Relaxed);
    if current >= MAX_SSE_CONNECTIONS {
        return Err((StatusCode::TOO_MANY_REQUESTS, "Too many SSE connections"));
    }
    state.sse_connections.fetch_add(1, Ordering::Relaxed);

    let subscription = state.bus.subscribe();
    let counter = state.sse_connections.clone();

    let stream = futures::stream::unfold((subscription, counter), |(mut sub, counter)| async move {
        match sub.recv().await {
            Recv::Event(event) => {
                let event_type = serde_json::to_value(&event)
                    .ok()
                    .and_then(|v| v.get("type").and_then(|t| t.as_str().map(str::to_string)))
                    .unwrap_or_else(|| "message".to_string());
                let data = serde_json::to_string(&event).unwrap_or_default();
                let sse_event = Event::default().event(event_type).data(data);
                Some((Ok(sse_event), (sub, counter)))
            }
            Recv::Lagged(n) => {
                let sse_event = Event::default()
                    .event("error")
                    .data(format!(r#"{{"code":"LAGGED","missed":{n}}}"#));
                Some((Ok(sse_event), (sub, counter)))
            }
            Recv::Closed => {
                counter.fetch_sub(1, Ordering::Relaxed);
                None
            }
        }
    });

    let counter_for_drop = state.sse_connections.clone();
    let stream = DropCounterStream {
        inner: Box::pin(stream),
        counter: counter_for_drop,
        decremented: false,
    };

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default().interval(std::time::Duration::from_secs(15))))
}

/// Wrapper that decrements the SSE connection counter when the stream is
/// dropped (covers both clean exhaustion and an abruptly closed connection).
struct DropCounterStream<S> {
    inner: std::pin::Pin<Box<S>>,
    counter: std::sync::Arc<std::sync::atomic::AtomicU32>,
    decremented: bool,
}

impl<S: Stream<Item = Result<Event, Infallible>>> Stream for DropCounterStream<S> {
    type Item = Result<Event, Infallible>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        let result = self.inner.as_mut().poll_next(cx);
        if let std::task::Poll::Ready(None) = &result {
            if !self.decremented {
                self.counter.fetch_sub(1, Ordering::Relaxed);
                self.decremented = true;
            }
        }
        result
    }
}

impl<S> Drop for DropCounterStream<S> {
    fn drop(&mut self) {
        if !self.decremented {
            self.counter.fetch_sub(1, Ordering::Relaxed);
            self.decremented = true;
        }
    }
}
