//! Delivery gateway.
//!
//! Each customer holds one WebSocket. The gateway registers the customer with
//! the hub, then forwards its mailbox to the socket until either side closes.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response as HttpResponse},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, warn};
use trackhub_core::{Hub, SubscriberId};
use trackhub_protocol::{LocationUpdate, Response};

use crate::metrics::{self, ConnectionMetricsGuard};

/// Shared state of the delivery listener.
pub struct DeliveryState {
    pub hub: Arc<Hub>,
    /// Header carrying the customer's session id.
    pub session_header: String,
}

/// Build the delivery router for `path`.
pub fn router(path: &str, state: Arc<DeliveryState>) -> Router {
    Router::new()
        .route(path, get(ws_handler))
        .with_state(state)
}

/// Session id from the configured header, or a generated one.
fn session_id(headers: &HeaderMap, header: &str) -> SubscriberId {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(SubscriberId::generate, SubscriberId::from)
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<DeliveryState>>,
) -> HttpResponse {
    if !state.hub.is_running() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(Response::error("server is shutting down")),
        )
            .into_response();
    }

    let id = session_id(&headers, &state.session_header);
    ws.on_upgrade(move |socket| handle_websocket(socket, id, state))
}

/// Forward one customer's mailbox to its socket.
async fn handle_websocket(socket: WebSocket, id: SubscriberId, state: Arc<DeliveryState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();
    let (mut sender, mut receiver) = socket.split();

    let mut mailbox = match state.hub.register(id.clone()) {
        Ok(mailbox) => mailbox,
        Err(e) => {
            warn!(subscriber = %id, error = %e, "Registration refused");
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: e.to_string().into(),
                })))
                .await;
            return;
        }
    };
    metrics::set_active_subscribers(state.hub.subscriber_count());

    debug!(subscriber = %id, "Customer connected");

    loop {
        tokio::select! {
            event = mailbox.recv() => {
                let Some(event) = event else {
                    // Unregistered, superseded or drained.
                    debug!(subscriber = %id, "Mailbox closed");
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code: close_code::AWAY,
                            reason: "subscription closed".into(),
                        })))
                        .await;
                    break;
                };

                match LocationUpdate::from(event.as_ref()).to_json() {
                    Ok(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                        metrics::record_sent();
                    }
                    Err(e) => {
                        error!(subscriber = %id, error = %e, "Failed to encode location update");
                        metrics::record_error("encode");
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(subscriber = %id, "Received close frame");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Customers only listen.
                    }
                    Some(Err(e)) => {
                        warn!(subscriber = %id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(subscriber = %id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister_registration(mailbox.registration());
    metrics::set_active_subscribers(state.hub.subscriber_count());

    debug!(subscriber = %id, "Customer disconnected");
}
