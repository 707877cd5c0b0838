use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{interval, timeout};
use tracing::debug;

use crate::api::AppState;
use crate::auth::Claims;
use crate::hub::{ClientHandle, HubHandle};

// A client that neither sends frames nor answers pings within PONG_WAIT is
// considered dead. Pings go out well inside that window.
const PONG_WAIT: Duration = Duration::from_secs(60);
const PING_PERIOD: Duration = Duration::from_secs(54);

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Upgrade endpoint. The bearer token arrives as a query parameter because
/// browser WebSocket clients cannot set headers.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = query.token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let claims = match state.verifier.verify(&token) {
        Ok(claims) => claims,
        Err(_) => return StatusCode::UNAUTHORIZED.into_response(),
    };

    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, claims))
}

async fn handle_socket(socket: WebSocket, hub: HubHandle, claims: Claims) {
    let (client, mut outbound) = ClientHandle::new(claims.username.clone());
    let client_id = client.id;
    hub.register(client).await;

    let (mut sink, mut stream) = socket.split();

    let mut write_task = tokio::spawn(async move {
        let mut ping = interval(PING_PERIOD);
        // Consume the immediate first tick so pings start one period in.
        ping.tick().await;

        loop {
            tokio::select! {
                queued = outbound.recv() => {
                    // None means the hub dropped us.
                    let Some(first) = queued else { break };

                    // Coalesce whatever else is queued into one
                    // newline-delimited frame.
                    let mut frame = first;
                    while let Ok(next) = outbound.try_recv() {
                        frame.push(b'\n');
                        frame.extend_from_slice(&next);
                    }

                    let text = String::from_utf8_lossy(&frame).into_owned();
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if sink.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let read_hub = hub.clone();
    let mut read_task = tokio::spawn(async move {
        loop {
            let frame = match timeout(PONG_WAIT, stream.next()).await {
                Ok(Some(Ok(frame))) => frame,
                // Liveness deadline passed, transport error, or stream end.
                _ => break,
            };

            match frame {
                // Inbound data frames are re-broadcast to all local clients;
                // a development/demo convenience, not part of the sync path.
                Message::Text(text) => read_hub.broadcast(text.into_bytes()).await,
                Message::Binary(bytes) => read_hub.broadcast(bytes).await,
                Message::Close(_) => break,
                // Keepalive traffic only refreshes the liveness deadline.
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    });

    // Whichever side finishes first tears the other one down.
    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    hub.unregister(client_id).await;
    debug!("WebSocket connection for {} closed", claims.username);
}
