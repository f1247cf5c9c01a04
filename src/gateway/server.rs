//! WebSocket upgrade handler and per-connection event loop.
//!
//! Rate limiting and authentication run before the upgrade completes, so a
//! rejected attempt gets a plain HTTP error and leaves no state behind.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::header::{AUTHORIZATION, ORIGIN};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::id;
use crate::AppState;

use super::auth::Identity;
use super::events::{ClientCommand, Envelope, ServerEvent};
use super::handler::handle_command;
use super::registry::Registration;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    // Browsers don't apply CORS to WebSocket upgrades, so the allowed-origin
    // knob is enforced here. A browser always sends `Origin`; requests
    // without the header (non-browser clients) are let through.
    if state.config.allowed_origin != "*" {
        let presented = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        if presented.is_some_and(|o| o != state.config.allowed_origin) {
            tracing::debug!(origin = ?presented, "upgrade from disallowed origin");
            return crate::error::ConnectError::OriginNotAllowed.into_response();
        }
    }

    let origin = addr.ip().to_string();
    if !state.limiter.check_and_increment(&origin) {
        tracing::debug!(%origin, "connection attempt rate-limited");
        return crate::error::ConnectError::RateLimited.into_response();
    }

    let credential = params
        .get("token")
        .map(String::as_str)
        .or_else(|| bearer_token(&headers));

    let identity = match state.verifier.verify(credential) {
        Ok(identity) => identity,
        Err(e) => {
            tracing::debug!(%origin, code = e.code(), "connection rejected");
            return e.into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_connection(socket, state, identity))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn handle_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let conn_id = id::prefixed_ulid(id::prefix::CONNECTION);
    let user_id = identity.user_id;

    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let registration = state.registry.register(conn_id.clone(), user_id.clone(), tx);
    match &registration {
        Registration::Fresh => {}
        Registration::Evicted { previous } => {
            tracing::info!(
                %user_id,
                previous = %previous.conn_id,
                "previous session replaced"
            );
            state.dispatcher.broadcast_departure(previous);
        }
        Registration::Superseded { previous } => {
            tracing::debug!(%user_id, %previous, "additional session for user");
        }
    }

    tracing::info!(%conn_id, %user_id, "connection established");
    state.registry.send(
        &conn_id,
        Envelope::stamp(ServerEvent::ConnectionStatus {
            user_id: user_id.clone(),
            status: "connected".to_string(),
        }),
    );

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(envelope) => {
                        let json = match serde_json::to_string(&envelope) {
                            Ok(json) => json,
                            Err(e) => {
                                tracing::error!(?e, %conn_id, "failed to serialize event");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // Queue closed: the registry dropped this connection
                    // (evicted or replaced).
                    None => break,
                }
            }

            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > state.config.max_payload_bytes {
                            state.registry.send(&conn_id, Envelope::stamp(ServerEvent::Error {
                                code: "PAYLOAD_TOO_LARGE".to_string(),
                                message: "Frame exceeds max payload size".to_string(),
                            }));
                            continue;
                        }

                        let command: ClientCommand = match serde_json::from_str(&text) {
                            Ok(command) => command,
                            Err(e) => {
                                tracing::debug!(?e, %conn_id, "malformed command");
                                state.registry.send(&conn_id, Envelope::stamp(ServerEvent::Error {
                                    code: "BAD_COMMAND".to_string(),
                                    message: "Malformed or unknown command".to_string(),
                                }));
                                continue;
                            }
                        };

                        if let Err(err) = handle_command(&state, &conn_id, &user_id, command) {
                            state.registry.send(&conn_id, Envelope::stamp(ServerEvent::Error {
                                code: err.code().to_string(),
                                message: err.message(),
                            }));
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Transport-level frames also count as liveness.
                        state.registry.touch_heartbeat(&conn_id);
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, %conn_id, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Best effort close frame; the peer may already be gone.
    let _ = ws_tx.close().await;

    let age = state.registry.connection_age(&conn_id);
    if let Some(departure) = state.registry.unregister(&conn_id) {
        state.dispatcher.broadcast_departure(&departure);
    }
    tracing::info!(%conn_id, %user_id, ?age, "connection closed");
}
