//! WebSocket upgrade and per-connection lifecycle.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use proctor_core::events::OutboundEvent;
use proctor_core::ids::SessionId;
use proctor_core::Principal;
use proctor_engine::EngineError;

use crate::auth::bearer_token;
use crate::connection::ClientConnection;
use crate::dispatch::handle_frame;
use crate::error::{ApiError, AuthError};
use crate::server::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// Authenticate before upgrading; unauthenticated callers never get a socket.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<WsQuery>,
) -> Response {
    let Some(token) = bearer_token(&headers, query.token.as_deref()) else {
        return ApiError::Unauthorized(AuthError::MissingToken).into_response();
    };
    let principal = match state.authenticator.authenticate(token).await {
        Ok(p) => p,
        Err(e) => {
            debug!(error = %e, "websocket authentication failed");
            return ApiError::Unauthorized(e).into_response();
        }
    };

    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| run_connection(socket, state, principal))
}

/// Drive one connection until either side closes, the peer stops answering
/// pings, or the server shuts down.
pub async fn run_connection(socket: WebSocket, state: AppState, principal: Principal) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(state.config.max_send_queue.max(1));
    let conn = Arc::new(ClientConnection::new(principal, tx));
    info!(
        conn_id = %conn.id,
        user_id = %conn.principal.user_id,
        role = %conn.principal.role,
        session_id = conn.session_id().map(SessionId::as_str),
        "connection opened"
    );

    if state.registry.register_connection(Arc::clone(&conn)) {
        if let Some(session_id) = conn.session_id() {
            if let Err(e) = state.engine.connected(session_id).await {
                log_presence_error("connected", session_id, &e);
                let _ = state
                    .router
                    .send_to_connection(&conn, &OutboundEvent::Error(e.to_rejection()));
            }
        }
    }

    let cancel = state.shutdown.child_token();

    let writer_conn = Arc::clone(&conn);
    let writer_cancel = cancel.clone();
    let ping_every = state.config.heartbeat_interval();
    let timeout = state.config.heartbeat_timeout();
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_every);
        let _ = ping.tick().await;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    if ws_tx.send(Message::Text(frame.to_string().into())).await.is_err() {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if writer_conn.idle_for() > timeout {
                        info!(conn_id = %writer_conn.id, "peer unresponsive, closing");
                        break;
                    }
                    if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
                () = writer_cancel.cancelled() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        writer_cancel.cancel();
    });

    loop {
        let msg = tokio::select! {
            m = ws_rx.next() => m,
            () = cancel.cancelled() => break,
        };
        let Some(Ok(msg)) = msg else { break };
        conn.mark_seen();
        match msg {
            Message::Text(text) => handle_frame(&state, &conn, text.as_str()).await,
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => handle_frame(&state, &conn, text).await,
                Err(_) => debug!(conn_id = %conn.id, "ignoring non-UTF-8 binary frame"),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }
    cancel.cancel();
    let _ = writer.await;

    cleanup(&state, &conn).await;
}

async fn cleanup(state: &AppState, conn: &ClientConnection) {
    let last = state.registry.remove_connection(conn);
    info!(
        conn_id = %conn.id,
        dropped = conn.drop_count(),
        last,
        "connection closed"
    );
    if !last {
        return;
    }
    let Some(session_id) = conn.session_id() else {
        return;
    };

    match state.engine.disconnected(session_id).await {
        // A new handle registered while the disconnect was in flight.
        Ok(t) if t.is_applied() && state.registry.is_online(session_id) => {
            if let Err(e) = state.engine.connected(session_id).await {
                log_presence_error("connected", session_id, &e);
            }
        }
        Ok(_) => {}
        Err(e) => log_presence_error("disconnected", session_id, &e),
    }
}

fn log_presence_error(action: &str, session_id: &SessionId, e: &EngineError) {
    if e.is_failure() {
        warn!(session_id = %session_id, action, error = %e, "presence update failed");
    } else {
        debug!(session_id = %session_id, action, error = %e, "presence update declined");
    }
}
