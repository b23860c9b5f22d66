//! WebSocket upgrade handler and per-connection event loop.
//!
//! The handshake credential travels out-of-band as a `token` query parameter
//! on the upgrade request and is verified *before* the upgrade completes: a
//! rejected credential is an HTTP 401 and never becomes a session.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::auth::Identity;
use crate::gateway::events::ClientFrame;
use crate::gateway::session::ConnectionSession;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    #[serde(default)]
    token: Option<String>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    let credential = params.token.unwrap_or_default();
    match state.auth.verify(&credential).await {
        Ok(identity) => ws
            .on_upgrade(move |socket| handle_connection(socket, state, identity))
            .into_response(),
        Err(err) => {
            tracing::debug!(kind = err.kind(), "handshake rejected");
            let body = serde_json::json!({
                "error": { "kind": err.kind(), "message": err.message() }
            });
            (StatusCode::UNAUTHORIZED, Json(body)).into_response()
        }
    }
}

async fn handle_connection(socket: WebSocket, state: AppState, identity: Identity) {
    let (session, mut outbound_rx) = ConnectionSession::new(identity);
    let (mut ws_tx, mut ws_rx) = socket.split();

    // One writer task per connection drains the session's outbound queue to
    // the socket in FIFO order. It ends when the session's last sender is
    // dropped or the socket goes away.
    let writer_session_id = session.session_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(err) => {
                    tracing::error!(?err, session_id = %writer_session_id, "frame serialization failed");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Session setup must finish before the first inbound frame is read.
    if let Err(err) = state.dispatcher.connect(&session).await {
        tracing::warn!(
            session_id = %session.session_id,
            user_id = %session.identity.user_id,
            %err,
            "session setup failed"
        );
        drop(session);
        let _ = writer.await;
        return;
    }

    tracing::info!(
        session_id = %session.session_id,
        user_id = %session.identity.user_id,
        online = state.dispatcher.presence().online_count(),
        "gateway session established"
    );

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let frame: ClientFrame = match serde_json::from_str(&text) {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::debug!(?err, session_id = %session.session_id, "invalid frame, closing");
                        break;
                    }
                };
                state.dispatcher.handle_frame(&session, frame).await;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(err) => {
                tracing::debug!(?err, session_id = %session.session_id, "ws read error");
                break;
            }
            _ => continue,
        }
    }

    state.dispatcher.disconnect(&session);

    tracing::info!(
        session_id = %session.session_id,
        user_id = %session.identity.user_id,
        "gateway session ended"
    );

    drop(session);
    let _ = writer.await;
}
