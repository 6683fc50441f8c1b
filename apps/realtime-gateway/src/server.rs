//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use helios_common::id::{prefix, prefixed_ulid};
use helios_common::token;
use helios_common::{ClientMessage, EventOrigin, GatewayEnvelope, ServerMessage};

use crate::{peers, AppState};

/// WebSocket policy-violation close code, sent on failed authentication.
const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Query parameters carried on the transport handshake.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub session_id: String,
    pub user_id: String,
    pub token: String,
    #[serde(default)]
    pub peer_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state, params))
}

async fn handle_connection(socket: WebSocket, state: AppState, params: ConnectParams) {
    let (mut ws_tx, ws_rx) = socket.split();

    // Authenticate before any registration. On failure there is no partial
    // state to undo.
    if token::verify_for(
        state.config.token_secret.as_bytes(),
        &params.token,
        &params.session_id,
        &params.user_id,
    )
    .is_err()
    {
        tracing::warn!(
            session_id = %params.session_id,
            user_id = %params.user_id,
            "rejecting connection with invalid realtime token"
        );
        let unauthorized = ServerMessage::Error {
            message: "unauthorized".to_string(),
        };
        let _ = send_message(&mut ws_tx, &unauthorized).await;
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code: CLOSE_POLICY_VIOLATION,
                reason: "Unauthorized".into(),
            })))
            .await;
        return;
    }

    let conn_id = prefixed_ulid(prefix::CONNECTION);
    let (tx, rx) = mpsc::unbounded_channel::<ServerMessage>();

    let was_first = state.registry.add_member(
        &params.session_id,
        crate::registry::Member {
            conn_id: conn_id.clone(),
            user_id: params.user_id.clone(),
            peer_id: params.peer_id.clone(),
            tx: tx.clone(),
        },
    );
    if was_first {
        state.bus.subscribe_session(&params.session_id).await;
    }

    tracing::info!(
        conn_id = %conn_id,
        session_id = %params.session_id,
        user_id = %params.user_id,
        "gateway connection established"
    );

    let _ = tx.send(ServerMessage::Connected {
        client_id: conn_id.clone(),
    });

    if params.peer_id.is_some() {
        peers::announce_peer(&state.registry, &params.session_id, &conn_id);
    }

    run_connection(&state, &params, &conn_id, &tx, ws_tx, ws_rx, rx).await;

    // Teardown: remove from the registry first so the peer-removed
    // broadcast can never target this connection.
    let (was_last, removed) = state.registry.remove_member(&params.session_id, &conn_id);
    if was_last {
        state.bus.unsubscribe_session(&params.session_id).await;
    }
    if let Some(peer_id) = removed.and_then(|member| member.peer_id) {
        peers::announce_peer_removed(&state.registry, &params.session_id, peer_id);
    }

    tracing::info!(
        conn_id = %conn_id,
        session_id = %params.session_id,
        "gateway connection closed"
    );
}

/// Pump the socket until it closes: inbound client messages on one side,
/// this connection's outbound queue on the other.
async fn run_connection(
    state: &AppState,
    params: &ConnectParams,
    conn_id: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut ws_rx: SplitStream<WebSocket>,
    mut rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(message) => {
                        if send_message(&mut ws_tx, &message).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(state, params, conn_id, tx, &text).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, conn_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }
        }
    }
}

/// Dispatch one inbound frame. Malformed JSON or schema violations are
/// dropped and logged; the connection stays open.
async fn handle_client_message(
    state: &AppState,
    params: &ConnectParams,
    conn_id: &str,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    text: &str,
) {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(?e, conn_id, "dropping malformed gateway message");
            return;
        }
    };

    match message {
        ClientMessage::Event { event } => {
            // Client events only ever reach local members through the bus
            // round trip; the gateway never broadcasts them directly.
            let envelope = GatewayEnvelope {
                event,
                session_id: params.session_id.clone(),
                origin: Some(EventOrigin {
                    client_id: Some(conn_id.to_string()),
                    user_id: Some(params.user_id.clone()),
                    peer_id: state.registry.peer_of(&params.session_id, conn_id),
                }),
                timestamp: chrono::Utc::now().timestamp_millis(),
            };
            state.bus.publish(&params.session_id, &envelope).await;
        }
        ClientMessage::PeerReady { peer_id } => {
            state.registry.set_peer(&params.session_id, conn_id, &peer_id);
            peers::announce_peer(&state.registry, &params.session_id, conn_id);
        }
        ClientMessage::Heartbeat => {
            let _ = tx.send(ServerMessage::Heartbeat {
                timestamp: chrono::Utc::now().timestamp_millis(),
            });
        }
    }
}

async fn send_message(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(message) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(?e, "failed to serialize server message");
            return Ok(());
        }
    };
    ws_tx.send(Message::Text(json.into())).await
}
