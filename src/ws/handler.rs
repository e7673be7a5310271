//! WebSocket upgrade handlers

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{JoinError, MatchCommand, MatchHandle};
use crate::http::auth::AuthError;
use crate::session::Identity;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, GameKind, ServerMsg};

/// Outbound queue per connection. Snapshots beyond this are dropped for slow
/// clients; any other message that does not fit closes the connection.
const OUTBOUND_BUFFER: usize = 64;

/// Longest display name accepted from anonymous clients
pub const MAX_NAME_CHARS: usize = 24;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Query parameters for anonymous rooms
#[derive(Debug, Deserialize)]
pub struct PongQuery {
    pub name: Option<String>,
}

/// Query parameters for identity-bound rooms
#[derive(Debug, Deserialize)]
pub struct TetrisQuery {
    /// Supabase access token
    pub token: Option<String>,
}

/// Anonymous upgrade: the client picks its own display name
pub async fn pong_ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(query): Query<PongQuery>,
    State(state): State<AppState>,
) -> Response {
    let conn_id = Uuid::new_v4();
    let name = sanitize_name(query.name.as_deref(), conn_id);
    ws.on_upgrade(move |socket| {
        handle_socket(socket, state, conn_id, GameKind::Pong, room, name, None)
    })
}

/// Identity-bound upgrade: the token is verified before the session joins.
/// Failures still upgrade so the client receives a readable `auth_failed`.
pub async fn tetris_ws_handler(
    ws: WebSocketUpgrade,
    Path(room): Path<String>,
    Query(query): Query<TetrisQuery>,
    State(state): State<AppState>,
) -> Response {
    let verified = match query.token.as_deref() {
        Some(token) if !token.is_empty() => state.identity.verify(token).await,
        _ => Err(AuthError::MissingToken),
    };

    match verified {
        Ok(identity) => {
            info!(user_id = %identity.user_id, room = %room, "WebSocket upgrade for authenticated user");
            let conn_id = Uuid::new_v4();
            let name = identity.display_name.clone();
            ws.on_upgrade(move |socket| {
                handle_socket(socket, state, conn_id, GameKind::Tetris, room, name, Some(identity))
            })
        }
        Err(e) => {
            warn!(room = %room, error = %e, "WebSocket auth failed");
            ws.on_upgrade(move |socket| reject_socket(socket, e))
        }
    }
}

/// Trimmed, length-capped display name with a generated fallback
pub fn sanitize_name(raw: Option<&str>, conn_id: Uuid) -> String {
    let name: String = raw
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .chars()
        .take(MAX_NAME_CHARS)
        .collect();

    if name.is_empty() {
        format!("Guest-{}", &conn_id.simple().to_string()[..4])
    } else {
        name
    }
}

async fn reject_socket(socket: WebSocket, error: AuthError) {
    let (mut ws_sink, _) = socket.split();
    let msg = ServerMsg::AuthFailed {
        message: error.to_string(),
    };
    let _ = send_msg(&mut ws_sink, &msg).await;
    let _ = ws_sink.send(Message::Close(None)).await;
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    conn_id: Uuid,
    kind: GameKind,
    room: String,
    name: String,
    identity: Option<Identity>,
) {
    info!(conn_id = %conn_id, game = %kind, room = %room, name = %name, "New WebSocket connection");

    let (mut ws_sink, ws_stream) = socket.split();

    let welcome = ServerMsg::Welcome {
        connection_id: conn_id,
        game: kind,
        server_time: unix_millis(),
    };
    if let Err(e) = send_msg(&mut ws_sink, &welcome).await {
        error!(conn_id = %conn_id, error = %e, "Failed to send welcome");
        return;
    }

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let handle = match state
        .matches
        .join(kind, &room, conn_id, name, identity, tx)
        .await
    {
        Ok((handle, _role)) => handle,
        Err(e) => {
            warn!(conn_id = %conn_id, room = %room, error = %e, "Join rejected");
            let code = match e {
                JoinError::Rejected(_) => "room_full",
                JoinError::Unavailable(_) => "room_unavailable",
            };
            let msg = ServerMsg::Error {
                code: code.to_string(),
                message: e.to_string(),
            };
            let _ = send_msg(&mut ws_sink, &msg).await;
            let _ = ws_sink.send(Message::Close(None)).await;
            return;
        }
    };

    run_session(conn_id, &handle, ws_sink, ws_stream, rx).await;

    handle.send(MatchCommand::Disconnect { conn_id }).await;
    info!(conn_id = %conn_id, room = %room, "WebSocket connection closed");
}

/// Pump the session until either direction ends
async fn run_session(
    conn_id: Uuid,
    handle: &MatchHandle,
    mut ws_sink: WsSink,
    mut ws_stream: WsStream,
    mut outbound: mpsc::Receiver<ServerMsg>,
) {
    // Writer task: match task -> WebSocket. Ends when the session is dropped
    // from the room (including eviction by a newer connection).
    let mut writer_handle = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = send_msg(&mut ws_sink, &msg).await {
                debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
                return;
            }
        }
        let _ = ws_sink.send(Message::Close(None)).await;
    });

    let reader = async {
        let rate_limiter = ConnectionRateLimiter::new();

        while let Some(result) = ws_stream.next().await {
            match result {
                Ok(Message::Text(text)) => {
                    if !rate_limiter.check_message() {
                        warn!(conn_id = %conn_id, "Rate limited client message");
                        continue;
                    }

                    match serde_json::from_str::<ClientMsg>(&text) {
                        Ok(msg) => {
                            if !handle.send(MatchCommand::Client { conn_id, msg }).await {
                                debug!(conn_id = %conn_id, "Match channel closed");
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(conn_id = %conn_id, error = %e, "Ignoring malformed client message");
                        }
                    }
                }
                Ok(Message::Binary(_)) => {
                    debug!(conn_id = %conn_id, "Received binary message, ignoring");
                }
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                Ok(Message::Close(_)) => {
                    info!(conn_id = %conn_id, "Client initiated close");
                    break;
                }
                Err(e) => {
                    debug!(conn_id = %conn_id, error = %e, "WebSocket error");
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = reader => {}
        _ = &mut writer_handle => {
            debug!(conn_id = %conn_id, "Outbound channel closed");
        }
    }

    writer_handle.abort();
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut WsSink, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
