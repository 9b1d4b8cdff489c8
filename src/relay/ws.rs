//! Per-connection WebSocket handling.
//!
//! Each connection owns one [`ProcessSession`]. Inbound frames are tagged
//! JSON commands; outbound frames wrap session events in the
//! `start` / `chunk` / `complete` envelopes the frontend expects. Event
//! forwarding runs on its own task so control commands (permission grants,
//! stop) are processed while a run is still draining.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::session::{ProcessSession, SessionOptions};

use super::RelayState;

/// Bound on outbound frames queued towards one client.
const OUTBOUND_CAPACITY: usize = 64;

/// Query parameters accepted on `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Working directory for this connection's session; defaults to the
    /// configured workspace root.
    pub cwd: Option<PathBuf>,
}

/// A command submitted by the client over the WebSocket.
///
/// Extra fields on a known command are ignored; only an unknown or missing
/// `type` is an error.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientCommand {
    /// Start an exchange with the given user message.
    Message {
        /// The user's message text.
        content: String,
    },
    /// Answer a pending tool-use permission request.
    PermissionResponse {
        /// Identifier of the tool use being answered.
        tool_use_id: String,
        /// Whether the tool use is allowed.
        allowed: bool,
    },
    /// Answer a survey the assistant asked.
    QuestionResponse {
        /// Question identifier → answer value.
        answers: BTreeMap<String, Value>,
    },
    /// Resume assistant processing.
    Continue,
    /// Terminate the current exchange.
    Stop,
}

/// Handler for `GET /ws` — upgrade and hand off to the connection loop.
pub async fn ws_upgrade(
    State(state): State<RelayState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query.cwd))
}

/// Drive one client connection until it closes.
async fn handle_socket(socket: WebSocket, state: RelayState, cwd: Option<PathBuf>) {
    let conn_id = Uuid::new_v4();
    let working_dir = cwd.unwrap_or_else(|| state.config.default_workspace_root.clone());

    let session = Arc::new(ProcessSession::new(
        working_dir,
        SessionOptions::from_config(&state.config),
    ));
    state
        .sessions
        .lock()
        .await
        .insert(conn_id, Arc::clone(&session));
    info!(%conn_id, workspace = %session.working_dir().display(), "client connected");

    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Value>(OUTBOUND_CAPACITY);

    // Single writer task: everything the client sees goes through out_tx,
    // so event forwarding and command replies never interleave frames.
    let writer = tokio::spawn(async move {
        while let Some(value) = out_rx.recv().await {
            if sink.send(Message::Text(value.to_string().into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        let frame = tokio::select! {
            () = state.shutdown.cancelled() => {
                debug!(%conn_id, "server shutting down; closing connection");
                break;
            }
            frame = stream.next() => frame,
        };
        let Some(Ok(frame)) = frame else {
            break;
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(text.as_str()) {
                Ok(command) => dispatch(command, &session, &out_tx).await,
                Err(err) => {
                    warn!(%conn_id, %err, "invalid client command");
                    let reply = json!({
                        "type": "error",
                        "content": format!("invalid command: {err}"),
                    });
                    if out_tx.send(reply).await.is_err() {
                        break;
                    }
                }
            },
            Message::Close(_) => break,
            // Ping/pong are answered by axum; binary frames are ignored.
            _ => {}
        }
    }

    // Disconnect: force-stop whatever is running and drop the registry entry.
    session.stop().await;
    state.sessions.lock().await.remove(&conn_id);
    drop(out_tx);
    let _ = writer.await;
    info!(%conn_id, "client disconnected");
}

/// Apply one client command to the connection's session.
async fn dispatch(command: ClientCommand, session: &Arc<ProcessSession>, out_tx: &mpsc::Sender<Value>) {
    match command {
        ClientCommand::Message { content } => {
            let mut events = session.run(&content).await;
            let _ = out_tx.send(json!({ "type": "start", "content": "" })).await;

            let tx = out_tx.clone();
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    let frame = json!({ "type": "chunk", "content": event.into_value() });
                    if tx.send(frame).await.is_err() {
                        debug!("client gone; abandoning event forwarding");
                        return;
                    }
                }
                let _ = tx.send(json!({ "type": "complete", "content": "" })).await;
            });
        }
        ClientCommand::PermissionResponse {
            tool_use_id,
            allowed,
        } => {
            session.send_permission_response(&tool_use_id, allowed).await;
        }
        ClientCommand::QuestionResponse { answers } => {
            session.send_question_response(answers).await;
        }
        ClientCommand::Continue => {
            session.send_continue().await;
        }
        ClientCommand::Stop => {
            session.stop().await;
            let _ = out_tx.send(json!({ "type": "stopped", "content": "" })).await;
        }
    }
}
