//! Integration tests for the WebSocket relay end to end: client command in,
//! start/chunk/complete envelopes out, with a fake assistant child behind
//! the session.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use serial_test::serial;
use tokio_tungstenite::tungstenite::Message;

use agent_relay::config::GlobalConfig;

use super::test_helpers::{fake_cli, spawn_relay};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Relay config whose sessions spawn the given fake CLI.
fn relay_config(cli: &std::path::Path, workspace: &std::path::Path) -> GlobalConfig {
    GlobalConfig {
        default_workspace_root: workspace.to_path_buf(),
        assistant_cli: cli.to_string_lossy().into_owned(),
        stop_timeout_seconds: 2,
        ..GlobalConfig::default()
    }
}

async fn connect(addr: &str) -> WsStream {
    let (ws, _resp) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("websocket connect");
    ws
}

async fn next_frame(ws: &mut WsStream) -> Value {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("frame within deadline")
        .expect("connection open")
        .expect("frame ok");
    let text = msg.into_text().expect("text frame");
    serde_json::from_str(text.as_str()).expect("frame is json")
}

async fn send_json(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string()))
        .await
        .expect("send frame");
}

/// A `message` command produces the start → chunk(s) → complete envelope
/// sequence, with session events forwarded inside the chunks.
#[tokio::test]
#[serial]
async fn message_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cli = fake_cli(
        &dir,
        r#"read -r _init
echo '{"type":"assistant","n":1}'
echo '{"type":"result","ok":true}'"#,
    );
    let (addr, _state) = spawn_relay(relay_config(&cli, dir.path())).await;

    let mut ws = connect(&addr).await;
    send_json(
        &mut ws,
        serde_json::json!({ "type": "message", "content": "hello" }),
    )
    .await;

    let start = next_frame(&mut ws).await;
    assert_eq!(start["type"], "start");

    let first = next_frame(&mut ws).await;
    assert_eq!(first["type"], "chunk");
    assert_eq!(first["content"]["type"], "assistant");

    let second = next_frame(&mut ws).await;
    assert_eq!(second["type"], "chunk");
    assert_eq!(second["content"]["type"], "result");

    let complete = next_frame(&mut ws).await;
    assert_eq!(complete["type"], "complete");
}

/// A malformed line from the child arrives as a `system/raw` chunk.
#[tokio::test]
#[serial]
async fn malformed_child_line_forwards_as_raw_chunk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cli = fake_cli(
        &dir,
        r#"read -r _init
echo 'garbage line'
echo '{"type":"result","ok":true}'"#,
    );
    let (addr, _state) = spawn_relay(relay_config(&cli, dir.path())).await;

    let mut ws = connect(&addr).await;
    send_json(
        &mut ws,
        serde_json::json!({ "type": "message", "content": "hello" }),
    )
    .await;

    let start = next_frame(&mut ws).await;
    assert_eq!(start["type"], "start");

    let raw = next_frame(&mut ws).await;
    assert_eq!(raw["content"]["type"], "system");
    assert_eq!(raw["content"]["subtype"], "raw");
    assert_eq!(raw["content"]["content"], "garbage line");
}

/// A `stop` command terminates the running exchange and acknowledges with
/// `stopped`; stopping with nothing running is also acknowledged.
#[tokio::test]
#[serial]
async fn stop_command_is_acknowledged() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cli = fake_cli(
        &dir,
        r#"read -r _init
echo '{"type":"assistant","n":1}'
exec sleep 30"#,
    );
    let (addr, _state) = spawn_relay(relay_config(&cli, dir.path())).await;

    let mut ws = connect(&addr).await;

    // Stop with no run in flight: immediate acknowledgement.
    send_json(&mut ws, serde_json::json!({ "type": "stop" })).await;
    let stopped = next_frame(&mut ws).await;
    assert_eq!(stopped["type"], "stopped");

    // Stop mid-run: the event stream ends and completes after the ack.
    send_json(
        &mut ws,
        serde_json::json!({ "type": "message", "content": "hello" }),
    )
    .await;
    let start = next_frame(&mut ws).await;
    assert_eq!(start["type"], "start");
    let chunk = next_frame(&mut ws).await;
    assert_eq!(chunk["type"], "chunk");

    send_json(&mut ws, serde_json::json!({ "type": "stop" })).await;

    // Both `stopped` and `complete` are expected; their relative order
    // depends on how quickly the reader observes EOF.
    let mut kinds = vec![
        next_frame(&mut ws).await["type"].as_str().map(str::to_owned),
        next_frame(&mut ws).await["type"].as_str().map(str::to_owned),
    ];
    kinds.sort();
    assert_eq!(
        kinds,
        vec![Some("complete".to_owned()), Some("stopped".to_owned())]
    );
}

/// An unparsable client command yields an `error` frame and keeps the
/// connection open.
#[tokio::test]
#[serial]
async fn invalid_client_command_yields_error_frame() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cli = fake_cli(&dir, "read -r _init");
    let (addr, _state) = spawn_relay(relay_config(&cli, dir.path())).await;

    let mut ws = connect(&addr).await;
    ws.send(Message::text("this is not a command"))
        .await
        .expect("send frame");

    let error = next_frame(&mut ws).await;
    assert_eq!(error["type"], "error");
    assert!(
        error["content"]
            .as_str()
            .is_some_and(|c| c.contains("invalid command")),
        "got: {error}"
    );

    // Connection still works after the bad frame.
    send_json(&mut ws, serde_json::json!({ "type": "stop" })).await;
    let stopped = next_frame(&mut ws).await;
    assert_eq!(stopped["type"], "stopped");
}

/// Extra fields on a known command are tolerated; the command still runs.
#[tokio::test]
#[serial]
async fn extra_fields_on_commands_are_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cli = fake_cli(&dir, "read -r _init");
    let (addr, _state) = spawn_relay(relay_config(&cli, dir.path())).await;

    let mut ws = connect(&addr).await;
    send_json(
        &mut ws,
        serde_json::json!({ "type": "stop", "client_ts": 1_700_000_000 }),
    )
    .await;

    let stopped = next_frame(&mut ws).await;
    assert_eq!(stopped["type"], "stopped");
}

/// Cancelling the shutdown token closes open connections from the server
/// side and clears the registry, without the client doing anything.
#[tokio::test]
#[serial]
async fn shutdown_closes_open_connections() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cli = fake_cli(
        &dir,
        r#"read -r _init
echo '{"type":"assistant","n":1}'
exec sleep 30"#,
    );
    let (addr, state) = spawn_relay(relay_config(&cli, dir.path())).await;

    let mut ws = connect(&addr).await;
    send_json(
        &mut ws,
        serde_json::json!({ "type": "message", "content": "hello" }),
    )
    .await;
    let start = next_frame(&mut ws).await;
    assert_eq!(start["type"], "start");
    let chunk = next_frame(&mut ws).await;
    assert_eq!(chunk["type"], "chunk");

    state.shutdown.cancel();

    // The connection ends server-side; any trailing frames (a `complete`
    // from the stopped run) are drained along the way.
    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(msg) if msg.is_close() => break,
                Ok(_) => {}
                Err(_) => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "connection must close after shutdown");

    let mut cleared = false;
    for _ in 0..50 {
        if state.sessions.lock().await.is_empty() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cleared, "registry must be empty after shutdown");
}

/// Disconnecting removes the connection's session from the registry.
#[tokio::test]
#[serial]
async fn disconnect_clears_session_registry() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cli = fake_cli(&dir, "read -r _init");
    let (addr, state) = spawn_relay(relay_config(&cli, dir.path())).await;

    let mut ws = connect(&addr).await;

    // The registry entry appears once the upgrade completes.
    let mut registered = false;
    for _ in 0..50 {
        if state.sessions.lock().await.len() == 1 {
            registered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(registered, "session must be registered after connect");

    ws.close(None).await.expect("close websocket");
    drop(ws);

    let mut cleared = false;
    for _ in 0..50 {
        if state.sessions.lock().await.is_empty() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cleared, "session must be removed after disconnect");
}
