//! Assistant child-process session management.
//!
//! A [`ProcessSession`] owns one child-process lifecycle: spawn, bidirectional
//! newline-delimited JSON over stdio, control-signal injection, and shutdown
//! under both normal completion and cancellation. Output is exposed as a
//! bounded [`mpsc`] channel of [`SessionEvent`]s drained by the relay.
//!
//! Submodules:
//! - `codec`: lossy line framing for the child's stdout.
//! - `control`: outbound control messages for the child's stdin.
//! - `event`: the event variants yielded to the consumer.

pub mod codec;
pub mod control;
pub mod event;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::config::GlobalConfig;
use crate::{AppError, Result};

use self::codec::EventCodec;
use self::control::ControlMessage;
use self::event::SessionEvent;

/// Fixed argument list selecting the CLI's streaming JSON mode.
///
/// `--permission-mode <mode>` is appended from [`SessionOptions`].
const STREAM_ARGS: &[&str] = &[
    "--print",
    "--input-format",
    "stream-json",
    "--output-format",
    "stream-json",
    "--verbose",
];

/// Bound on in-flight events between the reader task and the consumer.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Per-session spawn parameters derived from [`GlobalConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Assistant CLI binary to spawn.
    pub assistant_cli: String,
    /// Value passed via `--permission-mode`.
    pub permission_mode: String,
    /// Grace period between terminate and force-kill in [`ProcessSession::stop`].
    pub stop_timeout: Duration,
}

impl SessionOptions {
    /// Build options from the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            assistant_cli: config.assistant_cli.clone(),
            permission_mode: config.permission_mode.clone(),
            stop_timeout: Duration::from_secs(config.stop_timeout_seconds),
        }
    }
}

/// Owning context for one assistant child-process lifecycle.
///
/// At most one child is live per session. The `stdin` slot doubles as the
/// write-serialisation lock: every outbound line is written while holding it,
/// so two concurrent control messages can never interleave mid-line. Both
/// slots are cleared on natural exit, on error, and on [`stop`](Self::stop),
/// after which the session is immediately eligible for a new
/// [`run`](Self::run).
#[derive(Debug)]
pub struct ProcessSession {
    working_dir: PathBuf,
    options: SessionOptions,
    child: Arc<Mutex<Option<Child>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
}

impl ProcessSession {
    /// Create an empty session rooted at `working_dir`.
    #[must_use]
    pub fn new(working_dir: PathBuf, options: SessionOptions) -> Self {
        Self {
            working_dir,
            options,
            child: Arc::new(Mutex::new(None)),
            stdin: Arc::new(Mutex::new(None)),
        }
    }

    /// The session's immutable working directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Start one exchange: spawn the CLI, send `message`, and stream events.
    ///
    /// The returned receiver yields events in stdout arrival order and closes
    /// when the exchange ends — on a terminal `result` message, on EOF, or
    /// after a fatal failure. Failures never surface as `Err`: they are
    /// folded into the stream as `system/error` events (spawn failures and
    /// I/O errors) or `system/raw` events (unparsable lines), so the caller
    /// always just drains the channel.
    ///
    /// A `run` issued while a child is already owned is rejected: the stream
    /// carries exactly one `system/error` event and closes, leaving the
    /// active exchange untouched.
    pub async fn run(&self, message: &str) -> mpsc::Receiver<SessionEvent> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let stdout = {
            let mut child_slot = self.child.lock().await;
            if child_slot.is_some() {
                let _ = tx.try_send(SessionEvent::Error {
                    content: "a process is already running for this session".into(),
                });
                return rx;
            }

            match self.spawn_child() {
                Ok((child, stdin, stdout)) => {
                    *child_slot = Some(child);
                    drop(child_slot);
                    *self.stdin.lock().await = Some(stdin);
                    stdout
                }
                Err(event) => {
                    let _ = tx.try_send(event);
                    return rx;
                }
            }
        };

        let child_slot = Arc::clone(&self.child);
        let stdin_slot = Arc::clone(&self.stdin);
        let stop_timeout = self.options.stop_timeout;
        let initial = ControlMessage::user(message);
        tokio::spawn(async move {
            let kill = pump_events(stdout, &stdin_slot, &initial, &tx).await;
            // Close the event stream before awaiting process exit so the
            // consumer observes the end of the exchange immediately.
            drop(tx);
            cleanup(&child_slot, &stdin_slot, kill, stop_timeout).await;
        });

        rx
    }

    /// Grant or deny a pending tool-use permission request.
    ///
    /// Best-effort: silently dropped when no process is owned.
    pub async fn send_permission_response(&self, tool_use_id: &str, allowed: bool) {
        self.send_control(ControlMessage::PermissionResponse {
            tool_use_id: tool_use_id.to_owned(),
            allowed,
        })
        .await;
    }

    /// Send survey answers back to the assistant.
    ///
    /// Best-effort: silently dropped when no process is owned.
    pub async fn send_question_response(
        &self,
        answers: std::collections::BTreeMap<String, Value>,
    ) {
        self.send_control(ControlMessage::QuestionResponse { answers })
            .await;
    }

    /// Signal the assistant to resume processing.
    ///
    /// Best-effort: silently dropped when no process is owned.
    pub async fn send_continue(&self) {
        self.send_control(ControlMessage::Continue).await;
    }

    /// Terminate the owned child process, if any.
    ///
    /// Requests graceful termination (SIGTERM on unix), waits up to the
    /// configured timeout, then force-kills. Idempotent, and safe to call
    /// while a `run` is draining output: the reader observes EOF and its
    /// stream closes shortly after. The process handle is always cleared.
    pub async fn stop(&self) {
        // Closing stdin first lets a well-behaved child exit on its own.
        self.stdin.lock().await.take();

        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return;
        };

        terminate(&mut child);

        match tokio::time::timeout(self.options.stop_timeout, child.wait()).await {
            Ok(status) => {
                debug!(?status, "assistant process stopped");
            }
            Err(_elapsed) => {
                warn!(
                    timeout = ?self.options.stop_timeout,
                    "assistant process did not exit in time; force-killing"
                );
                let _ = child.kill().await;
            }
        }
    }

    /// True iff a process handle is owned and the child has not yet exited.
    pub async fn is_running(&self) -> bool {
        let mut guard = self.child.lock().await;
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Spawn the CLI with piped stdio; map failures to a `system/error` event.
    fn spawn_child(&self) -> std::result::Result<(Child, ChildStdin, ChildStdout), SessionEvent> {
        let mut cmd = Command::new(&self.options.assistant_cli);
        cmd.args(STREAM_ARGS)
            .arg("--permission-mode")
            .arg(&self.options.permission_mode)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            let content = if err.kind() == std::io::ErrorKind::NotFound {
                format!(
                    "assistant CLI not found: make sure '{}' is installed and on your PATH",
                    self.options.assistant_cli
                )
            } else {
                format!("failed to start assistant: {err}")
            };
            SessionEvent::Error { content }
        })?;

        let stdin = child.stdin.take().ok_or_else(|| SessionEvent::Error {
            content: "failed to capture assistant stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| SessionEvent::Error {
            content: "failed to capture assistant stdout".into(),
        })?;

        info!(
            pid = child.id().unwrap_or(0),
            cli = self.options.assistant_cli,
            workspace = %self.working_dir.display(),
            "assistant process spawned"
        );

        Ok((child, stdin, stdout))
    }

    /// Serialise and write one control message, tolerating an absent process.
    async fn send_control(&self, msg: ControlMessage) {
        match write_line(&self.stdin, &msg).await {
            Ok(true) => {}
            Ok(false) => debug!("no active process; control message dropped"),
            Err(err) => warn!(%err, "failed to deliver control message"),
        }
    }
}

/// Write one newline-terminated JSON line to the stdin slot.
///
/// Returns `Ok(false)` when no stdin is held (process absent or stopped).
/// The slot's mutex is the write-serialisation lock: it is held across the
/// full write-and-flush so concurrent messages land as whole lines.
async fn write_line(stdin_slot: &Mutex<Option<ChildStdin>>, msg: &ControlMessage) -> Result<bool> {
    let mut guard = stdin_slot.lock().await;
    let Some(stdin) = guard.as_mut() else {
        return Ok(false);
    };

    let mut bytes = serde_json::to_vec(msg)?;
    bytes.push(b'\n');

    stdin
        .write_all(&bytes)
        .await
        .map_err(|err| AppError::Session(format!("write to assistant stdin failed: {err}")))?;
    stdin
        .flush()
        .await
        .map_err(|err| AppError::Session(format!("flush to assistant stdin failed: {err}")))?;

    Ok(true)
}

/// Send the initial message, then drain stdout into `tx` until the exchange
/// ends.
///
/// Returns `true` when the child should be killed instead of awaited — the
/// consumer dropped the receiver mid-exchange.
async fn pump_events(
    stdout: ChildStdout,
    stdin_slot: &Mutex<Option<ChildStdin>>,
    initial: &ControlMessage,
    tx: &mpsc::Sender<SessionEvent>,
) -> bool {
    if let Err(err) = write_line(stdin_slot, initial).await {
        let _ = tx
            .send(SessionEvent::Error {
                content: format!("failed to send initial message: {err}"),
            })
            .await;
        return true;
    }

    let mut framed = FramedRead::new(stdout, EventCodec::new());

    while let Some(item) = framed.next().await {
        match item {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<Value>(line) {
                    Ok(value) => {
                        let event = SessionEvent::Message(value);
                        let terminal = event.is_result();
                        if tx.send(event).await.is_err() {
                            return true;
                        }
                        if terminal {
                            // End of the exchange; do not wait for EOF.
                            return false;
                        }
                    }
                    Err(err) => {
                        // A single malformed line must not abort the session.
                        let event = SessionEvent::Raw {
                            content: line.to_owned(),
                            error: err.to_string(),
                        };
                        if tx.send(event).await.is_err() {
                            return true;
                        }
                    }
                }
            }
            Err(err) => {
                // Fatal to this run; the child may still be healthy enough
                // to keep writing, so kill rather than wait.
                let _ = tx
                    .send(SessionEvent::Error {
                        content: format!("error reading assistant output: {err}"),
                    })
                    .await;
                return true;
            }
        }
    }

    false
}

/// Clear both slots and reap the child, if it is still owned.
///
/// `kill` short-circuits the wait for consumers that abandoned the exchange.
/// Taking the child out of the slot frees the session for a new `run`, so
/// the wait here is bounded by `stop_timeout` and escalates to a kill the
/// same way [`ProcessSession::stop`] does: a child that lingers after its
/// output ended must not outlive the exchange it served. When `stop` raced
/// this cleanup the slot is already empty and there is nothing left to do.
async fn cleanup(
    child_slot: &Mutex<Option<Child>>,
    stdin_slot: &Mutex<Option<ChildStdin>>,
    kill: bool,
    stop_timeout: Duration,
) {
    stdin_slot.lock().await.take();

    let child = child_slot.lock().await.take();
    let Some(mut child) = child else {
        return;
    };

    if kill {
        let _ = child.kill().await;
        return;
    }

    match tokio::time::timeout(stop_timeout, child.wait()).await {
        Ok(Ok(status)) => debug!(?status, "assistant process exited"),
        Ok(Err(err)) => warn!(%err, "error awaiting assistant process exit"),
        Err(_elapsed) => {
            warn!(
                timeout = ?stop_timeout,
                "assistant process lingered after its output ended; force-killing"
            );
            let _ = child.kill().await;
        }
    }
}

/// Request graceful termination of the child.
#[cfg(unix)]
fn terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        if let Ok(raw) = i32::try_from(pid) {
            let _ = kill(Pid::from_raw(raw), Signal::SIGTERM);
        }
    }
}

/// Request termination of the child; no graceful signal exists off-unix.
#[cfg(not(unix))]
fn terminate(child: &mut Child) {
    let _ = child.start_kill();
}
