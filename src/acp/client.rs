//! The ACP client state machine.
//!
//! One [`AcpClient`] owns one spawned agent-CLI subprocess. It drives the
//! `initialize` handshake, `session/new` and `session/load`, a single prompt
//! turn's interleaved response/notification stream, `session/cancel` and
//! `session/set_model`, and process teardown.
//!
//! # State machine
//!
//! `Idle → Initializing → Ready → (Busy → Ready)* → Dead`
//!
//! `Dead` is reached either by an explicit [`AcpClient::kill`] or by the
//! subprocess exiting / closing its stdout on its own; in both cases every
//! pending completion is failed with [`AppError::ProcessDied`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::acp::codec::AcpCodec;
use crate::acp::spawner::{self, SpawnConfig};
use crate::acp::types::{ClientState, InboundEnvelope, RpcErrorBody, SessionUpdate};
use crate::errors::{parse_holder_pid, AppError, Result};

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<std::result::Result<Value, RpcErrorBody>>>>>;

/// How long to wait for a `session/update` notification before re-checking
/// whether the in-flight request's response has arrived.
const NOTIFICATION_POLL: Duration = Duration::from_millis(100);

/// Grace period after `SIGTERM` before escalating to `SIGKILL`.
const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// A live connection to one agent-CLI subprocess.
pub struct AcpClient {
    state: Mutex<ClientState>,
    next_id: AtomicI64,
    pending: PendingMap,
    notify_rx: Mutex<mpsc::UnboundedReceiver<SessionUpdate>>,
    writer_tx: mpsc::UnboundedSender<Value>,
    child: Mutex<Option<Child>>,
    pid: u32,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

impl AcpClient {
    /// Spawn the configured agent-CLI and start its reader/writer tasks.
    ///
    /// The client is in [`ClientState::Idle`]; call [`AcpClient::initialize`]
    /// before issuing any session operation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SpawnFailed`] if the process could not be
    /// launched or its stdio could not be captured.
    pub fn spawn(config: &SpawnConfig) -> Result<Self> {
        let conn = spawner::spawn_agent(config)?;
        let pid = conn.pid;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let reader_task = spawn_reader(conn.stdout, Arc::clone(&pending), notify_tx, pid);
        let writer_task = spawn_writer(conn.stdin, writer_rx, pid);

        Ok(Self {
            state: Mutex::new(ClientState::Idle),
            next_id: AtomicI64::new(1),
            pending,
            notify_rx: Mutex::new(notify_rx),
            writer_tx,
            child: Mutex::new(Some(conn.child)),
            pid,
            reader_task,
            writer_task,
        })
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ClientState {
        *self.state.lock().await
    }

    /// Whether the underlying process is still believed to be alive, i.e.
    /// the client has not observed `Dead`.
    pub async fn is_alive(&self) -> bool {
        !matches!(*self.state.lock().await, ClientState::Dead)
    }

    /// Perform the `initialize` handshake.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the client is not [`ClientState::Idle`],
    /// or if the agent-CLI returns an error response or dies before
    /// responding.
    pub async fn initialize(&self, protocol_version: u32) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state != ClientState::Idle {
                return Err(AppError::Acp(
                    "initialize called outside of Idle state".into(),
                ));
            }
            *state = ClientState::Initializing;
        }

        let result = self
            .request("initialize", Some(json!({ "protocolVersion": protocol_version })))
            .await;

        let mut state = self.state.lock().await;
        *state = match result {
            Ok(_) => ClientState::Ready,
            Err(_) => ClientState::Dead,
        };
        result.map(|_| ())
    }

    /// Create a new session rooted at `cwd`, returning its session id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] on a malformed or error response.
    pub async fn session_new(&self, cwd: &str) -> Result<String> {
        let result = self.request("session/new", Some(json!({ "cwd": cwd }))).await?;
        result
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| AppError::Acp("session/new response missing sessionId".into()))
    }

    /// Resume an existing session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SessionLoad`] if the agent-CLI rejects the
    /// resume (typically because another process holds the session's
    /// on-disk lock); the error carries the holder's PID when the message
    /// identifies one, so the caller can tell a stale lock from a live one.
    pub async fn session_load(&self, session_id: &str, cwd: &str) -> Result<()> {
        let params = Some(json!({ "sessionId": session_id, "cwd": cwd }));
        match self.request("session/load", params).await {
            Ok(_) => {
                self.drain_notifications().await;
                Ok(())
            }
            Err(AppError::Acp(message)) => {
                let holder_pid = parse_holder_pid(&message);
                Err(AppError::SessionLoad {
                    message,
                    holder_pid,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Drain any notifications buffered while no prompt turn was in flight
    /// (e.g. replayed history emitted synchronously by `session/load`).
    async fn drain_notifications(&self) {
        let mut rx = self.notify_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// Begin a prompt turn. Returns a [`PromptTurn`] that yields
    /// [`SessionUpdate`]s as they arrive, ending with a synthetic
    /// [`SessionUpdate::TurnEnd`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] if the client is not [`ClientState::Ready`].
    pub async fn session_prompt(&self, session_id: &str, prompt: Vec<Value>) -> Result<PromptTurn<'_>> {
        {
            let mut state = self.state.lock().await;
            if *state != ClientState::Ready {
                return Err(AppError::Acp(
                    "session/prompt called outside of Ready state".into(),
                ));
            }
            *state = ClientState::Busy;
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let envelope = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "session/prompt",
            "params": { "sessionId": session_id, "prompt": prompt },
        });

        if self.writer_tx.send(envelope).is_err() {
            self.pending.lock().await.remove(&id);
            *self.state.lock().await = ClientState::Dead;
            return Err(AppError::ProcessDied(
                "agent-cli stdin closed before prompt could be sent".into(),
            ));
        }

        Ok(PromptTurn {
            client: self,
            response_rx: rx,
            response: None,
            finished: false,
        })
    }

    /// Fire-and-forget cancellation of the in-flight prompt turn.
    ///
    /// Per the ACP wire contract this is a notification, not a request: the
    /// caller observes cancellation by the prompt turn's response resolving
    /// (usually with a `cancelled` stop reason), not by a direct reply here.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ProcessDied`] if the writer channel is closed.
    pub async fn session_cancel(&self, session_id: &str) -> Result<()> {
        let envelope = json!({
            "jsonrpc": "2.0",
            "method": "session/cancel",
            "params": { "sessionId": session_id },
        });
        self.writer_tx
            .send(envelope)
            .map_err(|_| AppError::ProcessDied("agent-cli stdin closed during cancel".into()))
    }

    /// Set the active model for a session.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Acp`] on an error response from the agent-CLI.
    pub async fn session_set_model(&self, session_id: &str, model: &str) -> Result<()> {
        self.request(
            "session/set_model",
            Some(json!({ "sessionId": session_id, "model": model })),
        )
        .await
        .map(|_| ())
    }

    /// Send a request and await its response.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let mut envelope = json!({ "jsonrpc": "2.0", "id": id, "method": method });
        if let Some(params) = params {
            envelope["params"] = params;
        }

        if self.writer_tx.send(envelope).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AppError::ProcessDied(format!(
                "agent-cli stdin closed before {method} could be sent"
            )));
        }

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(AppError::Acp(err.message)),
            Err(_) => Err(AppError::ProcessDied(format!(
                "agent-cli stdout closed while awaiting {method} response"
            ))),
        }
    }

    /// Kill the subprocess (and its process group) and mark the client
    /// dead.
    ///
    /// Idempotent: calling `kill` on an already-dead client is a no-op.
    /// Sends `SIGTERM` to the process group, waits up to
    /// [`KILL_GRACE_PERIOD`], then escalates to `SIGKILL`. Every still-
    /// pending completion is failed with [`AppError::ProcessDied`].
    pub async fn kill(&self) {
        {
            let mut state = self.state.lock().await;
            if *state == ClientState::Dead {
                return;
            }
            *state = ClientState::Dead;
        }

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let pgid = Pid::from_raw(-(i32::try_from(self.pid).unwrap_or(i32::MAX)));
            if kill(pgid, Signal::SIGTERM).is_ok() {
                tokio::time::sleep(KILL_GRACE_PERIOD).await;
            }
            let _ = kill(pgid, Signal::SIGKILL);
        }

        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }

        self.reader_task.abort();
        self.writer_task.abort();

        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(RpcErrorBody {
                code: -32000,
                message: "agent-cli process killed".into(),
                data: Value::Null,
            }));
        }
        info!(pid = self.pid, "acp client killed");
    }
}

impl Drop for AcpClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

/// The interleaved response/notification stream for one `session/prompt`
/// turn.
///
/// Call [`PromptTurn::next`] in a loop: it yields each
/// [`SessionUpdate::AgentMessageChunk`]/`AgentThoughtChunk`/`ToolCall*`
/// notification as it arrives, then — once the prompt's own response has
/// arrived *and* the notification queue has fully drained — yields exactly
/// one [`SessionUpdate::TurnEnd`] and returns `Ok(None)` on every
/// subsequent call.
pub struct PromptTurn<'a> {
    client: &'a AcpClient,
    response_rx: oneshot::Receiver<std::result::Result<Value, RpcErrorBody>>,
    response: Option<std::result::Result<Value, RpcErrorBody>>,
    finished: bool,
}

impl<'a> PromptTurn<'a> {
    /// Fetch the next update in the turn, or `Ok(None)` once the turn is
    /// over.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ProcessDied`] if the agent-CLI's stdout closes
    /// mid-turn, or [`AppError::Acp`] if the prompt's response was an error.
    pub async fn next(&mut self) -> Result<Option<SessionUpdate>> {
        if self.finished {
            return Ok(None);
        }

        loop {
            if self.response.is_none() {
                let mut notify_rx = self.client.notify_rx.lock().await;
                tokio::select! {
                    biased;

                    update = notify_rx.recv() => {
                        drop(notify_rx);
                        match update {
                            Some(update) => return Ok(Some(update)),
                            None => {
                                self.finished = true;
                                *self.client.state.lock().await = ClientState::Dead;
                                return Err(AppError::ProcessDied(
                                    "agent-cli stdout closed during prompt turn".into(),
                                ));
                            }
                        }
                    }

                    result = &mut self.response_rx => {
                        drop(notify_rx);
                        self.response = Some(match result {
                            Ok(inner) => inner,
                            Err(_) => {
                                self.finished = true;
                                *self.client.state.lock().await = ClientState::Dead;
                                return Err(AppError::ProcessDied(
                                    "agent-cli stdout closed while awaiting prompt response".into(),
                                ));
                            }
                        });
                    }

                    () = tokio::time::sleep(NOTIFICATION_POLL) => {
                        drop(notify_rx);
                    }
                }
            } else {
                let mut notify_rx = self.client.notify_rx.lock().await;
                let pending = match notify_rx.try_recv() {
                    Ok(update) => {
                        drop(notify_rx);
                        return Ok(Some(update));
                    }
                    Err(_) => {
                        drop(notify_rx);
                        self.response.take()
                    }
                };
                self.finished = true;
                *self.client.state.lock().await = ClientState::Ready;
                let Some(response) = pending else {
                    return Ok(None);
                };
                return match response {
                    Ok(_) => Ok(Some(SessionUpdate::TurnEnd)),
                    Err(err) => Err(AppError::Acp(err.message)),
                };
            }
        }
    }
}

fn spawn_reader(
    stdout: tokio::process::ChildStdout,
    pending: PendingMap,
    notify_tx: mpsc::UnboundedSender<SessionUpdate>,
    pid: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut framed = FramedRead::new(stdout, AcpCodec::new());

        loop {
            match framed.next().await {
                None => {
                    debug!(pid, "acp reader: stdout closed");
                    break;
                }
                Some(Err(err)) => {
                    warn!(pid, %err, "acp reader: framing error, stopping");
                    break;
                }
                Some(Ok(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<InboundEnvelope>(&line) {
                        Ok(envelope) => route_inbound(envelope, &pending, &notify_tx, pid).await,
                        Err(err) => {
                            warn!(pid, %err, raw_line = %line, "acp reader: malformed json, skipping");
                        }
                    }
                }
            }
        }

        // Stdout closed: fail every still-pending request and stop
        // accepting new notifications.
        let mut pending = pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(RpcErrorBody {
                code: -32000,
                message: "agent-cli stdout closed".into(),
                data: Value::Null,
            }));
        }
    })
}

async fn route_inbound(
    envelope: InboundEnvelope,
    pending: &PendingMap,
    notify_tx: &mpsc::UnboundedSender<SessionUpdate>,
    pid: u32,
) {
    if envelope.is_response() {
        let id = envelope
            .id
            .as_ref()
            .and_then(Value::as_i64)
            .unwrap_or_default();
        if let Some(tx) = pending.lock().await.remove(&id) {
            let outcome = match envelope.error {
                Some(err) => Err(err),
                None => Ok(envelope.result),
            };
            let _ = tx.send(outcome);
        } else {
            debug!(pid, id, "acp reader: response for unknown request id");
        }
    } else if envelope.is_server_request() {
        // The agent-CLI is not expected to issue server-initiated requests
        // in this deployment; log and ignore rather than silently hanging
        // the peer waiting for a reply.
        debug!(pid, method = ?envelope.method, "acp reader: ignoring server-initiated request");
    } else if envelope.is_notification() {
        let method = envelope.method.unwrap_or_default();
        if method == "session/update" {
            if let Some(update) = parse_session_update(&envelope.params) {
                let _ = notify_tx.send(update);
            }
        } else {
            debug!(pid, method = %method, "acp reader: ignoring unrecognized notification");
        }
    }
}

fn parse_session_update(params: &Value) -> Option<SessionUpdate> {
    let session_id = params.get("sessionId")?.as_str()?.to_owned();
    let update = params.get("update")?;
    let kind = update.get("sessionUpdate")?.as_str()?;

    match kind {
        "agent_message_chunk" => Some(SessionUpdate::AgentMessageChunk {
            session_id,
            text: update.get("content")?.get("text")?.as_str()?.to_owned(),
        }),
        "agent_thought_chunk" => Some(SessionUpdate::AgentThoughtChunk {
            session_id,
            text: update.get("content")?.get("text")?.as_str()?.to_owned(),
        }),
        "tool_call" => Some(SessionUpdate::ToolCallStart {
            session_id,
            tool_call_id: update.get("toolCallId")?.as_str()?.to_owned(),
            title: update
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }),
        "tool_call_update" => Some(SessionUpdate::ToolCallUpdate {
            session_id,
            tool_call_id: update.get("toolCallId")?.as_str()?.to_owned(),
            status: update
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }),
        _ => Some(SessionUpdate::Other {
            session_id,
            raw: update.clone(),
        }),
    }
}

fn spawn_writer(
    mut stdin: ChildStdin,
    mut rx: mpsc::UnboundedReceiver<Value>,
    pid: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(value) = rx.recv().await {
            let mut bytes = match serde_json::to_vec(&value) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(pid, %err, "acp writer: failed to serialize outbound message");
                    continue;
                }
            };
            bytes.push(b'\n');
            if let Err(err) = stdin.write_all(&bytes).await {
                warn!(pid, %err, "acp writer: write failed, stopping");
                break;
            }
        }
        debug!(pid, "acp writer: stopped");
    })
}
