//! Wire types for the ACP JSON-RPC 2.0 protocol.

use serde::Deserialize;
use serde_json::Value;

/// Lifecycle state of an [`crate::acp::AcpClient`].
///
/// Transitions strictly forward except for the `Busy` ↔ `Ready` cycle that
/// repeats once per prompt turn: `Idle → Initializing → Ready → (Busy →
/// Ready)* → Dead`. `Dead` is terminal; once reached the client must be
/// dropped and, if the conversation continues, a fresh one spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Constructed but `initialize` has not been sent yet.
    Idle,
    /// `initialize` request is in flight.
    Initializing,
    /// Handshake complete; no prompt turn is in flight.
    Ready,
    /// A `session/prompt` request is in flight.
    Busy,
    /// The subprocess exited or its stdout closed; no further requests may
    /// be sent.
    Dead,
}

/// An inbound line from the agent-CLI, before it is routed to either the
/// pending-completions map (has `id`, no `method`) or the notification queue
/// (has `method`, no `id`).
#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    pub id: Option<Value>,
    pub method: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub result: Value,
    pub error: Option<RpcErrorBody>,
}

impl InboundEnvelope {
    /// A response to one of our own requests: has `id`, no `method`.
    #[must_use]
    pub fn is_response(&self) -> bool {
        self.id.is_some() && self.method.is_none()
    }

    /// A server-initiated request: has both `id` and `method`.
    #[must_use]
    pub fn is_server_request(&self) -> bool {
        self.id.is_some() && self.method.is_some()
    }

    /// A notification: has `method`, no `id`.
    #[must_use]
    pub fn is_notification(&self) -> bool {
        self.id.is_none() && self.method.is_some()
    }
}

/// The `error` member of a JSON-RPC response.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Value,
}

/// A `session/update` notification, decoded into the chunk kinds the stream
/// writer understands. Anything not recognized is carried as `Other` rather
/// than dropped, so a server-request or an unrecognized update shape never
/// silently vanishes.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// A chunk of the agent's visible reply text.
    AgentMessageChunk {
        session_id: String,
        text: String,
    },
    /// A chunk of the agent's reasoning/thought stream (shown as a status
    /// line, not part of the final message body).
    AgentThoughtChunk {
        session_id: String,
        text: String,
    },
    /// A tool invocation started.
    ToolCallStart {
        session_id: String,
        tool_call_id: String,
        title: String,
    },
    /// A tool invocation's status changed (running/completed/failed).
    ToolCallUpdate {
        session_id: String,
        tool_call_id: String,
        status: String,
    },
    /// Any recognized-but-unhandled update kind, carried verbatim so the
    /// caller can decide whether to ignore or log it.
    Other {
        session_id: String,
        raw: Value,
    },
    /// Synthetic marker emitted once a prompt turn's response has arrived
    /// and the notification queue has fully drained. Never appears on the
    /// wire.
    TurnEnd,
}
