//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// ACP protocol framing or unexpected-state failure, or a server error
    /// response for a non-`session/load` operation.
    Acp(String),
    /// `session/load` was rejected by the agent-CLI.
    ///
    /// Carries the PID of the process holding the lock when the server's
    /// error text identifies one, so the caller can distinguish a stale
    /// lock (holder no longer alive) from a live one without re-parsing
    /// the message a second time.
    SessionLoad {
        /// Server-reported message, passed through verbatim.
        message: String,
        /// PID parsed out of `"Session is active in another process (PID N)"`,
        /// if the message matched that shape.
        holder_pid: Option<u32>,
    },
    /// The agent subprocess exited or its stdout closed mid-stream.
    ProcessDied(String),
    /// A placeholder slot's subprocess failed to spawn or initialize.
    SpawnFailed(String),
    /// Messaging-platform API failure.
    Messaging(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Caller is not authorized to perform the requested action.
    Unauthorized(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Acp(msg) => write!(f, "acp: {msg}"),
            Self::SessionLoad { message, .. } => write!(f, "session/load rejected: {message}"),
            Self::ProcessDied(msg) => write!(f, "process died: {msg}"),
            Self::SpawnFailed(msg) => write!(f, "spawn failed: {msg}"),
            Self::Messaging(msg) => write!(f, "messaging: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Unauthorized(msg) => write!(f, "unauthorized: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Parse the holding PID out of a `session/load` error message shaped like
/// `"Session is active in another process (PID 12345)"`.
///
/// Returns `None` if the message does not match that shape, in which case
/// the caller must treat the failure as a live/unknown-cause lock with no
/// automatic recovery.
#[must_use]
pub fn parse_holder_pid(message: &str) -> Option<u32> {
    let marker = "PID ";
    let start = message.find(marker)? + marker.len();
    let rest = &message[start..];
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}
