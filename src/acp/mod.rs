//! Agent Client Protocol (ACP) subprocess management.
//!
//! A conversation's agent-CLI process speaks newline-delimited JSON-RPC 2.0
//! over its own stdin/stdout. This module owns the whole lifecycle: spawning
//! the process, framing the wire protocol, driving the handshake and prompt
//! turns, and killing the process group on shutdown.
//!
//! # Submodules
//!
//! - [`codec`]: [`tokio_util::codec::LinesCodec`]-based NDJSON framing with a
//!   1 MiB per-line limit.
//! - [`spawner`]: process spawning with environment isolation, its own
//!   process group, and stdio capture.
//! - [`types`]: JSON-RPC envelope and session-update types.
//! - [`client`]: the `AcpClient` state machine and prompt-turn driver.

pub mod client;
pub mod codec;
pub mod spawner;
pub mod types;

pub use client::AcpClient;
pub use types::{ClientState, SessionUpdate};
