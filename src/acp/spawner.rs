//! ACP agent process spawner.
//!
//! Spawns the configured host CLI in its own process group so a later
//! `kill()` can signal the whole group (the host CLI may itself fork
//! helpers) rather than just the immediate child, with:
//! - `kill_on_drop(true)` so a dropped connection is cleaned up automatically.
//! - `env_clear()` + a safe variable allowlist, so the relay's own secrets
//!   (database path, messaging-API tokens) never leak into the agent's
//!   environment.

use std::path::PathBuf;
use std::time::Duration;

use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::errors::{AppError, Result};

/// Environment variables inherited by the spawned agent process.
///
/// Every other variable from the relay's own environment is stripped via
/// `env_clear()` before the child is launched.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Configuration for spawning an ACP agent process.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Host CLI binary (e.g., `kiro-cli`).
    pub host_cli: String,
    /// Fixed arguments passed to the host CLI before agent-specific flags.
    pub host_cli_args: Vec<String>,
    /// Workspace root directory the child process starts in.
    pub workspace_root: PathBuf,
    /// Name of the agent profile passed to the host CLI.
    pub agent_name: String,
    /// Maximum time to wait for the process to become ready.
    pub startup_timeout: Duration,
}

/// Active stdio connection to a spawned ACP agent process.
///
/// The caller owns `child` (so `kill_on_drop` applies) and drives
/// `stdin`/`stdout` through the reader/writer tasks in
/// [`crate::acp::client`].
#[derive(Debug)]
pub struct AcpConnection {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    /// Process ID at spawn time, used for process-group signalling on kill.
    pub pid: u32,
}

/// Spawn the agent-CLI process described by `config`.
///
/// On Unix, the child is placed in its own session (and therefore its own
/// process group) via `setsid` so that a later kill can target the whole
/// group rather than only the immediate child.
///
/// # Errors
///
/// Returns [`AppError::SpawnFailed`] if the OS spawn fails, or if stdin or
/// stdout could not be captured (should not happen given the `Stdio::piped`
/// configuration below).
pub fn spawn_agent(config: &SpawnConfig) -> Result<AcpConnection> {
    let mut cmd = Command::new(&config.host_cli);

    for arg in &config.host_cli_args {
        cmd.arg(arg);
    }
    cmd.arg("--agent").arg(&config.agent_name);

    cmd.env_clear();
    for &key in ALLOWED_ENV_VARS {
        if let Ok(val) = std::env::var(key) {
            cmd.env(key, val);
        }
    }

    cmd.current_dir(&config.workspace_root)
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    {
        // Places the child in a new process group (pgid == its own pid),
        // so `kill()` can signal the whole group via `killpg` instead of
        // just the immediate process.
        cmd.process_group(0);
    }

    let mut child = cmd
        .spawn()
        .map_err(|err| AppError::SpawnFailed(format!("failed to spawn agent-cli: {err}")))?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::SpawnFailed("agent-cli exited immediately after spawn".into()))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::SpawnFailed("failed to capture agent-cli stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::SpawnFailed("failed to capture agent-cli stdout".into()))?;

    Ok(AcpConnection {
        child,
        stdin,
        stdout,
        pid,
    })
}
