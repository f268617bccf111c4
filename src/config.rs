//! Global configuration parsing and validation.
//!
//! Covers exactly the operator surface named by the specification —
//! `max_processes`, `idle_timeout_seconds`, `agent_name`, `log_level` —
//! plus the spawn parameters the [`crate::acp::spawner`] needs to actually
//! launch the agent-CLI process. There is no CLI argument parser; the binary
//! reads the path named by the `RELAY_CONFIG` environment variable
//! (default `config.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{AppError, Result};

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Maximum number of concurrent agent-CLI subprocesses. Must be ≥ 1.
    pub max_processes: usize,
    /// Seconds an idle slot may sit warm before the reaper kills it.
    pub idle_timeout_seconds: u64,
    /// Name of the agent profile passed to the host CLI (`--agent <name>`).
    pub agent_name: String,
    /// `tracing` env-filter directive, e.g. `"info"` or `"agent_relay=debug"`.
    pub log_level: String,
    /// Host CLI binary that speaks the ACP wire protocol, e.g. `kiro-cli`.
    pub host_cli: String,
    /// Fixed arguments passed to `host_cli` before agent-specific flags.
    pub host_cli_args: Vec<String>,
    /// Root directory under which per-conversation workspace directories
    /// are created.
    pub workspace_root: PathBuf,
    /// Seconds to wait for a spawned process's ready signal / `initialize`
    /// response before declaring the spawn failed.
    pub startup_timeout_seconds: u64,
    /// Milliseconds to wait after a `ReleaseAndDequeue` handoff before
    /// driving the handed-off request on the reused slot.
    #[serde(default = "default_handoff_delay_ms")]
    pub handoff_delay_ms: u64,
    /// Path to the `SQLite` database file backing the session store.
    pub db_path: PathBuf,
    /// Base URL of the messaging platform's bot API, e.g.
    /// `https://api.example-chat.org`.
    pub messaging_base_url: String,
    /// Name of the environment variable holding the bot token. Kept out of
    /// the config file itself, the same separation the teacher draws
    /// between `config.toml` and keyring-/env-sourced credentials.
    #[serde(default = "default_messaging_bot_token_env")]
    pub messaging_bot_token_env: String,
    /// User ids allowed to interact with the relay at all.
    #[serde(default)]
    pub allowed_user_ids: Vec<String>,
}

const fn default_handoff_delay_ms() -> u64 {
    100
}

fn default_messaging_bot_token_env() -> String {
    "AGENT_RELAY_BOT_TOKEN".to_owned()
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// The reaper's scan interval: half of `idle_timeout_seconds`.
    #[must_use]
    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds / 2)
    }

    /// `idle_timeout_seconds` as a [`Duration`].
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }

    /// `startup_timeout_seconds` as a [`Duration`].
    #[must_use]
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_seconds)
    }

    /// `handoff_delay_ms` as a [`Duration`].
    #[must_use]
    pub fn handoff_delay(&self) -> Duration {
        Duration::from_millis(self.handoff_delay_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.max_processes == 0 {
            return Err(AppError::Config(
                "max_processes must be greater than zero".into(),
            ));
        }
        if self.host_cli.trim().is_empty() {
            return Err(AppError::Config("host_cli must not be empty".into()));
        }
        if self.agent_name.trim().is_empty() {
            return Err(AppError::Config("agent_name must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::RelayConfig;

    fn sample_toml() -> &'static str {
        r#"
            max_processes = 4
            idle_timeout_seconds = 300
            agent_name = "default"
            log_level = "info"
            host_cli = "kiro-cli"
            host_cli_args = ["acp"]
            workspace_root = "/tmp/agent-relay"
            startup_timeout_seconds = 10
            db_path = "/tmp/agent-relay/sessions.db"
            messaging_base_url = "https://api.example-chat.org"
            allowed_user_ids = ["u1"]
        "#
    }

    #[test]
    fn parses_minimal_valid_config() {
        let config = RelayConfig::from_toml_str(sample_toml()).expect("valid config");
        assert_eq!(config.max_processes, 4);
        assert_eq!(config.handoff_delay_ms, 100, "default applies when omitted");
    }

    #[test]
    fn rejects_zero_max_processes() {
        let raw = sample_toml().replace("max_processes = 4", "max_processes = 0");
        let err = RelayConfig::from_toml_str(&raw).unwrap_err();
        assert!(matches!(err, crate::errors::AppError::Config(_)));
    }

    #[test]
    fn reap_interval_is_half_idle_timeout() {
        let config = RelayConfig::from_toml_str(sample_toml()).expect("valid config");
        assert_eq!(config.reap_interval().as_secs(), 150);
    }
}
