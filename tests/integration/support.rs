//! Shared construction helpers for router-level scenario tests.

use std::path::PathBuf;
use std::sync::Arc;

use agent_relay::allowlist::StaticAllowlist;
use agent_relay::config::RelayConfig;
use agent_relay::files::LocalFileDownloader;
use agent_relay::messaging::recording::RecordingMessagingApi;
use agent_relay::messaging::MessagingApi;
use agent_relay::pool::ProcessPool;
use agent_relay::router::Router;
use agent_relay::session::{SessionStore, SqliteSessionStore};

/// A `RelayConfig` with a tiny `handoff_delay_ms`, pointed at a scratch
/// workspace, and authorizing exactly the given users.
pub fn relay_config(max_processes: usize, users: &[&str]) -> RelayConfig {
    RelayConfig {
        max_processes,
        idle_timeout_seconds: 60,
        agent_name: "default".into(),
        log_level: "info".into(),
        host_cli: "/bin/sh".into(),
        host_cli_args: vec![],
        workspace_root: std::env::temp_dir().join("agent-relay-integration-tests"),
        startup_timeout_seconds: 5,
        handoff_delay_ms: 20,
        db_path: PathBuf::from(":memory:"),
        messaging_base_url: "https://api.example-chat.test".into(),
        messaging_bot_token_env: "AGENT_RELAY_TEST_TOKEN".into(),
        allowed_user_ids: users.iter().map(|&u| u.to_owned()).collect(),
    }
}

/// Every collaborator a scenario test needs direct access to, alongside the
/// `Router` built from clones of the same `Arc`s — so assertions can
/// inspect pool/session/messaging state without going through the router's
/// own (private) fields.
pub struct Harness {
    pub router: Arc<Router>,
    pub pool: Arc<ProcessPool>,
    pub sessions: Arc<dyn SessionStore>,
    pub messaging: Arc<RecordingMessagingApi>,
}

/// Build a full harness whose process pool spawns `script` (run under
/// `/bin/sh -c`) as its agent-CLI stand-in.
pub async fn harness(max_processes: usize, users: &[&str], script: &str) -> Harness {
    let config = relay_config(max_processes, users);
    let spawn_config = super::fake_agent::config(&config.workspace_root, script);
    let pool = Arc::new(ProcessPool::new(spawn_config, max_processes, config.idle_timeout()));
    let sessions: Arc<dyn SessionStore> =
        Arc::new(SqliteSessionStore::connect_memory().await.expect("in-memory session store"));
    let messaging = Arc::new(RecordingMessagingApi::new());
    let files = Arc::new(LocalFileDownloader);
    let allowlist = Arc::new(StaticAllowlist::new(users.iter().map(|&u| u.to_owned())));

    let router = Arc::new(Router::new(
        Arc::clone(&pool),
        Arc::clone(&sessions),
        Arc::clone(&messaging) as Arc<dyn MessagingApi>,
        files,
        allowlist,
        config,
    ));

    Harness {
        router,
        pool,
        sessions,
        messaging,
    }
}
