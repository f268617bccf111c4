#![forbid(unsafe_code)]

//! `agent-relay` — multi-conversation gateway binary.
//!
//! Bootstraps configuration, the session store, the process pool and its
//! reaper, and the router, then waits for a shutdown signal.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::acp::spawner::SpawnConfig;
use agent_relay::allowlist::StaticAllowlist;
use agent_relay::config::RelayConfig;
use agent_relay::files::LocalFileDownloader;
use agent_relay::messaging::http_client::HttpMessagingApi;
use agent_relay::pool::ProcessPool;
use agent_relay::router::Router;
use agent_relay::session::sqlite_store::SqliteSessionStore;
use agent_relay::{AppError, Result};

/// Path to the config file, overridable via `RELAY_CONFIG`.
const DEFAULT_CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    init_tracing()?;
    info!("agent-relay bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run())
}

async fn run() -> Result<()> {
    let config_path =
        std::env::var("RELAY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
    let config = RelayConfig::load_from_path(&config_path)?;
    info!(path = %config_path, "configuration loaded");

    let bot_token = std::env::var(&config.messaging_bot_token_env).map_err(|_| {
        AppError::Config(format!(
            "environment variable '{}' (messaging_bot_token_env) is not set",
            config.messaging_bot_token_env
        ))
    })?;

    let sessions = Arc::new(SqliteSessionStore::connect(&config.db_path).await?);
    info!(path = ?config.db_path, "session store connected");

    let spawn_template = SpawnConfig {
        host_cli: config.host_cli.clone(),
        host_cli_args: config.host_cli_args.clone(),
        workspace_root: config.workspace_root.clone(),
        agent_name: config.agent_name.clone(),
        startup_timeout: config.startup_timeout(),
    };
    let pool = Arc::new(ProcessPool::new(
        spawn_template,
        config.max_processes,
        config.idle_timeout(),
    ));
    pool.initialize().await?;
    info!("process pool warmed with one process");

    let shutdown = CancellationToken::new();
    let reaper_pool = Arc::clone(&pool);
    let reaper_shutdown = shutdown.clone();
    let reaper_handle = tokio::spawn(async move {
        reaper_pool.run_reaper(reaper_shutdown).await;
    });
    info!("process pool reaper started");

    let messaging = Arc::new(HttpMessagingApi::new(config.messaging_base_url.clone(), bot_token));
    let files = Arc::new(LocalFileDownloader);
    let allowlist = Arc::new(StaticAllowlist::new(config.allowed_user_ids.clone()));

    // The messaging-platform transport that would call
    // `router.handle_inbound_message` for each inbound event is an external
    // collaborator outside this crate's scope; the router is constructed
    // here so a transport can be wired to it.
    let _router = Arc::new(Router::new(
        Arc::clone(&pool),
        sessions,
        messaging,
        files,
        allowlist,
        config.clone(),
    ));
    info!("router ready");

    shutdown_signal().await;
    info!("shutdown signal received — starting graceful shutdown");
    shutdown.cancel();

    tokio::spawn(async {
        shutdown_signal().await;
        error!("second shutdown signal received — forcing exit");
        std::process::exit(1);
    });

    shutdown_with_timeout(&pool, reaper_handle).await;
    info!("agent-relay shut down");

    Ok(())
}

/// Maximum time to wait for graceful shutdown before force-exiting.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

async fn shutdown_with_timeout(pool: &ProcessPool, reaper_handle: tokio::task::JoinHandle<()>) {
    let shutdown_fut = async {
        pool.shutdown().await;
        let _ = reaper_handle.await;
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown_fut).await.is_err() {
        error!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "graceful shutdown timed out — exiting"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt()
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?;
    Ok(())
}
