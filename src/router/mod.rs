//! Router glue: ties the allowlist, file downloader, session store, process
//! pool, and stream writer together into the single entry point an
//! inbound-message transport calls.
//!
//! # Submodules
//!
//! - [`commands`]: `/start` and `/model` slash-command parsing.

pub mod commands;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::acp::{AcpClient, SessionUpdate};
use crate::allowlist::Allowlist;
use crate::config::RelayConfig;
use crate::errors::{AppError, Result};
use crate::files::FileDownloader;
use crate::messaging::{Destination, MessagingApi};
use crate::pool::slot::AffinityKey;
use crate::pool::ProcessPool;
use crate::queue::QueuedRequest;
use crate::session::store::SessionStore;
use crate::stream::StreamWriter;

use commands::Command;

/// One inbound message from the messaging platform, already past platform
/// framing: a plain `(user, topic, text)` triple plus any attachments,
/// already resolved to local source paths by the transport layer.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub user_id: String,
    pub topic_id: String,
    pub text: String,
    /// Already-resolved source paths for any attachments; [`FileDownloader`]
    /// copies each into the conversation's workspace before the prompt is
    /// driven.
    pub attachments: Vec<PathBuf>,
}

/// Ties every collaborator together behind one entry point,
/// [`Router::handle_inbound_message`].
pub struct Router {
    pool: Arc<ProcessPool>,
    sessions: Arc<dyn SessionStore>,
    messaging: Arc<dyn MessagingApi>,
    files: Arc<dyn FileDownloader>,
    allowlist: Arc<dyn Allowlist>,
    config: RelayConfig,
}

impl Router {
    /// Construct a router from its collaborators and configuration.
    #[must_use]
    pub fn new(
        pool: Arc<ProcessPool>,
        sessions: Arc<dyn SessionStore>,
        messaging: Arc<dyn MessagingApi>,
        files: Arc<dyn FileDownloader>,
        allowlist: Arc<dyn Allowlist>,
        config: RelayConfig,
    ) -> Self {
        Self {
            pool,
            sessions,
            messaging,
            files,
            allowlist,
            config,
        }
    }

    /// Handle one inbound message end to end: allowlist check, command
    /// dispatch, or the full attachment-download / pool-acquire / prompt /
    /// release-and-dequeue pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures outside the best-effort paths
    /// (e.g. the session store itself is unreachable); failures while
    /// driving an acquired slot are logged and apologized for rather than
    /// propagated, per the error-propagation policy: the pool guarantees
    /// slot release regardless of how the turn ended.
    pub async fn handle_inbound_message(self: &Arc<Self>, msg: InboundMessage) -> Result<()> {
        if !self.allowlist.is_allowed(&msg.user_id).await {
            let dest = Destination {
                user_id: msg.user_id.clone(),
                topic_id: msg.topic_id.clone(),
            };
            let _ = self
                .messaging
                .send_message(&dest, "You are not authorized to use this bot.")
                .await;
            return Ok(());
        }

        if let Some(cmd) = commands::parse(&msg.text) {
            return self.handle_command(&msg.user_id, &msg.topic_id, cmd).await;
        }

        self.handle_prompt(msg).await
    }

    async fn handle_command(&self, user_id: &str, topic_id: &str, cmd: Command) -> Result<()> {
        let dest = Destination {
            user_id: user_id.to_owned(),
            topic_id: topic_id.to_owned(),
        };

        match cmd {
            Command::Start => {
                self.sessions.delete_session(user_id, topic_id).await?;
                let _ = self
                    .messaging
                    .send_message(&dest, "Started a fresh conversation.")
                    .await;
            }
            Command::ModelList => {
                let current = self
                    .sessions
                    .get_session(user_id, topic_id)
                    .await?
                    .map_or_else(|| "auto".to_owned(), |record| record.model);
                let _ = self
                    .messaging
                    .send_message(&dest, &commands::render_model_list(&current))
                    .await;
            }
            Command::ModelSet(model) => {
                self.handle_model_set(user_id, topic_id, &dest, &model).await?;
            }
        }
        Ok(())
    }

    async fn handle_model_set(
        &self,
        user_id: &str,
        topic_id: &str,
        dest: &Destination,
        model: &str,
    ) -> Result<()> {
        if !commands::is_valid_model(model) {
            let _ = self
                .messaging
                .send_message(
                    dest,
                    &format!("Unknown model \"{model}\".\n\n{}", commands::render_model_list(model)),
                )
                .await;
            return Ok(());
        }

        // Persist before attempting to apply live: the store is the
        // source of truth a fresh process will `session/load` against, so
        // it must win even if the live apply below never runs.
        match self.sessions.set_model(user_id, topic_id, model).await {
            Ok(()) => {
                let _ = self
                    .messaging
                    .send_message(dest, &format!("Model set to {model}."))
                    .await;
                self.try_apply_model_live(user_id, topic_id, model).await;
            }
            Err(AppError::NotFound(_)) => {
                let _ = self
                    .messaging
                    .send_message(dest, "Start a conversation first, then set a model.")
                    .await;
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Best-effort: if this conversation's slot is reachable without
    /// queueing, push the new model onto the live session too. A failure
    /// here is invisible to the user — the store already has the
    /// authoritative value and the next fresh process will pick it up via
    /// `session/load` regardless.
    async fn try_apply_model_live(self: &Arc<Self>, user_id: &str, topic_id: &str, model: &str) {
        let affinity = (user_id.to_owned(), topic_id.to_owned());
        let acquired = match self.pool.acquire(affinity.clone()).await {
            Ok(acquired) => acquired,
            Err(_) => return,
        };

        if let Ok(Some(record)) = self.sessions.get_session(user_id, topic_id).await {
            if let Err(err) = acquired.client.session_set_model(&record.acp_session_id, model).await {
                warn!(%err, "router: best-effort live model apply failed");
            }
        }

        let handoff = self.pool.release_and_dequeue(acquired.slot_id, &affinity).await;
        if let Some((request, client)) = handoff {
            self.spawn_handoff(acquired.slot_id, client, request);
        }
    }

    async fn handle_prompt(self: &Arc<Self>, msg: InboundMessage) -> Result<()> {
        let affinity: AffinityKey = (msg.user_id.clone(), msg.topic_id.clone());
        let workspace_dir = self.workspace_dir_for(&msg.user_id, &msg.topic_id).await?;

        let mut file_paths = Vec::with_capacity(msg.attachments.len());
        for source in &msg.attachments {
            file_paths.push(self.files.download_into(source, &workspace_dir).await?);
        }

        match self.pool.acquire(affinity.clone()).await {
            Ok(acquired) => {
                self.drive_on_slot(
                    acquired.slot_id,
                    acquired.client,
                    affinity,
                    msg.text,
                    file_paths,
                    workspace_dir,
                )
                .await;
            }
            Err(AppError::Acp(_) | AppError::SpawnFailed(_)) => {
                self.pool
                    .enqueue(QueuedRequest {
                        affinity,
                        text: msg.text,
                        file_paths,
                        workspace_dir,
                    })
                    .await;
            }
            Err(other) => {
                let dest = Destination {
                    user_id: msg.user_id,
                    topic_id: msg.topic_id,
                };
                let _ = self
                    .messaging
                    .send_message(&dest, "Sorry, something went wrong handling your message.")
                    .await;
                return Err(other);
            }
        }
        Ok(())
    }

    async fn workspace_dir_for(&self, user_id: &str, topic_id: &str) -> Result<PathBuf> {
        match self.sessions.get_session(user_id, topic_id).await? {
            Some(record) => Ok(PathBuf::from(record.workspace_path)),
            None => Ok(self.config.workspace_root.join(user_id).join(topic_id)),
        }
    }

    /// Drive one prompt turn on an already-acquired slot, then release it —
    /// via `release_and_dequeue` so a waiting successor is handed off
    /// atomically — regardless of how the turn ended. Any failure is logged
    /// and apologized for rather than propagated; this is the scoped
    /// release block the error-handling policy requires.
    async fn drive_on_slot(
        self: &Arc<Self>,
        slot_id: u64,
        client: Arc<AcpClient>,
        affinity: AffinityKey,
        text: String,
        file_paths: Vec<PathBuf>,
        workspace_dir: PathBuf,
    ) {
        let dest = Destination {
            user_id: affinity.0.clone(),
            topic_id: affinity.1.clone(),
        };

        if let Err(err) = self
            .run_turn(&client, slot_id, &affinity, &dest, &text, &file_paths, &workspace_dir)
            .await
        {
            warn!(%err, user_id = %affinity.0, topic_id = %affinity.1, "router: turn failed");
            let _ = self
                .messaging
                .send_message(&dest, "Sorry, something went wrong handling your message.")
                .await;
        }

        let handoff = self.pool.release_and_dequeue(slot_id, &affinity).await;
        if let Some((request, next_client)) = handoff {
            self.spawn_handoff(slot_id, next_client, request);
        }
    }

    fn spawn_handoff(self: &Arc<Self>, slot_id: u64, client: Arc<AcpClient>, request: QueuedRequest) {
        let router = Arc::clone(self);
        let delay = self.config.handoff_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            router
                .drive_on_slot(
                    slot_id,
                    client,
                    request.affinity,
                    request.text,
                    request.file_paths,
                    request.workspace_dir,
                )
                .await;
        });
    }

    async fn run_turn(
        &self,
        client: &Arc<AcpClient>,
        slot_id: u64,
        affinity: &AffinityKey,
        dest: &Destination,
        text: &str,
        file_paths: &[PathBuf],
        workspace_dir: &Path,
    ) -> Result<()> {
        let (user_id, topic_id) = affinity;
        let cwd = workspace_dir.to_string_lossy().into_owned();
        let existing = self.sessions.get_session(user_id, topic_id).await?;

        let session_id = match existing {
            Some(record) => match client.session_load(&record.acp_session_id, &cwd).await {
                Ok(()) => {
                    self.sessions.touch(user_id, topic_id).await?;
                    record.acp_session_id
                }
                Err(AppError::SessionLoad { holder_pid, .. }) => {
                    let stale = holder_pid.is_some_and(|pid| !process_is_alive(pid));
                    if stale {
                        info!(user_id, topic_id, "router: recovering from stale session lock");
                        let fresh = client.session_new(&cwd).await?;
                        self.sessions.upsert_session(user_id, topic_id, &fresh, &cwd).await?;
                        let _ = self
                            .messaging
                            .send_message(dest, "Your previous session lock was stale; started a new session.")
                            .await;
                        fresh
                    } else {
                        let _ = self
                            .messaging
                            .send_message(dest, "Session is temporarily busy, please try again shortly.")
                            .await;
                        return Ok(());
                    }
                }
                Err(other) => return Err(other),
            },
            None => {
                let fresh = client.session_new(&cwd).await?;
                self.sessions.upsert_session(user_id, topic_id, &fresh, &cwd).await?;
                fresh
            }
        };

        let mut prompt_text = text.to_owned();
        if !file_paths.is_empty() {
            prompt_text.push_str("\n\nAttached files:\n");
            for path in file_paths {
                prompt_text.push_str(&format!("- {}\n", path.display()));
            }
        }
        let content = vec![serde_json::json!({ "type": "text", "text": prompt_text })];

        let mut turn = client.session_prompt(&session_id, content).await?;
        let cancel = self.pool.track_inflight(affinity.clone(), slot_id).await;
        let mut writer = StreamWriter::new(Arc::clone(&self.messaging), dest.clone());
        let mut tool_titles: HashMap<String, String> = HashMap::new();

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    let _ = client.session_cancel(&session_id).await;
                    writer.cancel();
                    break;
                }

                update = turn.next() => {
                    match update {
                        Ok(Some(SessionUpdate::AgentMessageChunk { text, .. })) => {
                            let _ = writer.write_chunk(&text).await;
                        }
                        Ok(Some(SessionUpdate::AgentThoughtChunk { text, .. })) => {
                            writer.show_tool_status(&truncate_status(&text)).await;
                        }
                        Ok(Some(SessionUpdate::ToolCallStart { tool_call_id, title, .. })) => {
                            writer.show_tool_status(&title).await;
                            tool_titles.insert(tool_call_id, title);
                        }
                        Ok(Some(SessionUpdate::ToolCallUpdate { tool_call_id, status, .. })) => {
                            if status == "completed" || status == "failed" {
                                if let Some(title) = tool_titles.get(&tool_call_id) {
                                    writer.record_tool_completion(title);
                                }
                            }
                        }
                        Ok(Some(SessionUpdate::Other { .. })) => {}
                        Ok(Some(SessionUpdate::TurnEnd) | None) => break,
                        Err(err) => {
                            writer.cancel();
                            return Err(err);
                        }
                    }
                }
            }
        }

        let _ = writer.finalize().await;
        Ok(())
    }
}

/// Truncate a status line to a sane display length; thought chunks can run
/// much longer than a tool title.
fn truncate_status(text: &str) -> String {
    const MAX: usize = 120;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX {
        trimmed.to_owned()
    } else {
        let head: String = trimmed.chars().take(MAX).collect();
        format!("{head}…")
    }
}

/// Whether `pid` is still alive on this host. Used to distinguish a stale
/// `session/load` lock (holder no longer running) from a live one.
///
/// On non-Unix targets there is no portable signal-based liveness check;
/// conservatively assume the process is alive so no session is ever
/// silently replaced.
#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(i32::try_from(pid).unwrap_or(i32::MAX)), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acp::spawner::SpawnConfig;
    use crate::allowlist::StaticAllowlist;
    use crate::files::LocalFileDownloader;
    use crate::messaging::recording::{Recorded, RecordingMessagingApi};
    use crate::session::sqlite_store::SqliteSessionStore;
    use std::time::Duration;

    fn config() -> RelayConfig {
        RelayConfig {
            max_processes: 1,
            idle_timeout_seconds: 60,
            agent_name: "default".into(),
            log_level: "info".into(),
            host_cli: "true".into(),
            host_cli_args: vec![],
            workspace_root: std::env::temp_dir().join("agent-relay-router-tests"),
            startup_timeout_seconds: 5,
            handoff_delay_ms: 1,
            db_path: PathBuf::from(":memory:"),
        }
    }

    async fn router() -> Arc<Router> {
        let spawn = SpawnConfig {
            host_cli: "true".into(),
            host_cli_args: vec![],
            workspace_root: std::env::temp_dir(),
            agent_name: "default".into(),
            startup_timeout: Duration::from_secs(1),
        };
        let pool = Arc::new(ProcessPool::new(spawn, 0, Duration::from_secs(60)));
        let sessions = Arc::new(SqliteSessionStore::connect_memory().await.expect("session store"));
        let messaging = Arc::new(RecordingMessagingApi::new());
        let files = Arc::new(LocalFileDownloader);
        let allowlist = Arc::new(StaticAllowlist::new(["u1".to_owned()]));
        Arc::new(Router::new(pool, sessions, messaging, files, allowlist, config()))
    }

    #[tokio::test]
    async fn disallowed_user_gets_a_rejection_and_nothing_else() {
        let router = router().await;
        let msg = InboundMessage {
            user_id: "stranger".into(),
            topic_id: "t1".into(),
            text: "hello".into(),
            attachments: vec![],
        };
        router.handle_inbound_message(msg).await.expect("handle_inbound_message");
    }

    #[tokio::test]
    async fn model_list_before_any_session_shows_auto_as_current() {
        let router = router().await;
        router
            .handle_command("u1", "t1", Command::ModelList)
            .await
            .expect("handle_command");
    }

    #[tokio::test]
    async fn unknown_model_is_rejected_without_touching_the_store() {
        let router = router().await;
        let dest = Destination {
            user_id: "u1".into(),
            topic_id: "t1".into(),
        };
        router
            .handle_model_set("u1", "t1", &dest, "not-a-real-model")
            .await
            .expect("handle_model_set");

        let record = router.sessions.get_session("u1", "t1").await.expect("get_session");
        assert!(record.is_none(), "no session should be created by a rejected /model call");
    }

    #[tokio::test]
    async fn start_command_deletes_any_existing_session() {
        let router = router().await;
        router
            .sessions
            .upsert_session("u1", "t1", "sess-1", "/tmp/agent-relay-router-tests/u1/t1")
            .await
            .expect("upsert_session");

        router
            .handle_command("u1", "t1", Command::Start)
            .await
            .expect("handle_command");

        let record = router.sessions.get_session("u1", "t1").await.expect("get_session");
        assert!(record.is_none());
    }

    #[tokio::test]
    async fn prompt_with_no_pool_capacity_is_queued_not_dropped() {
        let router = router().await;
        let msg = InboundMessage {
            user_id: "u1".into(),
            topic_id: "t1".into(),
            text: "hello agent".into(),
            attachments: vec![],
        };
        router.handle_inbound_message(msg).await.expect("handle_inbound_message");

        assert_eq!(router.pool.queue_len().await, 1);
    }

    #[test]
    fn truncate_status_clips_long_thoughts() {
        let long = "x".repeat(500);
        let truncated = truncate_status(&long);
        assert!(truncated.ends_with('…'));
        assert!(truncated.chars().count() <= 121);
    }
}
