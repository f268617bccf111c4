//! The `SessionStore` trait and the record it persists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;

/// The durable state the relay keeps for one conversation (one messaging
/// forum topic).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// `(user_id, topic_id)` — the conversation this record belongs to.
    pub user_id: String,
    pub topic_id: String,
    /// The agent-CLI's own session identifier, used with `session/load` to
    /// resume the conversation on a freshly spawned process.
    pub acp_session_id: String,
    /// Workspace directory the session's process runs in.
    pub workspace_path: String,
    /// Selected model id, or `"auto"` if the user has not overridden it.
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Durable storage for [`SessionRecord`]s.
///
/// The one production implementation is [`super::SqliteSessionStore`]; the
/// trait exists so the router and pool can be exercised in tests against
/// an in-memory fake without a real database file.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create or replace the session bound to `(user_id, topic_id)`.
    ///
    /// Always resets `model` to `"auto"` — a brand new agent-CLI session
    /// has no model override yet, even if a previous session for this
    /// topic had one.
    async fn upsert_session(
        &self,
        user_id: &str,
        topic_id: &str,
        acp_session_id: &str,
        workspace_path: &str,
    ) -> Result<()>;

    /// Fetch the session bound to `(user_id, topic_id)`, if any.
    async fn get_session(&self, user_id: &str, topic_id: &str) -> Result<Option<SessionRecord>>;

    /// Update `last_activity_at` to now.
    async fn touch(&self, user_id: &str, topic_id: &str) -> Result<()>;

    /// Persist a model override for `(user_id, topic_id)`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::errors::AppError::NotFound`] if no session exists
    /// yet for this conversation.
    async fn set_model(&self, user_id: &str, topic_id: &str, model: &str) -> Result<()>;

    /// Delete the session bound to `(user_id, topic_id)`, if any.
    async fn delete_session(&self, user_id: &str, topic_id: &str) -> Result<()>;
}
