//! `SQLite`-backed [`SessionStore`].

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use crate::errors::{AppError, Result};

use super::store::{SessionRecord, SessionStore};

const DEFAULT_MODEL: &str = "auto";

/// `SQLite`-backed session store.
///
/// One row per `(user_id, topic_id)` pair. Schema bootstrap is idempotent
/// (`CREATE TABLE IF NOT EXISTS`), matching the teacher's database-module
/// convention of applying migrations on every connect rather than via a
/// separate migration command.
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

#[derive(Debug, FromRow)]
struct SessionRow {
    user_id: String,
    topic_id: String,
    acp_session_id: String,
    workspace_path: String,
    model: String,
    created_at: String,
    last_activity_at: String,
}

impl SessionRow {
    fn into_record(self) -> Result<SessionRecord> {
        Ok(SessionRecord {
            user_id: self.user_id,
            topic_id: self.topic_id,
            acp_session_id: self.acp_session_id,
            workspace_path: self.workspace_path,
            model: self.model,
            created_at: parse_rfc3339(&self.created_at)?,
            last_activity_at: parse_rfc3339(&self.last_activity_at)?,
        })
    }
}

fn parse_rfc3339(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| AppError::Db(format!("corrupt timestamp '{raw}': {err}")))
}

impl SqliteSessionStore {
    /// Connect to a file-backed database, creating it and its parent
    /// directory if missing, and bootstrap the schema.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Db`] if the connection or schema bootstrap
    /// fails.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| AppError::Db(format!("failed to create db dir: {err}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&path.to_string_lossy())
            .map_err(|err| AppError::Db(format!("invalid db path: {err}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        Self::bootstrap(&pool).await?;
        Ok(Self { pool })
    }

    /// Connect to an in-memory database, kept alive for the store's
    /// lifetime. Used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Db`] if the connection or schema bootstrap
    /// fails.
    pub async fn connect_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|err| AppError::Db(format!("invalid memory uri: {err}")))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .connect_with(opts)
            .await?;

        Self::bootstrap(&pool).await?;
        Ok(Self { pool })
    }

    async fn bootstrap(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sessions (
                user_id          TEXT NOT NULL,
                topic_id         TEXT NOT NULL,
                acp_session_id   TEXT NOT NULL,
                workspace_path   TEXT NOT NULL,
                model            TEXT NOT NULL DEFAULT 'auto',
                created_at       TEXT NOT NULL,
                last_activity_at TEXT NOT NULL,
                PRIMARY KEY (user_id, topic_id)
            )
            ",
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn upsert_session(
        &self,
        user_id: &str,
        topic_id: &str,
        acp_session_id: &str,
        workspace_path: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r"
            INSERT INTO sessions
                (user_id, topic_id, acp_session_id, workspace_path, model, created_at, last_activity_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, topic_id) DO UPDATE SET
                acp_session_id   = excluded.acp_session_id,
                workspace_path   = excluded.workspace_path,
                model            = excluded.model,
                last_activity_at = excluded.last_activity_at
            ",
        )
        .bind(user_id)
        .bind(topic_id)
        .bind(acp_session_id)
        .bind(workspace_path)
        .bind(DEFAULT_MODEL)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session(&self, user_id: &str, topic_id: &str) -> Result<Option<SessionRecord>> {
        let row: Option<SessionRow> = sqlx::query_as(
            "SELECT user_id, topic_id, acp_session_id, workspace_path, model, created_at, last_activity_at \
             FROM sessions WHERE user_id = ? AND topic_id = ?",
        )
        .bind(user_id)
        .bind(topic_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(SessionRow::into_record).transpose()
    }

    async fn touch(&self, user_id: &str, topic_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE sessions SET last_activity_at = ? WHERE user_id = ? AND topic_id = ?")
            .bind(&now)
            .bind(user_id)
            .bind(topic_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_model(&self, user_id: &str, topic_id: &str, model: &str) -> Result<()> {
        let result = sqlx::query("UPDATE sessions SET model = ? WHERE user_id = ? AND topic_id = ?")
            .bind(model)
            .bind(user_id)
            .bind(topic_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "no session for user {user_id} topic {topic_id}"
            )));
        }
        Ok(())
    }

    async fn delete_session(&self, user_id: &str, topic_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM sessions WHERE user_id = ? AND topic_id = ?")
            .bind(user_id)
            .bind(topic_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
