//! Generic HTTP adapter for [`super::MessagingApi`].
//!
//! Shaped like a typical bot API: a base URL plus a bot token, `POST`ed to
//! with a JSON body for text and a multipart body for documents. No
//! platform-specific SDK is introduced — `reqwest` is used directly, the
//! same way the teacher repository reaches for raw `reqwest` for the one
//! HTTP call its own platform SDK does not cover (the Slack file-upload
//! URL `PUT`).

use std::path::Path;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::errors::{AppError, Result};

use super::{Destination, MessagingApi};

/// HTTP-based [`MessagingApi`] implementation.
pub struct HttpMessagingApi {
    client: reqwest::Client,
    base_url: String,
    bot_token: String,
}

impl HttpMessagingApi {
    /// Construct an adapter against `base_url` (e.g.
    /// `https://api.example-chat.org`) authenticating with `bot_token`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, bot_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            bot_token: bot_token.into(),
        }
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }
}

#[async_trait]
impl MessagingApi for HttpMessagingApi {
    async fn send_message(&self, dest: &Destination, text: &str) -> Result<String> {
        let body = json!({
            "chat_id": dest.user_id,
            "message_thread_id": dest.topic_id,
            "text": text,
        });

        let response = self
            .client
            .post(self.endpoint("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Messaging(format!("sendMessage failed: {err}")))?;

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|err| AppError::Messaging(format!("sendMessage: invalid response: {err}")))?;

        value
            .get("result")
            .and_then(|r| r.get("message_id"))
            .map(ToString::to_string)
            .ok_or_else(|| AppError::Messaging("sendMessage: missing message_id".into()))
    }

    async fn send_draft(&self, dest: &Destination, text: &str) -> Result<()> {
        debug!(user_id = %dest.user_id, topic_id = %dest.topic_id, "messaging: sending draft preview");
        self.send_message(dest, text).await.map(|_| ())
    }

    async fn send_document(&self, dest: &Destination, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| AppError::Messaging(format!("failed to read document: {err}")))?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".into());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(filename);
        let form = reqwest::multipart::Form::new()
            .text("chat_id", dest.user_id.clone())
            .text("message_thread_id", dest.topic_id.clone())
            .part("document", part);

        self.client
            .post(self.endpoint("sendDocument"))
            .multipart(form)
            .send()
            .await
            .map_err(|err| AppError::Messaging(format!("sendDocument failed: {err}")))?;

        Ok(())
    }
}
