//! The messaging-platform boundary: sending draft previews, finalized
//! messages, and documents back to a conversation.
//!
//! The concrete platform (forum-topic chat) is external to this crate; only
//! the narrow [`MessagingApi`] trait crosses the boundary, with an HTTP
//! adapter ([`http_client::HttpMessagingApi`]) for production and an
//! in-memory recorder ([`recording::RecordingMessagingApi`]) for tests.

pub mod http_client;
pub mod recording;

use async_trait::async_trait;

use crate::errors::Result;

/// Destination for an outbound message: a user's conversation, identified
/// by the same `(user_id, topic_id)` pair used everywhere else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    pub user_id: String,
    pub topic_id: String,
}

/// Operations the stream writer and router need against the messaging
/// platform.
#[async_trait]
pub trait MessagingApi: Send + Sync {
    /// Send a finalized message, returning a platform message id the
    /// caller can use for later edits (not required by this crate, but
    /// useful for tests asserting ordering).
    async fn send_message(&self, dest: &Destination, text: &str) -> Result<String>;

    /// Send or update a throttled draft preview. Implementations may
    /// collapse rapid calls into a single edit of the same platform
    /// message; the trait does not mandate how.
    async fn send_draft(&self, dest: &Destination, text: &str) -> Result<()>;

    /// Send a document (file) to the conversation.
    async fn send_document(&self, dest: &Destination, path: &std::path::Path) -> Result<()>;
}
