//! Per-user authorization gate.

use std::collections::HashSet;

use async_trait::async_trait;

/// Decides whether a user is allowed to interact with the relay at all.
#[async_trait]
pub trait Allowlist: Send + Sync {
    /// Whether `user_id` may send messages to the relay.
    async fn is_allowed(&self, user_id: &str) -> bool;
}

/// Fixed, in-memory allowlist loaded from configuration at startup.
pub struct StaticAllowlist {
    users: HashSet<String>,
}

impl StaticAllowlist {
    /// Build an allowlist from a fixed set of user ids.
    #[must_use]
    pub fn new(users: impl IntoIterator<Item = String>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Allowlist for StaticAllowlist {
    async fn is_allowed(&self, user_id: &str) -> bool {
        self.users.contains(user_id)
    }
}
