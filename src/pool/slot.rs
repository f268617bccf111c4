//! A single warm agent-CLI process and its bookkeeping.

use std::sync::Arc;
use std::time::Instant;

use crate::acp::AcpClient;

/// Identity a slot is currently bound to, or was last bound to: `(user_id,
/// topic_id)`.
pub type AffinityKey = (String, String);

/// A slot's availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    /// Not currently driving a request; eligible for acquisition or reap.
    Idle,
    /// Driving a request on behalf of its `affinity` conversation.
    Busy,
}

/// One pooled agent-CLI process.
pub struct ProcessSlot {
    /// Stable identifier for this slot, reused across the process's
    /// lifetime (a new process spawned into the same slot index keeps the
    /// slot id; only the `client` changes).
    pub slot_id: u64,
    /// Live connection to the subprocess. `None` only during the brief
    /// placeholder window between reserving a slot and the spawn
    /// completing.
    pub client: Option<Arc<AcpClient>>,
    /// Current state.
    pub status: SlotStatus,
    /// The `(user_id, topic_id)` this slot is bound to, if any. A slot
    /// keeps its last affinity even while `Idle`, so a conversation that
    /// returns shortly after releasing the slot reuses the same warm
    /// process and its loaded session.
    pub affinity: Option<AffinityKey>,
    /// The user this slot was first bound to. Set on first use, cleared
    /// only on reap — a slot never serves a second user's conversation
    /// while a first user's affinity could still claim it, even across
    /// distinct topics.
    pub user_id: Option<String>,
    /// Timestamp of the last transition into `Idle`. Used by the reaper to
    /// decide when a slot has been cold long enough to kill.
    pub idle_since: Option<Instant>,
}

impl ProcessSlot {
    /// Construct a placeholder slot reserving capacity before the
    /// subprocess has actually been spawned.
    #[must_use]
    pub fn placeholder(slot_id: u64, affinity: AffinityKey) -> Self {
        let user_id = affinity.0.clone();
        Self {
            slot_id,
            client: None,
            status: SlotStatus::Busy,
            affinity: Some(affinity),
            user_id: Some(user_id),
            idle_since: None,
        }
    }

    /// Construct an already-warm, unbound idle slot for a process spawned
    /// ahead of any conversation claiming it.
    #[must_use]
    pub fn warm(slot_id: u64, client: Arc<AcpClient>) -> Self {
        Self {
            slot_id,
            client: Some(client),
            status: SlotStatus::Idle,
            affinity: None,
            user_id: None,
            idle_since: Some(Instant::now()),
        }
    }

    /// Fill in a placeholder slot once its subprocess has spawned.
    pub fn fulfill(&mut self, client: Arc<AcpClient>) {
        self.client = Some(client);
    }

    /// Mark the slot idle, starting the reap clock.
    pub fn mark_idle(&mut self) {
        self.status = SlotStatus::Idle;
        self.idle_since = Some(Instant::now());
    }

    /// Mark the slot busy for `affinity`, binding `user_id` on first use and
    /// clearing the reap clock.
    pub fn mark_busy(&mut self, affinity: AffinityKey) {
        self.status = SlotStatus::Busy;
        if self.user_id.is_none() {
            self.user_id = Some(affinity.0.clone());
        }
        self.affinity = Some(affinity);
        self.idle_since = None;
    }

    /// Whether this slot may serve `user_id`: either unbound, or already
    /// bound to the same user.
    #[must_use]
    pub fn accepts_user(&self, user_id: &str) -> bool {
        self.user_id.as_deref().is_none_or(|bound| bound == user_id)
    }
}
