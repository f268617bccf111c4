//! Tracking of the one request currently being driven per conversation, so
//! a `/cancel` can signal it without the caller needing to know which pool
//! slot is serving it.

use std::collections::HashMap;

use tokio_util::sync::CancellationToken;

use crate::pool::slot::AffinityKey;

/// Bookkeeping for a request currently being driven on a pool slot.
#[derive(Debug, Clone)]
pub struct InFlightRequest {
    /// The slot driving this request.
    pub slot_id: u64,
    /// Cancellation signal: cancelling it asks the router's prompt loop to
    /// issue `session/cancel` and stop forwarding further chunks.
    pub cancel: CancellationToken,
}

/// Registry of in-flight requests keyed by conversation.
#[derive(Debug, Default)]
pub struct InFlightTracker {
    requests: HashMap<AffinityKey, InFlightRequest>,
}

impl InFlightTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `affinity` as in-flight on `slot_id`, returning the
    /// [`CancellationToken`] the caller should observe during the turn.
    pub fn track(&mut self, affinity: AffinityKey, slot_id: u64) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.requests.insert(
            affinity,
            InFlightRequest {
                slot_id,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Signal cancellation for `affinity`'s in-flight request, if any.
    ///
    /// Idempotent: cancelling an already-cancelled or absent request is a
    /// no-op returning `false`.
    pub fn cancel(&self, affinity: &AffinityKey) -> bool {
        match self.requests.get(affinity) {
            Some(request) => {
                request.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop tracking `affinity` once its turn has ended (normally or via
    /// cancellation).
    pub fn untrack(&mut self, affinity: &AffinityKey) {
        self.requests.remove(affinity);
    }

    /// Whether `affinity` currently has a request in flight.
    #[must_use]
    pub fn is_in_flight(&self, affinity: &AffinityKey) -> bool {
        self.requests.contains_key(affinity)
    }
}
