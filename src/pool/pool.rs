//! The bounded process pool: acquire/release with `(user, topic)` affinity,
//! a placeholder-slot technique for non-blocking concurrent spawns, a
//! background reaper that kills processes idle past their timeout, and the
//! per-topic in-flight cancellation signalling that keeps a conversation's
//! old stream from racing its own replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::spawner::SpawnConfig;
use crate::acp::AcpClient;
use crate::errors::{AppError, Result};
use crate::queue::inflight::InFlightTracker;
use crate::queue::{QueuedRequest, RequestQueue};

use super::slot::{AffinityKey, ProcessSlot, SlotStatus};

/// Protocol version this pool's clients negotiate with the agent-CLI.
const PROTOCOL_VERSION: u32 = 1;

/// A slot handed out by [`ProcessPool::acquire`].
pub struct AcquiredSlot {
    pub slot_id: u64,
    pub client: Arc<AcpClient>,
}

struct PoolInner {
    slots: HashMap<u64, ProcessSlot>,
    affinity_map: HashMap<AffinityKey, u64>,
    queue: RequestQueue,
    inflight: InFlightTracker,
}

/// The bounded set of warm agent-CLI processes shared across all
/// conversations.
pub struct ProcessPool {
    inner: tokio::sync::Mutex<PoolInner>,
    spawn_template: SpawnConfig,
    max_processes: usize,
    idle_timeout: Duration,
    next_slot_id: AtomicU64,
}

impl ProcessPool {
    /// Construct an empty pool. No processes are spawned until
    /// [`ProcessPool::initialize`] or the first `acquire`.
    #[must_use]
    pub fn new(spawn_template: SpawnConfig, max_processes: usize, idle_timeout: Duration) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(PoolInner {
                slots: HashMap::new(),
                affinity_map: HashMap::new(),
                queue: RequestQueue::new(),
                inflight: InFlightTracker::new(),
            }),
            spawn_template,
            max_processes,
            idle_timeout,
            next_slot_id: AtomicU64::new(1),
        }
    }

    /// Spawn one warm subprocess and register it as an idle, unbound slot.
    ///
    /// The pool must carry at least one slot for as long as it runs; call
    /// this once during startup, before serving any conversation.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SpawnFailed`] if the warm process fails to spawn
    /// or complete its `initialize` handshake.
    pub async fn initialize(&self) -> Result<()> {
        let client = self
            .spawn_and_initialize()
            .await
            .map_err(|err| AppError::SpawnFailed(err.to_string()))?;
        let slot_id = self.next_slot_id.fetch_add(1, Ordering::SeqCst);
        let slot = ProcessSlot::warm(slot_id, Arc::new(client));
        let mut inner = self.inner.lock().await;
        inner.slots.insert(slot_id, slot);
        info!(slot_id, "pool: warm process initialized");
        Ok(())
    }

    /// Acquire a slot for `affinity`.
    ///
    /// Phase A: if `affinity` already owns an idle slot, reuse it
    /// directly — this is the common case for a conversation's second and
    /// later messages, and avoids a cold `session/load`. If that slot is
    /// busy instead, the caller must enqueue; any stream still running for
    /// `affinity` on some other slot is signalled to cancel, since the
    /// newer message supersedes it.
    ///
    /// Phase B: otherwise reuse any other idle slot whose `user_id` is
    /// unset or already bound to this user (rebinding its affinity), or —
    /// if the pool has spare capacity — reserve a placeholder slot and
    /// spawn a fresh process for it outside the pool lock, so concurrent
    /// acquisitions for other conversations are not blocked on one spawn.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::SpawnFailed`] if a new process had to be spawned
    /// and the spawn or `initialize` handshake failed. Returns
    /// [`AppError::Acp`]`("no capacity")` if the pool is full and no idle
    /// slot is available — the caller should enqueue the request instead.
    pub async fn acquire(&self, affinity: AffinityKey) -> Result<AcquiredSlot> {
        // Phase A: exact affinity match.
        {
            let mut inner = self.inner.lock().await;
            if let Some(&slot_id) = inner.affinity_map.get(&affinity) {
                let idle_match = inner
                    .slots
                    .get(&slot_id)
                    .is_some_and(|slot| slot.status == SlotStatus::Idle && slot.client.is_some());

                if idle_match {
                    inner.inflight.cancel(&affinity);
                    if let Some(slot) = inner.slots.get_mut(&slot_id) {
                        if let Some(client) = slot.client.clone() {
                            slot.mark_busy(affinity);
                            debug!(slot_id, "pool: reused slot via affinity match");
                            return Ok(AcquiredSlot { slot_id, client });
                        }
                    }
                }

                if inner.slots.contains_key(&slot_id) {
                    // Affinity's slot exists but is busy with this very
                    // conversation's prior turn: the caller must enqueue,
                    // and whatever stream is still running for it should
                    // stop since this newer message supersedes it.
                    inner.inflight.cancel(&affinity);
                    return Err(AppError::Acp("no capacity".into()));
                }

                // Affinity pointed at a slot that no longer exists.
                inner.affinity_map.remove(&affinity);
            }
        }

        // Phase B: any idle slot bound to this user (or unbound), or spawn
        // a new one.
        let reserved_slot_id = {
            let mut inner = self.inner.lock().await;

            let candidate = inner.slots.iter().find(|(_, slot)| {
                slot.status == SlotStatus::Idle && slot.accepts_user(&affinity.0)
            });

            if let Some((&slot_id, _)) = candidate {
                if let Some(slot) = inner.slots.get_mut(&slot_id) {
                    if let Some(old_affinity) = slot.affinity.take() {
                        inner.affinity_map.remove(&old_affinity);
                    }
                    inner.affinity_map.insert(affinity.clone(), slot_id);
                    if let Some(client) = slot.client.clone() {
                        slot.mark_busy(affinity.clone());
                        inner.inflight.cancel(&affinity);
                        debug!(slot_id, "pool: reused idle slot, rebound affinity");
                        return Ok(AcquiredSlot { slot_id, client });
                    }
                }
            }

            if inner.slots.len() >= self.max_processes {
                return Err(AppError::Acp("no capacity".into()));
            }

            let slot_id = self.next_slot_id.fetch_add(1, Ordering::SeqCst);
            inner
                .slots
                .insert(slot_id, ProcessSlot::placeholder(slot_id, affinity.clone()));
            inner.affinity_map.insert(affinity.clone(), slot_id);
            slot_id
        };

        // Spawn outside the pool lock so other conversations' acquires are
        // not blocked on this one's process startup.
        match self.spawn_and_initialize().await {
            Ok(client) => {
                let client = Arc::new(client);
                let mut inner = self.inner.lock().await;
                if let Some(slot) = inner.slots.get_mut(&reserved_slot_id) {
                    slot.fulfill(Arc::clone(&client));
                }
                info!(slot_id = reserved_slot_id, "pool: spawned new process");
                Ok(AcquiredSlot {
                    slot_id: reserved_slot_id,
                    client,
                })
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                inner.slots.remove(&reserved_slot_id);
                if inner.affinity_map.get(&affinity) == Some(&reserved_slot_id) {
                    inner.affinity_map.remove(&affinity);
                }
                warn!(slot_id = reserved_slot_id, %err, "pool: spawn failed, releasing placeholder");
                Err(AppError::SpawnFailed(err.to_string()))
            }
        }
    }

    async fn spawn_and_initialize(&self) -> Result<AcpClient> {
        let client = AcpClient::spawn(&self.spawn_template)?;
        client.initialize(PROTOCOL_VERSION).await?;
        Ok(client)
    }

    /// Release `slot_id` back to idle, untracking its in-flight entry.
    ///
    /// Prefer [`ProcessPool::release_and_dequeue`] when the caller wants the
    /// atomic handoff behaviour; this method never hands off.
    pub async fn release(&self, slot_id: u64, affinity: &AffinityKey) {
        let mut inner = self.inner.lock().await;
        inner.inflight.untrack(affinity);
        let alive = inner
            .slots
            .get(&slot_id)
            .is_some_and(|slot| slot.client.is_some());
        if !alive {
            if let Some(slot) = inner.slots.remove(&slot_id) {
                if let Some(affinity) = slot.affinity {
                    inner.affinity_map.remove(&affinity);
                }
            }
            return;
        }
        if let Some(slot) = inner.slots.get_mut(&slot_id) {
            slot.mark_idle();
        }
    }

    /// Release `slot_id`, then atomically hand it to the next queued
    /// request if one is waiting, in priority order:
    ///
    /// 1. A queued request for the very affinity this slot was just
    ///    serving (a follow-up message sent while the turn was running).
    /// 2. The oldest queued request for any other affinity, provided it
    ///    belongs to a user this slot may serve; if not, it is put back
    ///    and the handoff yields nothing.
    /// 3. None — the slot goes idle.
    ///
    /// Returning the handed-off request (rather than driving it here)
    /// keeps this method non-blocking; the caller is responsible for
    /// actually running the prompt turn, after the configured handoff
    /// delay.
    pub async fn release_and_dequeue(
        &self,
        slot_id: u64,
        affinity: &AffinityKey,
    ) -> Option<(QueuedRequest, Arc<AcpClient>)> {
        let mut inner = self.inner.lock().await;
        inner.inflight.untrack(affinity);

        let alive = inner
            .slots
            .get(&slot_id)
            .is_some_and(|slot| slot.client.is_some());
        if !alive {
            if let Some(slot) = inner.slots.remove(&slot_id) {
                if let Some(affinity) = slot.affinity {
                    inner.affinity_map.remove(&affinity);
                }
            }
            return None;
        }

        let next = inner
            .queue
            .dequeue_affinity(affinity)
            .or_else(|| inner.queue.dequeue());

        let Some(request) = next else {
            if let Some(slot) = inner.slots.get_mut(&slot_id) {
                slot.mark_idle();
            }
            return None;
        };

        let slot_accepts = inner
            .slots
            .get(&slot_id)
            .is_some_and(|slot| slot.accepts_user(&request.affinity.0));
        if !slot_accepts {
            if let Some(slot) = inner.slots.get_mut(&slot_id) {
                slot.mark_idle();
            }
            inner.queue.requeue_front(request);
            return None;
        }

        let Some(slot) = inner.slots.get_mut(&slot_id) else {
            inner.queue.requeue_front(request);
            return None;
        };
        let Some(client) = slot.client.clone() else {
            inner.queue.requeue_front(request);
            return None;
        };

        if let Some(old_affinity) = slot.affinity.take() {
            if old_affinity != request.affinity {
                inner.affinity_map.remove(&old_affinity);
            }
        }
        inner
            .affinity_map
            .insert(request.affinity.clone(), slot_id);
        slot.mark_busy(request.affinity.clone());
        inner.inflight.cancel(&request.affinity);

        Some((request, client))
    }

    /// Enqueue a request that could not be served immediately.
    pub async fn enqueue(&self, request: QueuedRequest) {
        self.inner.lock().await.queue.enqueue(request);
    }

    /// Remove a still-queued request for `affinity`, e.g. on cancellation
    /// before it was ever acquired. Returns whether anything was removed.
    pub async fn remove_queued(&self, affinity: &AffinityKey) -> bool {
        self.inner.lock().await.queue.remove(affinity)
    }

    /// Number of conversations currently waiting for capacity.
    pub async fn queue_len(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Register `affinity` as in-flight on `slot_id`, returning the
    /// [`CancellationToken`] the router's prompt loop should poll between
    /// updates.
    pub async fn track_inflight(&self, affinity: AffinityKey, slot_id: u64) -> CancellationToken {
        self.inner.lock().await.inflight.track(affinity, slot_id)
    }

    /// Stop tracking `affinity`'s in-flight request (normal completion; the
    /// cancel-on-release paths call this themselves).
    pub async fn untrack_inflight(&self, affinity: &AffinityKey) {
        self.inner.lock().await.inflight.untrack(affinity);
    }

    /// Run the reaper loop until `shutdown` is cancelled: every half of the
    /// idle timeout, kill any idle slot that has been idle longer than the
    /// full timeout.
    ///
    /// Never reaps the last remaining slot — leaving the pool fully cold
    /// means every conversation's next message pays a full spawn, so one
    /// warm process is kept alive as long as any exist at all.
    pub async fn run_reaper(&self, shutdown: CancellationToken) {
        let scan_interval = Duration::from_secs((self.idle_timeout.as_secs() / 2).max(1));
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(scan_interval) => {
                    self.reap_once().await;
                }
            }
        }
    }

    async fn reap_once(&self) {
        let mut inner = self.inner.lock().await;
        let live_count = inner.slots.len();
        if live_count <= 1 {
            return;
        }

        let now = std::time::Instant::now();
        let idle_timeout = self.idle_timeout;
        let stale: Vec<u64> = inner
            .slots
            .iter()
            .filter(|(_, slot)| {
                slot.status == SlotStatus::Idle
                    && slot
                        .idle_since
                        .is_some_and(|since| now.duration_since(since) >= idle_timeout)
            })
            .map(|(&id, _)| id)
            .take(live_count - 1)
            .collect();

        for slot_id in stale {
            if let Some(slot) = inner.slots.remove(&slot_id) {
                if let Some(affinity) = &slot.affinity {
                    inner.affinity_map.remove(affinity);
                }
                if let Some(client) = slot.client {
                    info!(slot_id, "pool: reaping idle process");
                    client.kill().await;
                }
            }
        }
    }

    /// Kill every slot's process. Used on shutdown.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        for (_, slot) in inner.slots.drain() {
            if let Some(client) = slot.client {
                client.kill().await;
            }
        }
        inner.affinity_map.clear();
    }
}
