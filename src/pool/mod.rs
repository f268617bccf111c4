//! Process pool: bounded set of warm agent-CLI subprocesses, multiplexed
//! across conversations by `(user, topic)` affinity.
//!
//! # Submodules
//!
//! - [`slot`]: [`slot::ProcessSlot`] and its status.
//! - [`pool`]: [`pool::ProcessPool`], the acquire/release/reap state machine.

pub mod pool;
pub mod slot;

pub use pool::ProcessPool;
pub use slot::{ProcessSlot, SlotStatus};
