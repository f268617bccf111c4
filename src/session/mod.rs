//! Session persistence: the durable record of each conversation's bound
//! agent-CLI session id, workspace, and model selection.
//!
//! # Submodules
//!
//! - [`store`]: the [`store::SessionStore`] trait and [`store::SessionRecord`].
//! - [`sqlite_store`]: the `SQLite`-backed concrete implementation.

pub mod sqlite_store;
pub mod store;

pub use sqlite_store::SqliteSessionStore;
pub use store::{SessionRecord, SessionStore};
