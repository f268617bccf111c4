//! Turning a prompt turn's chunk stream into throttled draft previews and a
//! final, boundary-safe message split.
//!
//! # Submodules
//!
//! - [`markup`]: a small markdown-subset AST and renderer, used when the
//!   destination surface supports inline formatting.
//! - [`split`]: the boundary heuristic and tag-stack backtrack/reopen
//!   algorithm shared by the plain-text and formatted paths.
//! - [`writer`]: [`writer::StreamWriter`], the stateful per-turn driver.

pub mod markup;
pub mod split;
pub mod writer;

pub use markup::{render_markup, MarkupSpan, Tag};
pub use writer::StreamWriter;
