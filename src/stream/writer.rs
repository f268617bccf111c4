//! Per-turn stream writer: buffers agent-message chunks, throttles draft
//! previews, tracks the current tool-status line and completed tool
//! titles, and performs the final boundary-safe split and send.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::warn;

use crate::errors::Result;
use crate::messaging::{Destination, MessagingApi};

use super::markup::{plain_text, render_markup, render_to_string};
use super::split::{split_markup, split_plain};

/// Sliding-window size kept for the draft preview: only the tail of the
/// buffer is shown, since most chat surfaces render a draft as a single
/// evolving message rather than an ever-growing one.
const WINDOW_SIZE: usize = 4000;

/// Minimum interval between draft edits sent to the messaging platform.
const DRAFT_THROTTLE: Duration = Duration::from_millis(500);

/// Drives one prompt turn's outbound message traffic.
pub struct StreamWriter {
    messaging: Arc<dyn MessagingApi>,
    dest: Destination,
    buffer: String,
    last_draft_sent: Option<Instant>,
    last_tool_status: Option<String>,
    tool_titles: Vec<String>,
    cancelled: bool,
}

impl StreamWriter {
    /// Construct a writer for one turn targeting `dest`.
    #[must_use]
    pub fn new(messaging: Arc<dyn MessagingApi>, dest: Destination) -> Self {
        Self {
            messaging,
            dest,
            buffer: String::new(),
            last_draft_sent: None,
            last_tool_status: None,
            tool_titles: Vec::new(),
            cancelled: false,
        }
    }

    /// Append a chunk of agent reply text and, if the throttle window has
    /// elapsed, send an updated draft preview.
    ///
    /// The throttle check happens *before* any send attempt and before the
    /// timer is updated, so a throttled call leaves the timer untouched —
    /// the next chunk is checked against the same deadline, not a new one
    /// that a throttled call would otherwise have reset.
    ///
    /// # Errors
    ///
    /// Returns an error if the messaging platform call fails.
    pub async fn write_chunk(&mut self, text: &str) -> Result<()> {
        if self.cancelled {
            return Ok(());
        }
        self.buffer.push_str(text);

        let due = match self.last_draft_sent {
            None => true,
            Some(last) => last.elapsed() >= DRAFT_THROTTLE,
        };
        if !due {
            return Ok(());
        }

        let preview = sliding_window(&self.buffer, WINDOW_SIZE);
        match self.messaging.send_draft(&self.dest, &preview).await {
            Ok(()) => {}
            Err(err) => warn!(%err, "stream writer: draft send failed, will retry on next chunk"),
        }
        self.last_draft_sent = Some(Instant::now());
        Ok(())
    }

    /// Show a tool-status line (a single short line prefixed by 🔧),
    /// deduplicated against the last one shown so a tool that reports the
    /// same status repeatedly does not spam drafts. Best-effort: failures
    /// are logged, not propagated.
    pub async fn show_tool_status(&mut self, status: &str) {
        if self.cancelled {
            return;
        }
        let line = format!("🔧 {status}");
        if self.last_tool_status.as_deref() == Some(line.as_str()) {
            return;
        }
        self.last_tool_status = Some(line.clone());
        let preview = format!("{}\n{line}", sliding_window(&self.buffer, WINDOW_SIZE));
        if let Err(err) = self.messaging.send_draft(&self.dest, &preview).await {
            warn!(%err, "stream writer: tool status draft failed");
        }
    }

    /// Clear the current tool-status line so the next draft preview shows
    /// only message text, and remember `title` for the final tool summary
    /// (deduplicated — a tool invoked twice appears once).
    pub fn record_tool_completion(&mut self, title: &str) {
        self.last_tool_status = None;
        if !self.tool_titles.iter().any(|t| t == title) {
            self.tool_titles.push(title.to_owned());
        }
    }

    /// Finalize the turn:
    ///
    /// 1. If cancelled or the buffer is empty, do nothing.
    /// 2. Best-effort draft update to an ellipsis (clears the preview).
    /// 3. Render the buffer as inline markup.
    /// 4. If tool titles were recorded, prepend a single "🔧 a → b → c"
    ///    line.
    /// 5. Split into segments and send each one; if a formatted segment is
    ///    rejected by the messaging platform, retry it as plain text. Any
    ///    further failure is logged and the next segment is still
    ///    attempted — finalize never fails the caller's turn.
    ///
    /// Returns the platform message ids of the segments that were
    /// successfully sent, in order.
    pub async fn finalize(&mut self) -> Result<Vec<String>> {
        if self.cancelled || self.buffer.is_empty() {
            return Ok(vec![]);
        }

        let _ = self.messaging.send_draft(&self.dest, "…").await;

        let summary_prefix = if self.tool_titles.is_empty() {
            String::new()
        } else {
            format!("🔧 {}\n", self.tool_titles.join(" → "))
        };

        let spans = render_markup(&self.buffer).ok();
        let mut ids = Vec::new();

        match spans {
            Some(spans) if !spans.is_empty() => {
                for chunk in split_markup(&spans) {
                    let formatted = format!("{summary_prefix}{}", render_to_string(&chunk));
                    match self.messaging.send_message(&self.dest, &formatted).await {
                        Ok(id) => ids.push(id),
                        Err(err) => {
                            warn!(%err, "stream writer: formatted send rejected, retrying as plain text");
                            let plain = format!("{summary_prefix}{}", plain_text(&chunk));
                            match self.messaging.send_message(&self.dest, &plain).await {
                                Ok(id) => ids.push(id),
                                Err(err) => warn!(%err, "stream writer: plain-text retry also failed"),
                            }
                        }
                    }
                }
            }
            _ => {
                for chunk in split_plain(&self.buffer) {
                    let text = format!("{summary_prefix}{chunk}");
                    match self.messaging.send_message(&self.dest, &text).await {
                        Ok(id) => ids.push(id),
                        Err(err) => warn!(%err, "stream writer: plain-text send failed"),
                    }
                }
            }
        }

        self.buffer.clear();
        Ok(ids)
    }

    /// Mark the writer cancelled: subsequent `write_chunk`/`show_tool_status`
    /// calls are no-ops and `finalize` sends nothing. The buffer is
    /// retained for inspection but never sent.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }
}

/// Return the last `window` characters of `text`, on a character boundary.
fn sliding_window(text: &str, window: usize) -> String {
    let char_count = text.chars().count();
    if char_count <= window {
        return text.to_owned();
    }
    text.chars().skip(char_count - window).collect()
}
