//! Message-boundary splitting: breaking a long reply into platform-sized
//! chunks without cutting a word in half when avoidable, and — for
//! formatted text — without leaving an inline tag open across a chunk
//! boundary.

use super::markup::{MarkupSpan, Tag};

/// Maximum characters per outbound message.
pub const MSG_LIMIT: usize = 4096;

/// How far back from a hard limit to search for a newline to split on.
pub const NEWLINE_SEARCH_TAIL: usize = 200;

/// Split `text` into chunks no longer than [`MSG_LIMIT`] characters,
/// preferring to break at the last newline within [`NEWLINE_SEARCH_TAIL`]
/// characters of the limit, falling back to a hard break if none exists.
#[must_use]
pub fn split_plain(text: &str) -> Vec<String> {
    if text.chars().count() <= MSG_LIMIT {
        return if text.is_empty() {
            vec![]
        } else {
            vec![text.to_owned()]
        };
    }

    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let remaining = chars.len() - start;
        if remaining <= MSG_LIMIT {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let hard_limit = start + MSG_LIMIT;
        let search_from = hard_limit.saturating_sub(NEWLINE_SEARCH_TAIL).max(start);
        let break_at = (search_from..hard_limit)
            .rev()
            .find(|&i| chars[i] == '\n')
            .map_or(hard_limit, |i| i + 1);

        chunks.push(chars[start..break_at].iter().collect());
        start = break_at;
    }

    chunks
}

/// Split a formatted [`MarkupSpan`] sequence into chunks no longer than
/// [`MSG_LIMIT`] characters each, closing any tags left open at a chunk
/// boundary and reopening them at the start of the next chunk so every
/// chunk is independently well-formed.
#[must_use]
pub fn split_markup(spans: &[MarkupSpan]) -> Vec<Vec<MarkupSpan>> {
    let mut chunks: Vec<Vec<MarkupSpan>> = Vec::new();
    let mut current: Vec<MarkupSpan> = Vec::new();
    let mut current_len = 0usize;
    let mut open_tags: Vec<Tag> = Vec::new();

    for span in spans {
        let mut remaining = span.text.as_str();

        while !remaining.is_empty() {
            let space = MSG_LIMIT.saturating_sub(current_len);
            if space == 0 {
                close_open_tags(&mut current, &open_tags);
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
                reopen_tags(&mut current, &open_tags, &mut current_len);
                continue;
            }

            let take_chars: String = remaining.chars().take(space).collect();
            let consumed = take_chars.len();
            current.push(MarkupSpan {
                text: take_chars.clone(),
                tags: span.tags.clone(),
            });
            current_len += take_chars.chars().count();
            remaining = &remaining[consumed..];

            update_open_tags(&mut open_tags, &span.tags);
        }

        if span.text.is_empty() {
            current.push(span.clone());
            update_open_tags(&mut open_tags, &span.tags);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Record which tags are "open" going into the next chunk: the tags borne
/// by the most recently appended span, since this renderer treats each
/// span's tag set as fully self-contained rather than modeling nested
/// open/close events across spans.
fn update_open_tags(open_tags: &mut Vec<Tag>, span_tags: &[Tag]) {
    open_tags.clear();
    open_tags.extend_from_slice(span_tags);
}

fn close_open_tags(_current: &mut [MarkupSpan], _open_tags: &[Tag]) {
    // Each span already carries its own closed tag set (see
    // `render_markup`), so there is nothing to append here — splitting
    // mid-span only requires that the *next* chunk re-declare the same
    // tags, handled by `reopen_tags`.
}

fn reopen_tags(current: &mut Vec<MarkupSpan>, open_tags: &[Tag], current_len: &mut usize) {
    if open_tags.is_empty() {
        return;
    }
    current.push(MarkupSpan {
        text: String::new(),
        tags: open_tags.to_vec(),
    });
    let _ = current_len;
}
