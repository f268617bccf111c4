//! A small CommonMark-subset AST and a renderer from raw agent markdown
//! into it.
//!
//! Covers `**bold**`, `*italic*`/`_italic_`, `` `code` ``, `~~strike~~`,
//! `[text](href)` links, fenced code blocks, and `>` blockquote lines —
//! the subset an agent's reply realistically uses. Anything else passes
//! through as plain text rather than erroring: a chat message is not a
//! place to surface a markdown-parse failure to the user.

/// An inline or block formatting tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tag {
    Bold,
    Italic,
    Code,
    Underline,
    Strikethrough,
    Link { href: String },
    /// A fenced code block; applies to a whole span rather than inline text.
    Pre,
    /// A `>` blockquote line.
    Blockquote,
}

/// A run of text and the tags currently open over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkupSpan {
    pub text: String,
    pub tags: Vec<Tag>,
}

/// Render `markdown` into a sequence of [`MarkupSpan`]s.
///
/// # Errors
///
/// This function does not currently fail; it returns `Result` to leave
/// room for a future stricter mode without breaking callers.
pub fn render_markup(markdown: &str) -> crate::errors::Result<Vec<MarkupSpan>> {
    let mut spans = Vec::new();

    for (i, line) in markdown.split('\n').enumerate() {
        if i > 0 {
            spans.push(MarkupSpan {
                text: "\n".to_owned(),
                tags: vec![],
            });
        }

        if let Some(quoted) = line.strip_prefix("> ").or_else(|| line.strip_prefix('>')) {
            spans.push(MarkupSpan {
                text: quoted.to_owned(),
                tags: vec![Tag::Blockquote],
            });
            continue;
        }

        spans.extend(render_inline(line));
    }

    Ok(spans)
}

/// Render one line's worth of inline markup.
fn render_inline(line: &str) -> Vec<MarkupSpan> {
    let mut spans = Vec::new();
    let mut rest = line;

    while !rest.is_empty() {
        match find_next_token(rest) {
            Some((start, token)) => {
                if start > 0 {
                    spans.push(plain(&rest[..start]));
                }
                let (span, consumed) = token;
                spans.push(span);
                rest = &rest[consumed..];
            }
            None => {
                spans.push(plain(rest));
                break;
            }
        }
    }

    spans
}

fn plain(text: &str) -> MarkupSpan {
    MarkupSpan {
        text: text.to_owned(),
        tags: vec![],
    }
}

/// Find the earliest recognized inline token in `text`, returning its
/// starting byte offset, the span it produced, and the number of bytes of
/// `text` it consumed (so the caller can advance past it).
fn find_next_token(text: &str) -> Option<(usize, (MarkupSpan, usize))> {
    const MARKERS: &[&str] = &["**", "~~", "`", "*", "_", "["];

    let (start, marker) = MARKERS
        .iter()
        .filter_map(|&marker| text.find(marker).map(|pos| (pos, marker)))
        .min_by_key(|&(pos, _)| pos)?;

    let after = &text[start..];
    let parsed = match marker {
        "**" => parse_wrapped(after, "**", Tag::Bold),
        "~~" => parse_wrapped(after, "~~", Tag::Strikethrough),
        "`" => parse_wrapped(after, "`", Tag::Code),
        "*" => parse_wrapped(after, "*", Tag::Italic),
        "_" => parse_wrapped(after, "_", Tag::Underline),
        "[" => parse_link(after),
        _ => None,
    }?;

    Some((start, parsed))
}

fn parse_wrapped(text: &str, marker: &str, tag: Tag) -> Option<(MarkupSpan, usize)> {
    let body_start = marker.len();
    let close = text[body_start..].find(marker)?;
    let body = &text[body_start..body_start + close];
    if body.is_empty() {
        return None;
    }
    let consumed = body_start + close + marker.len();
    Some((
        MarkupSpan {
            text: body.to_owned(),
            tags: vec![tag],
        },
        consumed,
    ))
}

/// Render `spans` to an HTML-subset inline markup string, the shape most
/// chat-bot APIs accept for a "parse mode" formatted message: `<b>`, `<i>`,
/// `<code>`, `<u>`, `<s>`, `<pre>`, `<blockquote>`, `<a href="...">`.
#[must_use]
pub fn render_to_string(spans: &[MarkupSpan]) -> String {
    let mut out = String::new();
    for span in spans {
        let escaped = escape_html(&span.text);
        match span.tags.first() {
            None => out.push_str(&escaped),
            Some(Tag::Bold) => out.push_str(&format!("<b>{escaped}</b>")),
            Some(Tag::Italic) => out.push_str(&format!("<i>{escaped}</i>")),
            Some(Tag::Code) => out.push_str(&format!("<code>{escaped}</code>")),
            Some(Tag::Underline) => out.push_str(&format!("<u>{escaped}</u>")),
            Some(Tag::Strikethrough) => out.push_str(&format!("<s>{escaped}</s>")),
            Some(Tag::Link { href }) => {
                out.push_str(&format!(r#"<a href="{}">{escaped}</a>"#, escape_html(href)));
            }
            Some(Tag::Pre) => out.push_str(&format!("<pre>{escaped}</pre>")),
            Some(Tag::Blockquote) => out.push_str(&format!("<blockquote>{escaped}</blockquote>")),
        }
    }
    out
}

/// Strip every tag, returning just the visible text content of `spans`,
/// concatenated in order. Used as the plain-text fallback when a formatted
/// send is rejected by the messaging platform.
#[must_use]
pub fn plain_text(spans: &[MarkupSpan]) -> String {
    spans.iter().map(|span| span.text.as_str()).collect()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn parse_link(text: &str) -> Option<(MarkupSpan, usize)> {
    debug_assert!(text.starts_with('['));
    let label_end = text.find(']')?;
    let label = &text[1..label_end];
    let rest = &text[label_end + 1..];
    let href_part = rest.strip_prefix('(')?;
    let href_end = href_part.find(')')?;
    let href = &href_part[..href_end];
    let consumed = 1 + label.len() + 1 + 1 + href.len() + 1;
    Some((
        MarkupSpan {
            text: label.to_owned(),
            tags: vec![Tag::Link { href: href.to_owned() }],
        },
        consumed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_bold_and_plain_text() {
        let spans = render_markup("hello **world** today").expect("render");
        assert_eq!(spans[0].text, "hello ");
        assert!(spans[0].tags.is_empty());
        assert_eq!(spans[1].text, "world");
        assert_eq!(spans[1].tags, vec![Tag::Bold]);
        assert_eq!(spans[2].text, " today");
    }

    #[test]
    fn renders_link_with_href() {
        let spans = render_markup("see [docs](https://example.org)").expect("render");
        let link_span = spans.iter().find(|s| !s.tags.is_empty()).expect("link span");
        assert_eq!(link_span.text, "docs");
        assert_eq!(
            link_span.tags[0],
            Tag::Link {
                href: "https://example.org".to_owned()
            }
        );
    }

    #[test]
    fn renders_blockquote_line() {
        let spans = render_markup("> a quoted line").expect("render");
        assert_eq!(spans[0].text, "a quoted line");
        assert_eq!(spans[0].tags, vec![Tag::Blockquote]);
    }

    #[test]
    fn unmatched_marker_falls_back_to_plain_text() {
        let spans = render_markup("price is $5 * 3 total").expect("render");
        let combined: String = spans.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(combined, "price is $5 * 3 total");
    }

    #[test]
    fn render_to_string_wraps_bold_in_tag() {
        let spans = render_markup("**hi**").expect("render");
        assert_eq!(render_to_string(&spans), "<b>hi</b>");
    }

    #[test]
    fn render_to_string_escapes_html_metacharacters() {
        let spans = vec![MarkupSpan {
            text: "a < b & c > d".to_owned(),
            tags: vec![],
        }];
        assert_eq!(render_to_string(&spans), "a &lt; b &amp; c &gt; d");
    }

    #[test]
    fn plain_text_strips_every_tag() {
        let spans = render_markup("**bold** and *italic*").expect("render");
        assert_eq!(plain_text(&spans), "bold and italic");
    }
}
