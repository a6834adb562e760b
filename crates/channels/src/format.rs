//! Telegram-flavored Markdown repair.
//!
//! Model output is free text: a fence may be left open, a stray backtick or
//! underscore may make the Bot API reject the whole message. The balancer
//! closes what is open and escapes emphasis markers outside code.

const FENCE: &str = "```";

/// Make `text` safe to send with the legacy Markdown parse mode.
///
/// - an unterminated code fence is closed
/// - an odd inline backtick outside fences is closed at the end of its segment
/// - `*` and `_` outside code are escaped
pub fn ensure_formatting(text: &str) -> String {
    let mut text = text.to_string();
    if text.matches(FENCE).count() % 2 == 1 {
        if !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(FENCE);
    }

    let segments: Vec<String> = text
        .split(FENCE)
        .enumerate()
        .map(|(i, seg)| if i % 2 == 0 { repair_prose(seg) } else { seg.to_string() })
        .collect();
    segments.join(FENCE)
}

/// Escape emphasis outside inline code spans and close a dangling span.
fn repair_prose(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len() + 8);
    let mut in_code = false;
    for c in segment.chars() {
        match c {
            '`' => {
                in_code = !in_code;
                out.push(c);
            }
            '*' | '_' if !in_code => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    if in_code {
        out.push('`');
    }
    out
}

/// Whether a line opens or closes a fenced block.
pub(crate) fn is_fence_line(line: &str) -> bool {
    line.trim_start().starts_with(FENCE)
}
