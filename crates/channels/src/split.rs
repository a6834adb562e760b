//! Splitting long text into platform-sized messages.

use crate::format::is_fence_line;

const FENCE: &str = "```";
const FENCE_CLOSE: &str = "\n```";

/// Split `text` into parts of at most `max_len` characters.
///
/// Splits happen on line boundaries. A part that ends inside a fenced block
/// is closed with a fence, and the next part reopens it with the same info
/// string, so every part renders on its own. An opener too long to repeat
/// is reopened as a bare fence. A single line longer than the budget is
/// clipped with `...`. Blank parts are dropped.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;
    // Line that reopens the fenced block we are inside, if any.
    let mut open_fence: Option<String> = None;
    // The current part holds nothing but a fence opener.
    let mut only_opener = false;

    for raw in text.split('\n') {
        let fence = is_fence_line(raw);
        let line = match (&open_fence, fence) {
            (Some(_), true) => FENCE.to_string(),
            (Some(reopen), false) => clip(
                raw,
                max_len.saturating_sub(reopen.chars().count() + 1 + FENCE_CLOSE.len()),
            ),
            (None, true) => clip(raw, max_len.saturating_sub(FENCE_CLOSE.len())),
            (None, false) => clip(raw, max_len),
        };
        let line_len = line.chars().count();

        let fence_after = match (&open_fence, fence) {
            (Some(_), true) => None,
            (None, true) => Some(reopener(line.trim(), max_len)),
            (inside, false) => inside.clone(),
        };
        let reserve = if fence_after.is_some() { FENCE_CLOSE.len() } else { 0 };
        let needed = if current.is_empty() {
            line_len
        } else {
            current_len + 1 + line_len
        };

        if !current.is_empty() && needed + reserve > max_len {
            match &open_fence {
                // Nothing but the opener so far: restart the block with the
                // shorter reopener instead of sending an empty block.
                Some(reopen) if only_opener => {
                    current = reopen.clone();
                    current_len = reopen.chars().count();
                }
                Some(reopen) => {
                    current.push_str(FENCE_CLOSE);
                    push_part(&mut parts, std::mem::take(&mut current));
                    current.push_str(reopen);
                    current_len = reopen.chars().count();
                }
                None => {
                    push_part(&mut parts, std::mem::take(&mut current));
                    current_len = 0;
                }
            }
        }

        let starts_part = current.is_empty();
        if !starts_part {
            current.push('\n');
            current_len += 1;
        }
        current.push_str(&line);
        current_len += line_len;
        only_opener = starts_part && open_fence.is_none() && fence_after.is_some();
        open_fence = fence_after;
    }

    push_part(&mut parts, current);
    parts
}

/// The line that reopens a block in a continuation part: the opener itself
/// when it takes at most half the budget, a bare fence otherwise.
fn reopener(opener: &str, max_len: usize) -> String {
    if opener.chars().count() + 1 + FENCE_CLOSE.len() <= max_len / 2 {
        opener.to_string()
    } else {
        FENCE.to_string()
    }
}

fn push_part(parts: &mut Vec<String>, part: String) {
    if !part.trim().is_empty() {
        parts.push(part);
    }
}

fn clip(line: &str, limit: usize) -> String {
    if line.chars().count() <= limit {
        return line.to_string();
    }
    let mut clipped: String = line.chars().take(limit.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_part() {
        assert_eq!(split_message("Hello\nworld", 4096), vec!["Hello\nworld"]);
    }

    #[test]
    fn empty_text_has_no_parts() {
        assert!(split_message("", 4096).is_empty());
        assert!(split_message("\n\n", 4096).is_empty());
    }

    #[test]
    fn splits_on_line_boundaries() {
        let text = "aaaa\nbbbb\ncccc";
        assert_eq!(split_message(text, 9), vec!["aaaa\nbbbb", "cccc"]);
    }

    #[test]
    fn parts_respect_the_limit() {
        let text = (0..200).map(|i| format!("line number {i}")).collect::<Vec<_>>().join("\n");
        let parts = split_message(&text, 100);
        assert!(parts.len() > 1);
        assert!(parts.iter().all(|p| p.chars().count() <= 100));
        assert_eq!(parts.join("\n"), text);
    }

    #[test]
    fn long_line_is_clipped() {
        let line = "x".repeat(50);
        let parts = split_message(&line, 20);
        assert_eq!(parts, vec![format!("{}...", "x".repeat(17))]);
    }

    #[test]
    fn fences_are_rebalanced_across_parts() {
        let text = "Here:\n```python\nprint(1)\nprint(2)\nprint(3)\n```\nDone.";
        let parts = split_message(text, 30);
        assert!(parts.len() > 1);
        for part in &parts {
            assert_eq!(part.matches("```").count() % 2, 0, "unbalanced part: {part:?}");
            assert!(part.chars().count() <= 30, "oversized part: {part:?}");
        }
        assert!(parts[1].starts_with("```python"));
        assert!(parts.last().is_some_and(|p| p.ends_with("Done.")));
    }

    #[test]
    fn long_fence_opener_is_reopened_bare() {
        let opener = format!("```{}", "x".repeat(24));
        let text = format!("Here:\n{opener}\nprint(1)\nprint(2)\n```");
        let parts = split_message(&text, 30);

        for part in &parts {
            assert!(part.chars().count() <= 30, "oversized part: {part:?}");
            assert_eq!(part.matches("```").count() % 2, 0, "unbalanced part: {part:?}");
        }
        let joined = parts.join("\n");
        assert!(joined.contains("print(1)"));
        assert!(joined.contains("print(2)"));
        assert!(parts.last().is_some_and(|p| p.ends_with("```")));
    }

    #[test]
    fn long_fenced_block_keeps_short_opener() {
        let body = (0..10).map(|i| format!("x = {i}")).collect::<Vec<_>>().join("\n");
        let text = format!("```py\n{body}\n```");
        let parts = split_message(&text, 24);

        assert!(parts.len() > 1);
        for part in &parts {
            assert!(part.chars().count() <= 24, "oversized part: {part:?}");
            assert!(part.starts_with("```py"), "missing opener: {part:?}");
            assert!(part.ends_with("```"), "unclosed part: {part:?}");
        }
    }
}
