//! Reduce an HTML page to its visible text.
//!
//! Non-content elements (scripts, styles, media, forms, struck-through text)
//! are dropped entirely, anchors become `[text](href)` and block-level tags
//! become line breaks. Runs of whitespace are collapsed to at most two
//! characters and the result is clipped to a character budget.

use regex_lite::Regex;
use std::sync::LazyLock;

/// Elements whose whole subtree is discarded.
const SKIPPED: &[&str] = &[
    "script", "style", "noscript", "head", "meta", "button", "img", "canvas", "svg", "data",
    "details", "embed", "footer", "form", "input", "select", "textarea", "video", "source",
    "audio", "iframe", "object", "s", "del", "template",
];

/// Elements that never have a closing tag.
const VOID: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const BLOCK: &[&str] = &[
    "p", "div", "br", "li", "ul", "ol", "tr", "table", "section", "article", "header", "main",
    "nav", "aside", "blockquote", "pre", "h1", "h2", "h3", "h4", "h5", "h6", "hr", "title",
];

static WHITESPACE_RUN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(\s)(\s)\s*").ok());

struct Anchor {
    href: String,
    text: String,
}

/// Extract the visible text of `html`, clipped to `max_chars` characters.
pub fn extract_text(html: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut skipping: Option<(String, usize)> = None;
    let mut anchor: Option<Anchor> = None;

    let mut rest = html;
    while !rest.is_empty() {
        let Some(lt) = rest.find('<') else {
            if skipping.is_none() {
                push_text(&mut out, &mut anchor, rest);
            }
            break;
        };

        if lt > 0 && skipping.is_none() {
            push_text(&mut out, &mut anchor, &rest[..lt]);
        }
        rest = &rest[lt..];

        if let Some(comment) = rest.strip_prefix("<!--") {
            rest = match comment.find("-->") {
                Some(end) => &comment[end + 3..],
                None => "",
            };
            continue;
        }

        let Some(gt) = rest.find('>') else {
            // Unterminated tag: treat the remainder as text.
            if skipping.is_none() {
                push_text(&mut out, &mut anchor, rest);
            }
            break;
        };
        let tag = &rest[1..gt];
        rest = &rest[gt + 1..];

        let closing = tag.starts_with('/');
        let name = tag_name(tag);
        if name.is_empty() {
            continue;
        }
        let self_closing = tag.ends_with('/') || VOID.contains(&name.as_str());

        if let Some((skip_name, depth)) = skipping.as_mut() {
            if *skip_name == name {
                if closing {
                    *depth -= 1;
                    if *depth == 0 {
                        skipping = None;
                    }
                } else if !self_closing {
                    *depth += 1;
                }
            }
            continue;
        }

        if SKIPPED.contains(&name.as_str()) {
            if !closing && !self_closing {
                skipping = Some((name, 1));
            }
            continue;
        }

        if name == "a" {
            if closing {
                if let Some(a) = anchor.take() {
                    push_anchor(&mut out, a);
                }
            } else {
                if let Some(a) = anchor.take() {
                    push_anchor(&mut out, a);
                }
                anchor = Some(Anchor {
                    href: attribute(tag, "href").unwrap_or_default(),
                    text: String::new(),
                });
            }
            continue;
        }

        if BLOCK.contains(&name.as_str()) && !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
    }

    if let Some(a) = anchor.take() {
        push_anchor(&mut out, a);
    }

    let text = out.trim();
    match WHITESPACE_RUN.as_ref() {
        Some(re) => clip(&re.replace_all(text, "$1$2"), max_chars),
        None => clip(text, max_chars),
    }
}

/// Clip to `max_chars` characters, marking the cut with `...`.
pub fn clip(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let keep = max_chars.saturating_sub(3);
    let mut clipped: String = text.chars().take(keep).collect();
    clipped.push_str("...");
    clipped
}

fn push_text(out: &mut String, anchor: &mut Option<Anchor>, raw: &str) {
    let text = decode_entities(raw);
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    let target = match anchor {
        Some(a) => &mut a.text,
        None => out,
    };
    if !target.is_empty() && !target.ends_with(char::is_whitespace) {
        target.push(' ');
    }
    target.push_str(text);
}

fn push_anchor(out: &mut String, anchor: Anchor) {
    let rendered = match (anchor.text.is_empty(), anchor.href.is_empty()) {
        (true, _) => return,
        (false, true) => anchor.text,
        (false, false) => format!("[{}]({})", anchor.text, anchor.href),
    };
    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push(' ');
    }
    out.push_str(&rendered);
}

fn tag_name(tag: &str) -> String {
    tag.trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Value of attribute `name` inside a tag body, quoted or bare.
fn attribute(tag: &str, name: &str) -> Option<String> {
    let lower = tag.to_ascii_lowercase();
    let needle = format!("{name}=");
    let mut from = 0;
    while let Some(pos) = lower[from..].find(&needle) {
        let start = from + pos;
        let preceded_by_space = start > 0 && lower.as_bytes()[start - 1].is_ascii_whitespace();
        let value = &tag[start + needle.len()..];
        from = start + needle.len();
        if !preceded_by_space {
            continue;
        }
        let value = match value.chars().next() {
            Some(q @ ('"' | '\'')) => value[1..].split(q).next().unwrap_or_default(),
            _ => value
                .split(|c: char| c.is_whitespace() || c == '>')
                .next()
                .unwrap_or_default(),
        };
        return Some(decode_entities(value).into_owned());
    }
    None
}

fn decode_entities(text: &str) -> std::borrow::Cow<'_, str> {
    if !text.contains('&') {
        return std::borrow::Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];
        let decoded = rest
            .find(';')
            .filter(|&semi| semi <= 10)
            .and_then(|semi| decode_entity(&rest[1..semi]).map(|c| (c, semi)));
        match decoded {
            Some((c, semi)) => {
                out.push(c);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    std::borrow::Cow::Owned(out)
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_styles() {
        let html = "<html><head><title>T</title><style>p{}</style></head>\
                    <body><script>var x = 1;</script><p>Hello world</p></body></html>";
        assert_eq!(extract_text(html, 1000), "Hello world");
    }

    #[test]
    fn anchors_become_markdown_links() {
        let html = r#"<p>See <a href="https://example.com/a">the docs</a> now.</p>"#;
        assert_eq!(
            extract_text(html, 1000),
            "See [the docs](https://example.com/a) now."
        );
    }

    #[test]
    fn anchor_without_href_keeps_text() {
        assert_eq!(extract_text("<a name=x>plain</a>", 100), "plain");
    }

    #[test]
    fn anchor_without_text_is_dropped() {
        assert_eq!(
            extract_text(r#"<p>a</p><a href="/x"><img src="y.png"></a><p>b</p>"#, 100),
            "a\nb"
        );
    }

    #[test]
    fn media_and_forms_are_dropped() {
        let html = "<p>keep</p><video><source src=a.mp4>fallback</video>\
                    <form><input name=q><button>Go</button></form><p>also</p>";
        assert_eq!(extract_text(html, 1000), "keep\nalso");
    }

    #[test]
    fn nested_skipped_elements() {
        let html = "<div>a<details><details>x</details>y</details>b</div>";
        assert_eq!(extract_text(html, 100), "a b");
    }

    #[test]
    fn struck_text_is_dropped_but_span_is_not() {
        assert_eq!(
            extract_text("<p>price <s>10</s> <span>8</span></p>", 100),
            "price 8"
        );
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(extract_text("a<!-- <p>hidden</p> -->b", 100), "a b");
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(
            extract_text("<p>Fish &amp; chips &lt;3 &#169; &#x263A;</p>", 100),
            "Fish & chips <3 © ☺"
        );
        assert_eq!(extract_text("AT&T", 100), "AT&T");
    }

    #[test]
    fn whitespace_runs_collapse_to_two() {
        let html = "<p>a</p>\n\n\n<p>b</p>      c";
        let text = extract_text(html, 100);
        assert!(!text.contains("   "));
        assert!(!text.contains("\n\n\n"));
    }

    #[test]
    fn clipped_to_budget() {
        let html = format!("<p>{}</p>", "word ".repeat(100));
        let text = extract_text(&html, 20);
        assert_eq!(text.chars().count(), 20);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip("héllo wörld", 8), "héllo...");
        assert_eq!(clip("short", 8), "short");
    }

    #[test]
    fn single_quoted_and_bare_hrefs() {
        assert_eq!(
            extract_text("<a href='/one'>1</a> <a HREF=/two>2</a>", 100),
            "[1](/one) [2](/two)"
        );
    }

    #[test]
    fn data_href_is_not_href() {
        assert_eq!(
            extract_text(r#"<a data-href="/no" href="/yes">x</a>"#, 100),
            "[x](/yes)"
        );
    }
}
