//! Plain-text degradation.
//!
//! Converts any reply into text with no active markup syntax, using fixed
//! glyph substitutions. This is the last rung of the delivery ladder: it
//! accepts anything, including markup the sanitizer could not repair, and
//! never fails.

/// Marker line substituted for a code fence.
pub const CODE_MARK: &str = "⟦CODE⟧";

/// Convert markup to glyph-annotated plain text. Total: never fails, for any
/// input including empty strings and pure marker soup.
pub fn degrade(text: &str) -> String {
    let mut out = Vec::new();
    let mut in_code = false;
    for line in text.split('\n') {
        if line.trim_start().starts_with("```") {
            in_code = !in_code;
            out.push(CODE_MARK.to_owned());
            continue;
        }
        if in_code {
            // code content passes through verbatim
            out.push(line.to_owned());
            continue;
        }
        out.push(degrade_line(line));
    }
    collapse_blank_runs(&out.join("\n"))
}

fn degrade_line(line: &str) -> String {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];
    let (prefix, rest) = block_prefix(trimmed);
    format!("{indent}{prefix}{}", degrade_inline(rest))
}

/// Map a block-level marker to its glyph prefix.
fn block_prefix(line: &str) -> (&'static str, &str) {
    if let Some(rest) = strip_header(line) {
        return ("➤ ", rest);
    }
    if let Some(rest) = line.strip_prefix("> ") {
        return ("💬 ", rest);
    }
    if line == ">" {
        return ("💬 ", "");
    }
    if let Some(rest) = line.strip_prefix("- ") {
        return ("• ", rest);
    }
    if !line.starts_with("**") {
        if let Some(rest) = line.strip_prefix("* ") {
            return ("• ", rest);
        }
    }
    if let Some(rest) = strip_numbered(line) {
        return ("∘ ", rest);
    }
    ("", line)
}

/// `#`-`######` followed by a space; `#hashtag` is not a header.
fn strip_header(line: &str) -> Option<&str> {
    let after = line.trim_start_matches('#');
    let hashes = line.len() - after.len();
    if (1..=6).contains(&hashes) && (after.is_empty() || after.starts_with(' ')) {
        Some(after.trim_start())
    } else {
        None
    }
}

/// `12. item` or `12) item` list markers.
fn strip_numbered(line: &str) -> Option<&str> {
    let digits_end = line.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let rest = &line[digits_end..];
    rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") "))
}

/// Inline pass. Inline code is carved out first so its content skips the
/// emphasis and link passes; stray backticks are dropped.
fn degrade_inline(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('`') {
        out.push_str(&degrade_emphasis(&rest[..start]));
        let after = &rest[start + 1..];
        match after.find('`') {
            Some(end) => {
                out.push('‹');
                out.push_str(&after[..end]);
                out.push('›');
                rest = &after[end + 1..];
            }
            None => rest = after,
        }
    }
    out.push_str(&degrade_emphasis(rest));
    out
}

fn degrade_emphasis(text: &str) -> String {
    drop_italics(&pair_bold(&replace_links(text)))
}

/// `[label](url)` becomes a link glyph plus the label; the URL is dropped.
fn replace_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('[') {
        let Some(close_rel) = rest[start..].find(']') else {
            break;
        };
        let close = start + close_rel;
        let label = &rest[start + 1..close];
        let after = &rest[close + 1..];
        match after.strip_prefix('(').and_then(|u| u.find(')').map(|e| &u[e + 1..])) {
            Some(remainder) if !label.is_empty() => {
                out.push_str(&rest[..start]);
                out.push_str("🔗 ");
                out.push_str(label);
                rest = remainder;
            }
            _ => {
                out.push_str(&rest[..=close]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// `**bold**` becomes `«bold»`; stray double markers are handled later by the
/// italic pass, which removes every remaining asterisk.
fn pair_bold(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("**") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("**") {
            Some(end) if end > 0 => {
                out.push('«');
                out.push_str(&after[..end]);
                out.push('»');
                rest = &after[end + 2..];
            }
            _ => {
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Remove italic markers, keeping the text: every remaining `*`, and each
/// `_` not embedded in a word.
fn drop_italics(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    for (i, &c) in chars.iter().enumerate() {
        match c {
            '*' => {}
            '_' => {
                let prev_word = i > 0 && chars[i - 1].is_alphanumeric();
                let next_word = i + 1 < chars.len() && chars[i + 1].is_alphanumeric();
                if prev_word && next_word {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Three or more consecutive line breaks collapse to exactly two.
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines <= 2 {
                out.push(c);
            }
        } else {
            newlines = 0;
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_unchanged() {
        assert_eq!(degrade("just words"), "just words");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(degrade(""), "");
    }

    #[test]
    fn test_bold_wrapped() {
        assert_eq!(degrade("some **bold** text"), "some «bold» text");
    }

    #[test]
    fn test_italic_markers_removed() {
        assert_eq!(degrade("an *italic* word"), "an italic word");
        assert_eq!(degrade("an _italic_ word"), "an italic word");
    }

    #[test]
    fn test_snake_case_survives() {
        assert_eq!(degrade("keep snake_case_name intact"), "keep snake_case_name intact");
    }

    #[test]
    fn test_inline_code_wrapped() {
        assert_eq!(degrade("run `cargo test` now"), "run ‹cargo test› now");
    }

    #[test]
    fn test_fenced_code_marked() {
        let out = degrade("before\n```\nlet x = 1;\n```\nafter");
        assert_eq!(out, format!("before\n{CODE_MARK}\nlet x = 1;\n{CODE_MARK}\nafter"));
    }

    #[test]
    fn test_link_keeps_label_drops_url() {
        let out = degrade("see [the docs](https://example.com) please");
        assert_eq!(out, "see 🔗 the docs please");
        assert!(!out.contains("example.com"));
    }

    #[test]
    fn test_header_prefixed() {
        assert_eq!(degrade("## Section"), "➤ Section");
        assert_eq!(degrade("#hashtag stays"), "#hashtag stays");
    }

    #[test]
    fn test_quote_prefixed() {
        assert_eq!(degrade("> quoted words"), "💬 quoted words");
    }

    #[test]
    fn test_list_markers_replaced() {
        assert_eq!(degrade("- first\n- second"), "• first\n• second");
        assert_eq!(degrade("1. one\n2) two"), "∘ one\n∘ two");
    }

    #[test]
    fn test_blank_runs_collapsed() {
        assert_eq!(degrade("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn test_total_on_marker_soup() {
        let soup = "***`__[)(]``**_*";
        let out = degrade(soup);
        assert!(!out.contains('*'));
        assert!(!out.contains('`'));
    }

    #[test]
    fn test_dangling_bold_marker_removed() {
        let out = degrade("*bold opener with no close");
        assert_eq!(out, "bold opener with no close");
    }

    #[test]
    fn test_code_content_untouched() {
        let out = degrade("```\n**not bold** _and_ `raw`\n```");
        assert!(out.contains("**not bold** _and_ `raw`"));
    }

    #[test]
    fn test_inline_code_content_untouched() {
        assert_eq!(degrade("run `a*b` now"), "run ‹a*b› now");
    }
}
