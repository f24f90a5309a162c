//! Markup balance checking and best-effort repair.
//!
//! Telegram rejects a whole message when its entity markup does not parse, so
//! chunks are vetted before delivery. The checker answers "would a strict
//! parser accept this?", the sanitizer tries to repair what the checker
//! flagged. Both operate on text whose code spans were already swapped for
//! placeholders; code content is never inspected.

use crate::chatbot::spans;

/// Decide whether emphasis markers, brackets and link parentheses are balanced.
///
/// Total function: any input yields a verdict, nothing panics.
pub fn is_balanced(text: &str) -> bool {
    asterisks_balanced(text)
        && underscores_balanced(text)
        && brackets_balanced(text)
        && parens_balanced(text)
}

/// Bold (`**`) and italic (lone `*`) counts must both be even.
fn asterisks_balanced(text: &str) -> bool {
    let (bold, italic) = count_asterisks(text);
    bold % 2 == 0 && italic % 2 == 0
}

/// Count asterisk runs as (bold pairs, lone markers).
fn count_asterisks(text: &str) -> (usize, usize) {
    let mut bold = 0;
    let mut italic = 0;
    let mut run = 0;
    for c in text.chars().chain(std::iter::once('\0')) {
        if c == '*' {
            run += 1;
        } else {
            bold += run / 2;
            italic += run % 2;
            run = 0;
        }
    }
    (bold, italic)
}

fn underscores_balanced(text: &str) -> bool {
    delimiter_underscores(text) % 2 == 0
}

/// Count underscores that could open or close emphasis: those not buried
/// inside a word. `snake_case` stays untouched, `_word_` counts twice.
fn delimiter_underscores(text: &str) -> usize {
    let chars: Vec<char> = text.chars().collect();
    let mut count = 0;
    for (i, &c) in chars.iter().enumerate() {
        if c != '_' {
            continue;
        }
        let prev_word = i > 0 && chars[i - 1].is_alphanumeric();
        let next_word = i + 1 < chars.len() && chars[i + 1].is_alphanumeric();
        if !(prev_word && next_word) {
            count += 1;
        }
    }
    count
}

fn brackets_balanced(text: &str) -> bool {
    text.matches('[').count() == text.matches(']').count()
}

/// Parentheses must balance outside of `[label](url)` constructs.
fn parens_balanced(text: &str) -> bool {
    let outside = strip_links(text);
    outside.matches('(').count() == outside.matches(')').count()
}

/// Remove complete `[label](url)` constructs, keeping everything else.
fn strip_links(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('[') {
        let Some(close_rel) = rest[start..].find(']') else {
            break;
        };
        let close = start + close_rel;
        let after = &rest[close + 1..];
        if let Some(url_rest) = after.strip_prefix('(') {
            if let Some(end) = url_rest.find(')') {
                out.push_str(&rest[..start]);
                rest = &url_rest[end + 1..];
                continue;
            }
        }
        out.push_str(&rest[..=close]);
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Best-effort repair of unbalanced markup.
///
/// Collapses asterisk pile-ups into bold, drops odd trailing markers per
/// line, and removes unmatched brackets. Makes no promise that the result
/// passes [`is_balanced`]; callers re-validate.
pub fn sanitize(text: &str) -> String {
    let lines: Vec<String> = text.split('\n').map(repair_line).collect();
    repair_brackets(&lines.join("\n"))
}

/// Repair on restored text: code spans are re-extracted first so their
/// content is never touched, then substituted back.
pub fn sanitize_outside_code(text: &str) -> String {
    let (placeholder, table) = spans::extract(text);
    table.restore(&sanitize(&placeholder))
}

fn repair_line(line: &str) -> String {
    let mut s = collapse_asterisk_runs(line);

    // asymmetric pair like `**text*`: promote the lone marker to bold
    let (bold, italic) = count_asterisks(&s);
    if bold % 2 == 1 && italic % 2 == 1 {
        if let Some(&pos) = lone_asterisk_positions(&s).last() {
            s.insert(pos, '*');
        }
    }

    // odd number of bold pairs: the last `**` is a dangling opener
    let (bold, _) = count_asterisks(&s);
    if bold % 2 == 1 {
        if let Some(pos) = s.rfind("**") {
            s.replace_range(pos..pos + 2, "");
        }
    }

    let (_, italic) = count_asterisks(&s);
    if italic % 2 == 1 {
        remove_lone_asterisk(&mut s);
    }

    if delimiter_underscores(&s) % 2 == 1 {
        remove_edge_underscore(&mut s);
    }

    s
}

/// Runs of three or more asterisks become plain bold markers.
fn collapse_asterisk_runs(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut run = 0;
    for c in line.chars() {
        if c == '*' {
            run += 1;
        } else {
            if run > 0 {
                out.push_str(if run >= 3 { "**" } else { &"**"[..run] });
                run = 0;
            }
            out.push(c);
        }
    }
    if run > 0 {
        out.push_str(if run >= 3 { "**" } else { &"**"[..run] });
    }
    out
}

/// Positions of asterisks that are not part of a `**` pair.
fn lone_asterisk_positions(s: &str) -> Vec<usize> {
    let bytes = s.as_bytes();
    let mut positions = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'*' {
            let mut run = 1;
            while i + run < bytes.len() && bytes[i + run] == b'*' {
                run += 1;
            }
            if run % 2 == 1 {
                positions.push(i + run - 1);
            }
            i += run;
        } else {
            i += 1;
        }
    }
    positions
}

/// Strip one unmatched italic marker, preferring the line edges.
fn remove_lone_asterisk(s: &mut String) {
    let positions = lone_asterisk_positions(s);
    let Some(&last) = positions.last() else {
        return;
    };
    let pick = if s.trim_end().ends_with('*') {
        last
    } else if let Some(&first) = positions.first() {
        if s.trim_start().starts_with('*') {
            first
        } else {
            last
        }
    } else {
        last
    };
    s.remove(pick);
}

/// Strip one unmatched emphasis underscore, preferring the line edges.
fn remove_edge_underscore(s: &mut String) {
    let chars: Vec<char> = s.chars().collect();
    let mut candidates = Vec::new();
    let mut offset = 0;
    for (i, &c) in chars.iter().enumerate() {
        if c == '_' {
            let prev_word = i > 0 && chars[i - 1].is_alphanumeric();
            let next_word = i + 1 < chars.len() && chars[i + 1].is_alphanumeric();
            if !(prev_word && next_word) {
                candidates.push(offset);
            }
        }
        offset += c.len_utf8();
    }
    let Some(&last) = candidates.last() else {
        return;
    };
    let pick = if s.trim_end().ends_with('_') {
        last
    } else if s.trim_start().starts_with('_') {
        candidates[0]
    } else {
        last
    };
    s.remove(pick);
}

/// Drop unmatched `]` and never-closed `[` via a single stack scan.
fn repair_brackets(text: &str) -> String {
    let mut open_stack = Vec::new();
    let mut drop = Vec::new();
    for (i, c) in text.char_indices() {
        match c {
            '[' => open_stack.push(i),
            ']' => {
                if open_stack.pop().is_none() {
                    drop.push(i);
                }
            }
            _ => {}
        }
    }
    drop.extend(open_stack);
    if drop.is_empty() {
        return text.to_owned();
    }
    drop.sort_unstable();
    let mut out = String::with_capacity(text.len());
    let mut skip = drop.into_iter().peekable();
    for (i, c) in text.char_indices() {
        if skip.peek() == Some(&i) {
            skip.next();
            continue;
        }
        out.push(c);
    }
    out
}
