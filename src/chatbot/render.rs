//! Outbound message rendering.
//!
//! Splits a reply into Telegram-sized chunks while keeping code spans intact
//! and markup deliverable. Splitting prefers the largest structure available:
//! whole paragraphs, then sentences, then words, then a line-based hard cut
//! for text with no structure at all. Each tier keeps headroom under the
//! budget so the continuation annotations added at delivery still fit.
//!
//! Budgets are byte lengths; every forced cut lands on a UTF-8 character
//! boundary. Restoring a protected code span can push a chunk back over
//! budget; such chunks are re-split around the span, and a span that is
//! itself longer than the whole budget is sent as one oversized message
//! rather than broken apart. That trade-off (budget bent before code is
//! split) is deliberate.

use tracing::warn;

use crate::chatbot::markup;
use crate::chatbot::spans::{self, Segment, SpanTable};

/// How a chunk should be sent: with markup parsing or as plain text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkupMode {
    Rich,
    Plain,
}

/// Where a chunk sits in the reply sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkPosition {
    Only,
    First,
    Middle,
    Last,
}

/// One deliverable piece of a rendered reply.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub content: String,
    pub position: ChunkPosition,
    pub markup_mode: MarkupMode,
    pub carries_attachment: bool,
}

/// Render a reply into an ordered chunk sequence.
///
/// Text that fits the budget is returned verbatim as a single chunk. When
/// `attach_to_last` is set, the final chunk is flagged to carry the caller's
/// attachment.
pub fn render(text: &str, max_chunk_len: usize, attach_to_last: bool) -> Vec<Chunk> {
    let limit = max_chunk_len.max(1);
    if text.len() <= limit {
        return vec![Chunk {
            content: text.to_owned(),
            position: ChunkPosition::Only,
            markup_mode: classify(text),
            carries_attachment: attach_to_last,
        }];
    }

    let (placeholder, table) = spans::extract(text);
    let mut pieces = Vec::new();
    for piece in segment(&placeholder, limit, &table) {
        pieces.extend(enforce_budget(&piece, limit, &table));
    }

    let count = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| Chunk {
            markup_mode: classify_placeholder(&piece),
            content: table.restore(&piece),
            position: position_of(i, count),
            carries_attachment: attach_to_last && i == count - 1,
        })
        .collect()
}

fn position_of(index: usize, count: usize) -> ChunkPosition {
    match (index, count) {
        (_, 1) => ChunkPosition::Only,
        (0, _) => ChunkPosition::First,
        (i, n) if i == n - 1 => ChunkPosition::Last,
        _ => ChunkPosition::Middle,
    }
}

/// A chunk goes out rich when its markup is balanced, or when the sanitizer
/// can balance it; otherwise it is marked for plain delivery up front.
fn classify(text: &str) -> MarkupMode {
    let (placeholder, _table) = spans::extract(text);
    classify_placeholder(&placeholder)
}

fn classify_placeholder(placeholder: &str) -> MarkupMode {
    if markup::is_balanced(placeholder) || markup::is_balanced(&markup::sanitize(placeholder)) {
        MarkupMode::Rich
    } else {
        MarkupMode::Plain
    }
}

/// Largest byte index `<= index` that is a char boundary.
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn flush(out: &mut Vec<String>, running: &mut String) {
    let trimmed = running.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_owned());
    }
    running.clear();
}

/// Tiered segmentation over placeholder text.
fn segment(text: &str, limit: usize, table: &SpanTable) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_owned()];
    }

    // paragraph tier: fill to 80% of the budget, hand oversized paragraphs down
    let fill = limit * 8 / 10;
    let solo = limit * 6 / 10;
    let mut out = Vec::new();
    let mut running = String::new();
    for paragraph in paragraphs(text) {
        if paragraph.len() > solo {
            flush(&mut out, &mut running);
            split_sentences(paragraph, limit, table, &mut out);
            continue;
        }
        if !running.is_empty() && running.len() + 2 + paragraph.len() > fill {
            flush(&mut out, &mut running);
        }
        if !running.is_empty() {
            running.push_str("\n\n");
        }
        running.push_str(paragraph);
    }
    flush(&mut out, &mut running);

    // structureless input falls all the way through: line-split at the budget
    if out.len() == 1 && out[0].len() > limit {
        return split_lines(&out[0], limit, table);
    }
    out
}

fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n").map(str::trim).filter(|p| !p.is_empty())
}

/// Sentence tier: fill to 70%, hand oversized sentences to the word tier.
fn split_sentences(paragraph: &str, limit: usize, table: &SpanTable, out: &mut Vec<String>) {
    let fill = limit * 7 / 10;
    let solo = limit / 2;
    let mut running = String::new();
    for sentence in sentences(paragraph) {
        if sentence.len() > solo {
            flush(out, &mut running);
            split_words(sentence, limit, table, out);
            continue;
        }
        if !running.is_empty() && running.len() + 1 + sentence.len() > fill {
            flush(out, &mut running);
        }
        if !running.is_empty() {
            running.push(' ');
        }
        running.push_str(sentence);
    }
    flush(out, &mut running);
}

/// Split on sentence-ending punctuation followed by whitespace. Runs like
/// `?!` or `...` stay with their sentence.
fn sentences(text: &str) -> Vec<&str> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let mut j = i + 1;
            while j < bytes.len() && matches!(bytes[j], b'.' | b'!' | b'?') {
                j += 1;
            }
            if j < bytes.len() && bytes[j].is_ascii_whitespace() {
                let sentence = text[start..j].trim();
                if !sentence.is_empty() {
                    out.push(sentence);
                }
                while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                    j += 1;
                }
                start = j;
            }
            i = j;
        } else {
            i += 1;
        }
    }
    if start < text.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            out.push(tail);
        }
    }
    out
}

/// Word tier: fill to 60%, hard-cut an oversized word into fixed slices.
/// A sentence with no spaces at all has no word structure; it is passed
/// through whole for the line splitter to deal with.
fn split_words(sentence: &str, limit: usize, table: &SpanTable, out: &mut Vec<String>) {
    if !sentence.contains(' ') {
        out.push(sentence.to_owned());
        return;
    }
    let fill = limit * 6 / 10;
    let mut running = String::new();
    for word in sentence.split(' ').filter(|w| !w.is_empty()) {
        if word.len() > fill {
            flush(out, &mut running);
            hard_cut(word, fill.max(1), table, out);
            continue;
        }
        if !running.is_empty() && running.len() + 1 + word.len() > fill {
            flush(out, &mut running);
        }
        if !running.is_empty() {
            running.push(' ');
        }
        running.push_str(word);
    }
    flush(out, &mut running);
}

/// Slice an unbreakable token (URL, base64 blob) into `width`-byte pieces.
fn hard_cut(word: &str, width: usize, table: &SpanTable, out: &mut Vec<String>) {
    let mut rest = word;
    while rest.len() > width {
        let mut cut = table.adjust_cut(rest, floor_char_boundary(rest, width));
        if cut == 0 {
            cut = floor_char_boundary(rest, width);
        }
        if cut == 0 {
            break;
        }
        out.push(rest[..cut].to_owned());
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        out.push(rest.to_owned());
    }
}

/// Line-based splitter at the full budget, no headroom. Overlong lines break
/// on a space when one is in reach, otherwise at the exact byte budget.
fn split_lines(text: &str, limit: usize, table: &SpanTable) -> Vec<String> {
    let mut out = Vec::new();
    let mut running = String::new();
    for line in text.split('\n') {
        if !running.is_empty() && running.len() + 1 + line.len() > limit {
            flush(&mut out, &mut running);
        }
        if line.len() > limit {
            flush(&mut out, &mut running);
            let mut rest = line;
            while rest.len() > limit {
                let end = table.adjust_cut(rest, floor_char_boundary(rest, limit));
                let cut = match rest[..end].rfind(' ') {
                    Some(i) if i > 0 => i,
                    _ => end,
                };
                if cut == 0 {
                    break;
                }
                out.push(rest[..cut].to_owned());
                rest = rest[cut..].strip_prefix(' ').unwrap_or(&rest[cut..]);
            }
            running.push_str(rest);
            continue;
        }
        if !running.is_empty() {
            running.push('\n');
        }
        running.push_str(line);
    }
    flush(&mut out, &mut running);
    out
}

/// Budget re-validation after the tiers have run.
///
/// A piece whose restored length exceeds the budget is re-split around its
/// placeholder tokens: literal text goes back through the line splitter,
/// tokens stay atomic. A span longer than the whole budget becomes its own
/// oversized piece.
fn enforce_budget(piece: &str, limit: usize, table: &SpanTable) -> Vec<String> {
    if piece.len() <= limit && table.restored_len(piece) <= limit {
        return vec![piece.to_owned()];
    }
    warn!(
        "chunk over budget after code restoration ({} > {}), re-splitting",
        table.restored_len(piece),
        limit
    );
    let mut out: Vec<String> = Vec::new();
    let mut running = String::new();
    let mut running_len = 0; // restored bytes
    for segment in table.segments(piece) {
        match segment {
            Segment::Text(t) => {
                if running_len + t.len() <= limit {
                    running.push_str(t);
                    running_len += t.len();
                    continue;
                }
                if !running.is_empty() {
                    out.push(std::mem::take(&mut running));
                    running_len = 0;
                }
                let mut parts = split_lines(t, limit, table);
                if let Some(last) = parts.pop() {
                    out.append(&mut parts);
                    running_len = last.len();
                    running = last;
                }
            }
            Segment::Span(idx) => {
                let token = table.token(idx);
                let span_len = table.span_len(idx);
                if span_len > limit {
                    if !running.is_empty() {
                        out.push(std::mem::take(&mut running));
                        running_len = 0;
                    }
                    warn!("code span longer than the chunk budget ({span_len} > {limit}), keeping it whole");
                    out.push(token);
                } else if running_len + span_len > limit {
                    out.push(std::mem::take(&mut running));
                    running = token;
                    running_len = span_len;
                } else {
                    running.push_str(&token);
                    running_len += span_len;
                }
            }
        }
    }
    if !running.trim().is_empty() {
        out.push(running);
    }
    out.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

/// Cut already-plain text to a budget with the line splitter. Used for
/// operator-facing log payloads, not for replies.
pub fn split_plain(text: &str, limit: usize) -> Vec<String> {
    split_lines(text, limit.max(1), &SpanTable::inert())
}
