//! Protected code spans.
//!
//! Fenced code blocks and inline code must survive chunking and markup repair
//! untouched. Before segmentation they are swapped for short placeholder
//! tokens; after all chunking decisions are final the tokens are substituted
//! back verbatim. The token alphabet is picked per input so a token can never
//! collide with user text.

/// One piece of placeholder-substituted text: literal text or a span index.
pub enum Segment<'a> {
    Text(&'a str),
    Span(usize),
}

/// Maps placeholder tokens back to the original code spans.
pub struct SpanTable {
    open: char,
    close: char,
    spans: Vec<String>,
}

/// Pick two sentinel characters that do not occur in the input.
///
/// Private-use plane characters are used first; if the input somehow contains
/// all candidates, extraction is skipped entirely rather than risking a
/// collision.
fn pick_sentinels(text: &str) -> Option<(char, char)> {
    let mut free = ('\u{E000}'..='\u{E07F}').filter(|&c| !text.contains(c));
    let open = free.next()?;
    let close = free.next()?;
    Some((open, close))
}

/// Replace fenced code blocks and inline code with placeholder tokens.
///
/// Fenced blocks are taken first so backticks inside a fence are never read
/// as inline delimiters. Returns the substituted text and the table needed
/// to restore it.
pub fn extract(text: &str) -> (String, SpanTable) {
    let Some((open, close)) = pick_sentinels(text) else {
        return (text.to_owned(), SpanTable::inert());
    };
    let mut table = SpanTable {
        open,
        close,
        spans: Vec::new(),
    };
    let fenced = extract_fenced(text, &mut table);
    let substituted = extract_inline(&fenced, &mut table);
    (substituted, table)
}

/// Swap each ```-delimited block (shortest match, delimiters included) for a token.
fn extract_fenced(text: &str, table: &mut SpanTable) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("```") {
        let Some(end_rel) = rest[start + 3..].find("```") else {
            break; // unclosed fence stays as ordinary text
        };
        let end = start + 3 + end_rel + 3;
        out.push_str(&rest[..start]);
        out.push_str(&table.insert(&rest[start..end]));
        rest = &rest[end..];
    }
    out.push_str(rest);
    out
}

/// Swap each single-backtick span (no embedded line break) for a token.
fn extract_inline(text: &str, table: &mut SpanTable) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('`') {
        let after = &rest[start + 1..];
        match after.find('`') {
            Some(end) if !after[..end].contains('\n') => {
                out.push_str(&rest[..start]);
                out.push_str(&table.insert(&rest[start..start + end + 2]));
                rest = &after[end + 1..];
            }
            _ => {
                // lone backtick, or a "span" crossing a line break
                out.push_str(&rest[..=start]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

impl SpanTable {
    /// A table that extracted nothing and restores text unchanged.
    pub(crate) fn inert() -> Self {
        Self {
            open: '\0',
            close: '\0',
            spans: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    fn insert(&mut self, span: &str) -> String {
        let token = self.token(self.spans.len());
        self.spans.push(span.to_owned());
        token
    }

    /// The placeholder token for span `idx`.
    pub fn token(&self, idx: usize) -> String {
        format!("{}{}{}", self.open, idx, self.close)
    }

    fn token_width(&self, idx: usize) -> usize {
        let digits = if idx == 0 { 1 } else { idx.ilog10() as usize + 1 };
        self.open.len_utf8() + digits + self.close.len_utf8()
    }

    /// Byte length of the span behind token `idx`.
    pub fn span_len(&self, idx: usize) -> usize {
        self.spans.get(idx).map_or(0, String::len)
    }

    /// Split placeholder text into literal parts and span references.
    pub fn segments<'a>(&self, text: &'a str) -> Vec<Segment<'a>> {
        if self.spans.is_empty() {
            return vec![Segment::Text(text)];
        }
        let mut segments = Vec::new();
        let mut rest = text;
        while let Some(pos) = rest.find(self.open) {
            let after = &rest[pos + self.open.len_utf8()..];
            let digits_end = after
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(after.len());
            if digits_end > 0 && after[digits_end..].starts_with(self.close) {
                if pos > 0 {
                    segments.push(Segment::Text(&rest[..pos]));
                }
                let idx: usize = after[..digits_end].parse().unwrap_or(0);
                segments.push(Segment::Span(idx));
                rest = &after[digits_end + self.close.len_utf8()..];
            } else {
                let cut = pos + self.open.len_utf8();
                segments.push(Segment::Text(&rest[..cut]));
                rest = &rest[cut..];
            }
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest));
        }
        segments
    }

    /// Substitute every token back with its original span.
    pub fn restore(&self, text: &str) -> String {
        if self.spans.is_empty() {
            return text.to_owned();
        }
        let mut out = String::with_capacity(text.len());
        for segment in self.segments(text) {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Span(idx) => out.push_str(self.spans.get(idx).map_or("", String::as_str)),
            }
        }
        out
    }

    /// Byte length of `text` after restoration, without building the string.
    pub fn restored_len(&self, text: &str) -> usize {
        if self.spans.is_empty() {
            return text.len();
        }
        self.segments(text)
            .iter()
            .map(|segment| match segment {
                Segment::Text(t) => t.len(),
                Segment::Span(idx) => self.span_len(*idx),
            })
            .sum()
    }

    /// Move a cut position out of the middle of a token.
    ///
    /// Returns `at` unchanged when it does not land inside a placeholder,
    /// otherwise the byte offset where that token starts.
    pub fn adjust_cut(&self, text: &str, at: usize) -> usize {
        if self.spans.is_empty() {
            return at;
        }
        let mut offset = 0;
        for segment in self.segments(text) {
            let width = match segment {
                Segment::Text(t) => t.len(),
                Segment::Span(idx) => self.token_width(idx),
            };
            if at > offset && at < offset + width {
                if matches!(segment, Segment::Span(_)) {
                    return offset;
                }
                return at;
            }
            offset += width;
        }
        at
    }
}
