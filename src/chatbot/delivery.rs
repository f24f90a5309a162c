//! Chunk delivery.
//!
//! Each chunk walks a small state ladder: send with markup, retry with
//! sanitized markup, fall back to glyph-degraded plain text. The ladder is
//! explicit state, not nested error handling, and plain text is the rung
//! that cannot fail for markup reasons. Chunks go out strictly in order
//! with a short pause between them; a transport failure aborts the rest.

use std::time::Duration;

use tracing::{info, warn};

use crate::chatbot::degrade;
use crate::chatbot::markup;
use crate::chatbot::render::{Chunk, ChunkPosition, MarkupMode};
use crate::chatbot::spans;
use crate::chatbot::telegram::{Attachment, SendOutcome, TelegramClient};

/// Appended to every chunk that has a follow-up.
pub const CONTINUED_TAIL: &str = "continued…";
/// Prepended to every chunk that follows another.
pub const CONTINUED_HEAD: &str = "…continued";

/// Rungs of the per-chunk fallback ladder, tried in order, terminal on the
/// first successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    TryRich,
    TrySanitized,
    Plain,
}

/// First rung for a chunk: straight to rich when the markup already
/// balances, otherwise start at the sanitizer.
pub fn initial_state(text: &str) -> DeliveryState {
    let (placeholder, _table) = spans::extract(text);
    if markup::is_balanced(&placeholder) {
        DeliveryState::TryRich
    } else {
        DeliveryState::TrySanitized
    }
}

/// The rung below, or `None` from the bottom.
pub fn next_state(state: DeliveryState) -> Option<DeliveryState> {
    match state {
        DeliveryState::TryRich => Some(DeliveryState::TrySanitized),
        DeliveryState::TrySanitized => Some(DeliveryState::Plain),
        DeliveryState::Plain => None,
    }
}

/// Add continuation annotations based on the chunk's place in the sequence.
pub fn annotate(content: &str, position: ChunkPosition) -> String {
    match position {
        ChunkPosition::Only => content.to_owned(),
        ChunkPosition::First => format!("{content}\n\n{CONTINUED_TAIL}"),
        ChunkPosition::Middle => format!("{CONTINUED_HEAD}\n\n{content}\n\n{CONTINUED_TAIL}"),
        ChunkPosition::Last => format!("{CONTINUED_HEAD}\n\n{content}"),
    }
}

/// Send a rendered reply, chunk by chunk, in order.
///
/// The attachment (if any) goes out with the chunk flagged to carry it.
/// A failed send aborts the remaining chunks and returns the error; retry
/// policy belongs to the transport, not here.
pub async fn deliver_chunks(
    telegram: &TelegramClient,
    chat_id: i64,
    chunks: &[Chunk],
    attachment: Option<&Attachment>,
    delay: Duration,
) -> Result<Vec<i64>, String> {
    let mut sent = Vec::with_capacity(chunks.len());
    let mut first = true;
    for chunk in chunks {
        if chunk.content.trim().is_empty() {
            continue;
        }
        if !first {
            tokio::time::sleep(delay).await;
        }
        first = false;
        let attach = if chunk.carries_attachment {
            attachment
        } else {
            None
        };
        sent.push(deliver_chunk(telegram, chat_id, chunk, attach).await?);
    }
    Ok(sent)
}

async fn deliver_chunk(
    telegram: &TelegramClient,
    chat_id: i64,
    chunk: &Chunk,
    attachment: Option<&Attachment>,
) -> Result<i64, String> {
    let text = annotate(&chunk.content, chunk.position);
    let mut state = match chunk.markup_mode {
        MarkupMode::Rich => initial_state(&text),
        MarkupMode::Plain => DeliveryState::Plain,
    };
    loop {
        let outcome = match state {
            DeliveryState::TryRich => telegram.send_rich(chat_id, &text, attachment).await,
            DeliveryState::TrySanitized => {
                let cleaned = markup::sanitize_outside_code(&text);
                let (placeholder, _table) = spans::extract(&cleaned);
                if !markup::is_balanced(&placeholder) {
                    // repair didn't converge; skip the wasted attempt
                    state = DeliveryState::Plain;
                    continue;
                }
                telegram.send_rich(chat_id, &cleaned, attachment).await
            }
            DeliveryState::Plain => {
                telegram
                    .send_plain(chat_id, &degrade::degrade(&text), attachment)
                    .await
            }
        };
        match outcome {
            SendOutcome::Sent(message_id) => {
                info!("Delivered chunk to {} (msg {})", chat_id, message_id);
                return Ok(message_id);
            }
            SendOutcome::MarkupRejected(reason) => match next_state(state) {
                Some(next) => {
                    warn!("Markup rejected ({reason}), falling back");
                    state = next;
                }
                None => {
                    // plain text cannot be rejected for markup; this is a
                    // transport-side fault, not something to retry here
                    return Err(format!("plain text rejected by transport: {reason}"));
                }
            },
            SendOutcome::Failed(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ladder_order() {
        assert_eq!(next_state(DeliveryState::TryRich), Some(DeliveryState::TrySanitized));
        assert_eq!(next_state(DeliveryState::TrySanitized), Some(DeliveryState::Plain));
        assert_eq!(next_state(DeliveryState::Plain), None);
    }

    #[test]
    fn test_initial_state_balanced() {
        assert_eq!(initial_state("all **good** here"), DeliveryState::TryRich);
    }

    #[test]
    fn test_initial_state_unbalanced() {
        assert_eq!(initial_state("**broken"), DeliveryState::TrySanitized);
    }

    #[test]
    fn test_initial_state_ignores_code_content() {
        // unbalanced markers inside code are not markup
        assert_eq!(initial_state("fine `**[` fine"), DeliveryState::TryRich);
    }

    #[test]
    fn test_annotate_only_is_verbatim() {
        assert_eq!(annotate("text", ChunkPosition::Only), "text");
    }

    #[test]
    fn test_annotate_first_and_last() {
        assert_eq!(
            annotate("one", ChunkPosition::First),
            format!("one\n\n{CONTINUED_TAIL}")
        );
        assert_eq!(
            annotate("two", ChunkPosition::Last),
            format!("{CONTINUED_HEAD}\n\ntwo")
        );
    }

    #[test]
    fn test_annotate_middle_has_both() {
        let annotated = annotate("mid", ChunkPosition::Middle);
        assert!(annotated.starts_with(CONTINUED_HEAD));
        assert!(annotated.ends_with(CONTINUED_TAIL));
    }
}
