//! Incoming message model and prompt formatting.

use serde::{Deserialize, Serialize};

/// Content quoted when replying to another message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyTo {
    pub message_id: i64,
    pub username: String,
    pub text: String,
}

/// A chat message with the metadata the engine cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: i64,
    pub chat_id: i64,
    pub user_id: i64,
    pub username: String,
    pub timestamp: String,
    pub text: String,
    pub reply_to: Option<ReplyTo>,
}

/// Max chars to include from quoted reply.
const MAX_QUOTE_LENGTH: usize = 200;

/// Safely truncate a string at a char boundary.
fn truncate_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl ChatMessage {
    /// Render for the completion prompt. A quoted reply is folded in as a
    /// single-line block quote above the message text, truncated so a long
    /// quote cannot crowd out the conversation window.
    pub fn prompt_text(&self) -> String {
        match &self.reply_to {
            Some(reply) => {
                let flat = reply.text.replace('\n', " ");
                let quoted = if flat.len() > MAX_QUOTE_LENGTH {
                    format!("{}…", truncate_safe(&flat, MAX_QUOTE_LENGTH))
                } else {
                    flat
                };
                format!("> {} wrote: {}\n{}", reply.username, quoted, self.text)
            }
            None => self.text.clone(),
        }
    }
}
