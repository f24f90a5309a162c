//! Telegram client using teloxide.

use teloxide::prelude::*;
use teloxide::types::{ChatAction, InputFile, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::{info, warn};

/// Result of one send attempt, as the delivery ladder sees it.
#[derive(Debug)]
pub enum SendOutcome {
    /// Sent; carries the new message id.
    Sent(i64),
    /// Telegram refused to parse the markup entities.
    MarkupRejected(String),
    /// Everything else: network, rate limit, bad chat.
    Failed(String),
}

/// Opaque payload delivered together with the final chunk of a reply.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub data: Vec<u8>,
    pub file_name: String,
}

/// Telegram API client.
pub struct TelegramClient {
    bot: Bot,
}

impl TelegramClient {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }

    /// Send with Markdown parsing. An entity-parse rejection comes back as
    /// `MarkupRejected` so the caller can fall down its ladder.
    pub async fn send_rich(
        &self,
        chat_id: i64,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> SendOutcome {
        let result = self
            .bot
            .send_message(ChatId(chat_id), text)
            .parse_mode(ParseMode::Markdown)
            .await;

        match result {
            Ok(msg) => self.finish_send(chat_id, msg.id.0 as i64, attachment).await,
            Err(RequestError::Api(ApiError::CantParseEntities(reason))) => {
                warn!("Markup rejected for chat {}: {}", chat_id, reason);
                SendOutcome::MarkupRejected(reason)
            }
            Err(e) => {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                SendOutcome::Failed(msg)
            }
        }
    }

    /// Send without a parse mode. Cannot be rejected for markup.
    pub async fn send_plain(
        &self,
        chat_id: i64,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> SendOutcome {
        match self.bot.send_message(ChatId(chat_id), text).await {
            Ok(msg) => self.finish_send(chat_id, msg.id.0 as i64, attachment).await,
            Err(e) => {
                let msg = format!("Failed to send: {e}");
                warn!("{}", msg);
                SendOutcome::Failed(msg)
            }
        }
    }

    async fn finish_send(
        &self,
        chat_id: i64,
        message_id: i64,
        attachment: Option<&Attachment>,
    ) -> SendOutcome {
        if let Some(attachment) = attachment {
            if let Err(e) = self.send_document(chat_id, attachment).await {
                return SendOutcome::Failed(e);
            }
        }
        SendOutcome::Sent(message_id)
    }

    /// Upload an attachment as a document.
    pub async fn send_document(&self, chat_id: i64, attachment: &Attachment) -> Result<i64, String> {
        info!(
            "📎 Sending document {} to chat {} ({} bytes)",
            attachment.file_name,
            chat_id,
            attachment.data.len()
        );
        let input_file =
            InputFile::memory(attachment.data.clone()).file_name(attachment.file_name.clone());

        self.bot
            .send_document(ChatId(chat_id), input_file)
            .await
            .map(|msg| msg.id.0 as i64)
            .map_err(|e| {
                let msg = format!("Failed to send document: {e}");
                warn!("{}", msg);
                msg
            })
    }

    /// Show the "typing…" indicator while a reply is being produced.
    pub async fn send_typing(&self, chat_id: i64) {
        if let Err(e) = self
            .bot
            .send_chat_action(ChatId(chat_id), ChatAction::Typing)
            .await
        {
            warn!("Failed to send typing action: {e}");
        }
    }
}
