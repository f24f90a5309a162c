//! Chatbot module - relays Telegram messages to the completion API and
//! renders replies back into Telegram-sized messages.

pub mod database;
pub mod debounce;
pub mod degrade;
pub mod delivery;
pub mod engine;
pub mod history;
pub mod markup;
pub mod message;
pub mod render;
pub mod spans;
pub mod telegram;

#[cfg(test)]
mod tests;

pub use engine::{system_prompt, ChatbotConfig, ChatbotEngine};
pub use message::{ChatMessage, ReplyTo};
pub use render::{render, Chunk, ChunkPosition, MarkupMode};
pub use telegram::TelegramClient;
