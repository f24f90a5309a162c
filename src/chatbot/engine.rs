//! Chatbot engine - relays Telegram messages to the completion API and
//! renders the replies back into deliverable messages.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::ai;
use crate::chatbot::database::Database;
use crate::chatbot::debounce::Debouncer;
use crate::chatbot::delivery;
use crate::chatbot::history::ConversationCache;
use crate::chatbot::message::ChatMessage;
use crate::chatbot::render;
use crate::chatbot::telegram::{Attachment, TelegramClient};

/// How many persisted turns to replay into the cache on startup.
const STARTUP_RELOAD_TURNS: usize = 20;

/// Chatbot configuration.
#[derive(Debug, Clone)]
pub struct ChatbotConfig {
    pub bot_user_id: i64,
    pub bot_username: Option<String>,
    /// The bot owner, notified on startup.
    pub owner_id: Option<i64>,
    pub debounce_ms: u64,
    pub data_dir: Option<PathBuf>,
    /// Byte budget per outgoing message.
    pub max_chunk_len: usize,
    /// Pause between chunks of one reply.
    pub chunk_delay_ms: u64,
    /// Replies longer than this also go out as a file on the last chunk
    /// (0 disables).
    pub attach_threshold: usize,
    pub max_history_turns: usize,
    pub history_max_age_min: i64,
    /// Custom personality override for the system prompt.
    pub personality: Option<String>,
}

impl Default for ChatbotConfig {
    fn default() -> Self {
        Self {
            bot_user_id: 0,
            bot_username: None,
            owner_id: None,
            debounce_ms: 1000,
            data_dir: None,
            max_chunk_len: 4000,
            chunk_delay_ms: 500,
            attach_threshold: 0,
            max_history_turns: 40,
            history_max_age_min: 120,
            personality: None,
        }
    }
}

/// The chatbot engine.
pub struct ChatbotEngine {
    config: ChatbotConfig,
    history: Arc<Mutex<ConversationCache>>,
    database: Arc<Mutex<Database>>,
    telegram: Arc<TelegramClient>,
    ai: Arc<ai::Client>,
    debouncer: Option<Debouncer>,
    /// Chats with messages awaiting processing.
    pending: Arc<Mutex<Vec<i64>>>,
}

impl ChatbotEngine {
    /// Create a new chatbot engine.
    pub fn new(config: ChatbotConfig, telegram: Arc<TelegramClient>, ai: ai::Client) -> Self {
        let history = match config.data_dir.as_ref() {
            Some(dir) => ConversationCache::load_or_new(
                &dir.join("history.json"),
                config.max_history_turns,
                config.history_max_age_min,
            ),
            None => ConversationCache::new(config.max_history_turns, config.history_max_age_min),
        };
        let database = match config.data_dir.as_ref() {
            Some(dir) => Database::load_or_new(&dir.join("chatlog.db")),
            None => Database::new(),
        };

        Self {
            config,
            history: Arc::new(Mutex::new(history)),
            database: Arc::new(Mutex::new(database)),
            telegram,
            ai: Arc::new(ai),
            debouncer: None,
            pending: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Start the debounce timer.
    pub fn start_debouncer(&mut self) {
        let config = self.config.clone();
        let history = self.history.clone();
        let database = self.database.clone();
        let telegram = self.telegram.clone();
        let ai = self.ai.clone();
        let pending = self.pending.clone();

        let debouncer = Debouncer::new(Duration::from_millis(self.config.debounce_ms), move || {
            let config = config.clone();
            let history = history.clone();
            let database = database.clone();
            let telegram = telegram.clone();
            let ai = ai.clone();
            let pending = pending.clone();

            tokio::spawn(async move {
                let chats = {
                    let mut p = pending.lock().await;
                    let mut chats = std::mem::take(&mut *p);
                    chats.sort_unstable();
                    chats.dedup();
                    chats
                };
                if chats.is_empty() {
                    return;
                }
                info!("⚡ Processing {} chat(s)", chats.len());
                for chat_id in chats {
                    if let Err(e) =
                        process_chat(&config, &history, &database, &telegram, &ai, chat_id).await
                    {
                        error!("Process error for chat {}: {}", chat_id, e);
                    }
                }
                save_history(&config, &history).await;
            });
        });

        self.debouncer = Some(debouncer);
    }

    /// Handle an incoming message.
    pub async fn handle_message(&self, msg: ChatMessage) {
        info!(
            "📨 {} ({}): \"{}\"",
            msg.username,
            msg.user_id,
            msg.text.chars().take(50).collect::<String>()
        );

        // first contact since restart: replay persisted turns into the window
        self.reload_chat(msg.chat_id).await;

        {
            let db = self.database.lock().await;
            db.add_incoming(&msg);
        }
        {
            let mut history = self.history.lock().await;
            history.push(msg.chat_id, ai::Role::User, &msg.prompt_text());
        }
        {
            let mut p = self.pending.lock().await;
            p.push(msg.chat_id);
        }

        if let Some(ref debouncer) = self.debouncer {
            debouncer.trigger().await;
        }
    }

    /// Forget one chat's conversation window. Returns how many turns dropped.
    pub async fn reset_chat(&self, chat_id: i64) -> usize {
        let dropped = {
            let mut history = self.history.lock().await;
            history.reset(chat_id)
        };
        save_history(&self.config, &self.history).await;
        info!("Reset chat {} ({} turns dropped)", chat_id, dropped);
        dropped
    }

    /// Human-readable usage summary for one chat.
    pub async fn stats(&self, chat_id: i64) -> String {
        let stats = {
            let db = self.database.lock().await;
            db.stats(chat_id)
        };
        let window = {
            let history = self.history.lock().await;
            history.turn_count(chat_id)
        };
        let since = stats
            .first_timestamp
            .map(|t| format!(" since {t}"))
            .unwrap_or_default();
        format!(
            "{} messages{} ({} from you, {} from me). {} turn(s) in the active window.",
            stats.total, since, stats.from_user, stats.from_bot, window
        )
    }

    /// Rebuild conversation windows from the database after a restart.
    pub async fn reload_chat(&self, chat_id: i64) {
        let turns = {
            let db = self.database.lock().await;
            db.recent_turns(chat_id, STARTUP_RELOAD_TURNS)
        };
        let mut history = self.history.lock().await;
        if history.turn_count(chat_id) > 0 {
            return; // cache file already covered it
        }
        for (role, text) in turns {
            history.push(chat_id, role, &text);
        }
    }

    /// Send startup notification to owner.
    pub async fn notify_owner(&self, message: &str) {
        let Some(owner_id) = self.config.owner_id else {
            return;
        };
        info!("Notifying owner ({})", owner_id);
        let chunks = render::render(message, self.config.max_chunk_len, false);
        if let Err(e) = delivery::deliver_chunks(
            &self.telegram,
            owner_id,
            &chunks,
            None,
            Duration::from_millis(self.config.chunk_delay_ms),
        )
        .await
        {
            error!("Failed to notify owner: {}", e);
        }
    }
}

/// Run one completion for a chat and deliver the reply.
async fn process_chat(
    config: &ChatbotConfig,
    history: &Mutex<ConversationCache>,
    database: &Mutex<Database>,
    telegram: &TelegramClient,
    ai: &ai::Client,
    chat_id: i64,
) -> Result<(), String> {
    telegram.send_typing(chat_id).await;

    let window = {
        let mut history = history.lock().await;
        history.window(chat_id)
    };
    if window.is_empty() {
        return Ok(());
    }

    info!("🤖 Completing for chat {} ({} turn(s))", chat_id, window.len());
    let reply = ai
        .complete(&system_prompt(config), &window)
        .await
        .map_err(|e| format!("Completion failed: {e}"))?;

    if reply.trim().is_empty() {
        warn!("Empty completion for chat {}", chat_id);
        return Ok(());
    }

    {
        let mut history = history.lock().await;
        history.push(chat_id, ai::Role::Assistant, &reply);
    }
    {
        let db = database.lock().await;
        let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M").to_string();
        db.add_outgoing(chat_id, config.bot_user_id, &reply, &timestamp);
    }

    respond(config, telegram, chat_id, &reply).await
}

/// Render a reply into chunks and send them in order.
async fn respond(
    config: &ChatbotConfig,
    telegram: &TelegramClient,
    chat_id: i64,
    reply: &str,
) -> Result<(), String> {
    let attachment = (config.attach_threshold > 0 && reply.len() > config.attach_threshold).then(
        || Attachment {
            data: reply.as_bytes().to_vec(),
            file_name: "reply.md".to_string(),
        },
    );

    let chunks = render::render(reply, config.max_chunk_len, attachment.is_some());
    info!(
        "📤 Reply for {}: {} bytes → {} chunk(s)",
        chat_id,
        reply.len(),
        chunks.len()
    );

    let sent = delivery::deliver_chunks(
        telegram,
        chat_id,
        &chunks,
        attachment.as_ref(),
        Duration::from_millis(config.chunk_delay_ms),
    )
    .await?;
    info!("✅ Sent {} message(s) to chat {}", sent.len(), chat_id);
    Ok(())
}

async fn save_history(config: &ChatbotConfig, history: &Mutex<ConversationCache>) {
    if let Some(ref dir) = config.data_dir {
        let history = history.lock().await;
        if let Err(e) = history.save(&dir.join("history.json")) {
            error!("Failed to save conversation cache: {}", e);
        }
    }
}

/// Generate system prompt.
pub fn system_prompt(config: &ChatbotConfig) -> String {
    let identity = config.personality.clone().unwrap_or_else(|| {
        "You are Telepage, a helpful assistant living in a Telegram chat.".to_string()
    });
    let username_info = match &config.bot_username {
        Some(u) => format!(" Your Telegram @username is @{u}."),
        None => String::new(),
    };

    format!(
        r#"{identity}{username_info}

# Style

- Answer directly; no filler phrases, no forced enthusiasm.
- Mirror the user's verbosity: short questions get short answers.
- Standard Markdown is fine: **bold**, *italic*, `code`, fenced code blocks,
  [links](https://example.com), headers, lists, block quotes.
- Long answers are split into several messages automatically; just write
  naturally and don't pad.

# Context

Each conversation is private, one user per chat. Lines starting with "> …
wrote:" quote the message the user replied to."#
    )
}
