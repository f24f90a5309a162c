mod ai;
mod chatbot;
mod config;
mod prefilter;
mod telegram_log;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

use teloxide::prelude::*;
use teloxide::types::ChatKind;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use chatbot::{ChatMessage, ChatbotConfig, ChatbotEngine, ReplyTo, TelegramClient};
use config::Config;
use prefilter::{prefilter, PrefilterResult};

const HELP_TEXT: &str = "\
I'm an AI assistant. Just write to me and I'll answer.

Commands:
/reset - forget our conversation so far
/stats - usage numbers for this chat
/help - this message";

struct BotState {
    config: Config,
    chatbot: ChatbotEngine,
    strikes: Mutex<HashMap<UserId, u8>>,
    dm_denied: Mutex<HashSet<UserId>>,
    ignored: Mutex<HashSet<UserId>>,
}

impl BotState {
    async fn new(config: Config, bot: &Bot) -> Self {
        let ai_client = ai::Client::new(
            config.anthropic_api_key.clone(),
            config.model.clone(),
            config.completion_max_tokens,
        );

        // Get bot info
        let (bot_user_id, bot_username) = match bot.get_me().await {
            Ok(me) => {
                info!("Bot user ID: {}, username: @{}", me.id, me.username());
                (me.id.0 as i64, Some(me.username().to_string()))
            }
            Err(e) => {
                warn!("Failed to get bot info: {e}");
                (0, None)
            }
        };

        let chatbot_config = ChatbotConfig {
            bot_user_id,
            bot_username,
            owner_id: config.owner_ids.iter().next().map(|id| id.0 as i64),
            debounce_ms: config.debounce_ms,
            data_dir: Some(config.data_dir.clone()),
            max_chunk_len: config.max_chunk_len,
            chunk_delay_ms: config.chunk_delay_ms,
            attach_threshold: config.attach_threshold,
            max_history_turns: config.max_history_turns,
            history_max_age_min: config.history_max_age_min,
            personality: config.personality.clone(),
        };

        let telegram = Arc::new(TelegramClient::new(bot.clone()));
        let mut chatbot = ChatbotEngine::new(chatbot_config, telegram, ai_client);
        chatbot.start_debouncer();
        chatbot.notify_owner("hey, just restarted").await;

        Self {
            config,
            chatbot,
            strikes: Mutex::new(HashMap::new()),
            dm_denied: Mutex::new(HashSet::new()),
            ignored: Mutex::new(HashSet::new()),
        }
    }

    async fn add_strike(&self, user_id: UserId) -> u8 {
        let mut strikes = self.strikes.lock().await;
        let count = strikes.entry(user_id).or_insert(0);
        *count += 1;
        *count
    }
}

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "telepage.json".to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let bot = Bot::new(&config.telegram_bot_token);

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("telepage.log"))
        .expect("Failed to open log file");
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_chat_id) = config.log_chat_id {
        let tg_layer = telegram_log::TelegramLogLayer::new(bot.clone(), ChatId(log_chat_id));
        registry.with(tg_layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting telepage...");
    info!("Loaded config from {config_path}");
    info!("Owner IDs: {:?}", config.owner_ids);
    if config.is_open_mode() {
        info!("Open mode: anyone can chat (spam gate active)");
    } else {
        info!("{} allowed user(s)", config.allowed_users.len());
    }

    let state = Arc::new(BotState::new(config, &bot).await);

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_new_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn handle_new_message(bot: Bot, msg: Message, state: Arc<BotState>) -> ResponseResult<()> {
    // one user per chat: only private conversations are served
    if !matches!(msg.chat.kind, ChatKind::Private(_)) {
        return Ok(());
    }

    let user = match msg.from {
        Some(ref u) => u,
        None => return Ok(()),
    };
    let text = match msg.text() {
        Some(t) => t,
        None => return Ok(()),
    };
    let username = user.username.as_deref().unwrap_or(&user.first_name);

    // Access control
    if !state.config.can_chat(user.id) {
        let mut denied = state.dm_denied.lock().await;
        if denied.insert(user.id) {
            info!("DM from non-allowed user {} ({}) - denial", username, user.id);
            bot.send_message(msg.chat.id, "Access denied.").await.ok();
        }
        return Ok(());
    }

    if state.ignored.lock().await.contains(&user.id) {
        return Ok(());
    }

    // Commands
    if text.starts_with('/') {
        return handle_command(&bot, &msg, text, &state).await;
    }

    // Spam gate for strangers in open mode
    if state.config.is_open_mode() && !state.config.is_owner(user.id) {
        let verdict = prefilter(text, &state.config.spam_patterns, &state.config.safe_patterns);
        if verdict == PrefilterResult::ObviousSpam {
            let strikes = state.add_strike(user.id).await;
            info!("Spam from {} ({}): {} strike(s)", username, user.id, strikes);
            if strikes >= state.config.max_strikes {
                info!("Ignoring {} ({}) from now on", username, user.id);
                state.ignored.lock().await.insert(user.id);
            }
            return Ok(());
        }
    }

    state
        .chatbot
        .handle_message(telegram_to_chat_message(&msg))
        .await;

    Ok(())
}

async fn handle_command(
    bot: &Bot,
    msg: &Message,
    text: &str,
    state: &BotState,
) -> ResponseResult<()> {
    let command = text.split_whitespace().next().unwrap_or(text);
    // commands may arrive as /cmd@botname
    let command = command.split('@').next().unwrap_or(command);
    let chat_id = msg.chat.id;

    match command {
        "/start" | "/help" => {
            bot.send_message(chat_id, HELP_TEXT).await?;
        }
        "/reset" => {
            let dropped = state.chatbot.reset_chat(chat_id.0).await;
            let reply = if dropped > 0 {
                format!("Forgotten. {dropped} turn(s) dropped.")
            } else {
                "Nothing to forget.".to_string()
            };
            bot.send_message(chat_id, reply).await?;
        }
        "/stats" => {
            let stats = state.chatbot.stats(chat_id.0).await;
            bot.send_message(chat_id, stats).await?;
        }
        _ => {
            bot.send_message(chat_id, "Unknown command. Try /help.")
                .await?;
        }
    }
    Ok(())
}

fn telegram_to_chat_message(msg: &Message) -> ChatMessage {
    let user = msg.from.as_ref();
    let user_id = user.map(|u| u.id.0 as i64).unwrap_or(0);
    let username = user
        .and_then(|u| u.username.as_deref())
        .unwrap_or_else(|| user.map(|u| u.first_name.as_str()).unwrap_or("unknown"))
        .to_string();

    let timestamp = msg.date.format("%Y-%m-%d %H:%M").to_string();
    let text = msg.text().unwrap_or("").to_string();

    let reply_to = msg.reply_to_message().map(|reply| {
        let reply_user = reply.from.as_ref();
        let reply_username = reply_user
            .and_then(|u| u.username.as_deref())
            .unwrap_or_else(|| reply_user.map(|u| u.first_name.as_str()).unwrap_or("unknown"))
            .to_string();

        ReplyTo {
            message_id: reply.id.0 as i64,
            username: reply_username,
            text: reply.text().unwrap_or("").to_string(),
        }
    });

    ChatMessage {
        message_id: msg.id.0 as i64,
        chat_id: msg.chat.id.0,
        user_id,
        username,
        timestamp,
        text,
        reply_to,
    }
}
