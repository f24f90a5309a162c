use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use teloxide::types::UserId;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// Invalid regex pattern.
    InvalidRegex { pattern: String, source: regex::Error },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidRegex { pattern, source } => {
                write!(f, "invalid regex pattern '{}': {}", pattern, source)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidRegex { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    owner_ids: Vec<u64>,
    telegram_bot_token: String,
    anthropic_api_key: String,
    /// Completion model id.
    #[serde(default = "default_model")]
    model: String,
    #[serde(default = "default_completion_max_tokens")]
    completion_max_tokens: u32,
    /// Users allowed to chat with the bot. Empty = open to everyone
    /// (the spam gate then applies to strangers).
    #[serde(default)]
    allowed_users: Vec<u64>,
    #[serde(default)]
    spam_patterns: Vec<String>,
    #[serde(default)]
    safe_patterns: Vec<String>,
    #[serde(default = "default_max_strikes")]
    max_strikes: u8,
    /// Byte budget per outgoing message.
    #[serde(default = "default_max_chunk_len")]
    max_chunk_len: usize,
    /// Pause between chunks of one reply, in milliseconds.
    #[serde(default = "default_chunk_delay_ms")]
    chunk_delay_ms: u64,
    /// Replies longer than this (bytes) are also attached as a file
    /// (0 disables).
    #[serde(default)]
    attach_threshold: usize,
    #[serde(default = "default_debounce_ms")]
    debounce_ms: u64,
    #[serde(default = "default_max_history_turns")]
    max_history_turns: usize,
    #[serde(default = "default_history_max_age_min")]
    history_max_age_min: i64,
    /// Chat that receives mirrored WARN/ERROR logs.
    log_chat_id: Option<i64>,
    /// Directory for state files (logs, history, database). Defaults to
    /// the current directory.
    data_dir: Option<String>,
    /// Custom personality/identity override for the bot.
    personality: Option<String>,
}

fn default_model() -> String {
    "claude-haiku-4-5-20251001".to_string()
}

fn default_completion_max_tokens() -> u32 {
    4096
}

fn default_max_strikes() -> u8 {
    3
}

// Telegram's hard cap is 4096; the margin absorbs continuation annotations.
fn default_max_chunk_len() -> usize {
    4000
}

fn default_chunk_delay_ms() -> u64 {
    500
}

fn default_debounce_ms() -> u64 {
    1000
}

fn default_max_history_turns() -> usize {
    40
}

fn default_history_max_age_min() -> i64 {
    120
}

pub struct Config {
    /// Owner IDs - always allowed, never spam-gated.
    pub owner_ids: HashSet<UserId>,
    pub telegram_bot_token: String,
    pub anthropic_api_key: String,
    pub model: String,
    pub completion_max_tokens: u32,
    /// Users allowed to chat. Empty = open mode.
    pub allowed_users: HashSet<UserId>,
    pub spam_patterns: Vec<Regex>,
    pub safe_patterns: Vec<Regex>,
    pub max_strikes: u8,
    pub max_chunk_len: usize,
    pub chunk_delay_ms: u64,
    pub attach_threshold: usize,
    pub debounce_ms: u64,
    pub max_history_turns: usize,
    pub history_max_age_min: i64,
    pub log_chat_id: Option<i64>,
    pub data_dir: PathBuf,
    pub personality: Option<String>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_path = path.as_ref().to_path_buf();
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::ReadFile { path: config_path.clone(), source: e })?;
        let file: ConfigFile = serde_json::from_str(&content)
            .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?;

        // Validate required fields
        if file.owner_ids.is_empty() {
            return Err(ConfigError::Validation("owner_ids must contain at least one owner ID".into()));
        }
        if file.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation("telegram_bot_token is required".into()));
        }
        // Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric
        let token_parts: Vec<&str> = file.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into()
            ));
        }
        if file.anthropic_api_key.is_empty() {
            return Err(ConfigError::Validation("anthropic_api_key is required".into()));
        }
        if file.max_chunk_len < 64 {
            return Err(ConfigError::Validation("max_chunk_len must be at least 64".into()));
        }

        let compile = |patterns: Vec<String>| -> Result<Vec<Regex>, ConfigError> {
            patterns
                .into_iter()
                .map(|p| Regex::new(&p).map_err(|e| ConfigError::InvalidRegex { pattern: p, source: e }))
                .collect()
        };

        let spam_patterns = if file.spam_patterns.is_empty() {
            default_spam_patterns()
        } else {
            compile(file.spam_patterns)?
        };
        let safe_patterns = if file.safe_patterns.is_empty() {
            default_safe_patterns()
        } else {
            compile(file.safe_patterns)?
        };

        let data_dir = file
            .data_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            owner_ids: file.owner_ids.into_iter().map(UserId).collect(),
            telegram_bot_token: file.telegram_bot_token,
            anthropic_api_key: file.anthropic_api_key,
            model: file.model,
            completion_max_tokens: file.completion_max_tokens,
            allowed_users: file.allowed_users.into_iter().map(UserId).collect(),
            spam_patterns,
            safe_patterns,
            max_strikes: file.max_strikes,
            max_chunk_len: file.max_chunk_len,
            chunk_delay_ms: file.chunk_delay_ms,
            attach_threshold: file.attach_threshold,
            debounce_ms: file.debounce_ms,
            max_history_turns: file.max_history_turns,
            history_max_age_min: file.history_max_age_min,
            log_chat_id: file.log_chat_id,
            data_dir,
            personality: file.personality,
        })
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner_ids.contains(&user_id)
    }

    /// Whether a user may chat with the bot at all.
    pub fn can_chat(&self, user_id: UserId) -> bool {
        self.is_owner(user_id)
            || self.allowed_users.is_empty()
            || self.allowed_users.contains(&user_id)
    }

    /// Open mode means anyone can write; the spam gate applies then.
    pub fn is_open_mode(&self) -> bool {
        self.allowed_users.is_empty()
    }
}

fn default_spam_patterns() -> Vec<Regex> {
    vec![
        r"(?i)crypto.*profit",
        r"(?i)earn.*\$\d+.*day",
        r"(?i)click.*link.*bio",
        r"(?i)investment.*opportunity",
        r"(?i)make.*money.*fast",
        r"(?i)forex.*trading",
        r"(?i)t\.me/\S+",
    ]
    .into_iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
}

fn default_safe_patterns() -> Vec<Regex> {
    vec![r"^[^a-zA-Z]*$", r"^\S{1,20}$", r"(?i)^(hi|hello|thanks)"]
        .into_iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config() {
        let file = write_config(r#"{
            "owner_ids": [123456],
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "anthropic_api_key": "sk-test"
        }"#);
        let config = Config::load(file.path()).expect("should load valid config");
        assert!(config.is_owner(UserId(123456)));
        assert_eq!(config.max_chunk_len, 4000);
        assert_eq!(config.chunk_delay_ms, 500);
        assert!(config.is_open_mode());
    }

    #[test]
    fn test_allowed_users_close_open_mode() {
        let file = write_config(r#"{
            "owner_ids": [1],
            "telegram_bot_token": "123456789:ABCdef",
            "anthropic_api_key": "sk-test",
            "allowed_users": [42]
        }"#);
        let config = Config::load(file.path()).unwrap();
        assert!(!config.is_open_mode());
        assert!(config.can_chat(UserId(42)));
        assert!(config.can_chat(UserId(1)));
        assert!(!config.can_chat(UserId(99)));
    }

    #[test]
    fn test_empty_owner_ids() {
        let file = write_config(r#"{
            "owner_ids": [],
            "telegram_bot_token": "123456789:ABCdef",
            "anthropic_api_key": "sk-test"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("owner_ids"));
    }

    #[test]
    fn test_empty_token() {
        let file = write_config(r#"{
            "owner_ids": [123],
            "telegram_bot_token": "",
            "anthropic_api_key": "sk-test"
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_format() {
        for token in ["invalid_token_no_colon", "notanumber:ABCdef", "123456789:"] {
            let file = write_config(&format!(r#"{{
                "owner_ids": [123],
                "telegram_bot_token": "{token}",
                "anthropic_api_key": "sk-test"
            }}"#));
            let err = assert_err(Config::load(file.path()));
            assert!(matches!(err, ConfigError::Validation(_)), "token: {token}");
        }
    }

    #[test]
    fn test_missing_api_key() {
        let file = write_config(r#"{
            "owner_ids": [123],
            "telegram_bot_token": "123456789:ABCdef",
            "anthropic_api_key": ""
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("anthropic_api_key"));
    }

    #[test]
    fn test_tiny_chunk_budget_rejected() {
        let file = write_config(r#"{
            "owner_ids": [123],
            "telegram_bot_token": "123456789:ABCdef",
            "anthropic_api_key": "sk-test",
            "max_chunk_len": 10
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(err.to_string().contains("max_chunk_len"));
    }

    #[test]
    fn test_invalid_regex_pattern() {
        let file = write_config(r#"{
            "owner_ids": [123],
            "telegram_bot_token": "123456789:ABCdef",
            "anthropic_api_key": "sk-test",
            "spam_patterns": ["[invalid(regex"]
        }"#);
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }

    #[test]
    fn test_file_not_found() {
        let err = assert_err(Config::load("/nonexistent/path/config.json"));
        assert!(matches!(err, ConfigError::ReadFile { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load(file.path()));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }
}
