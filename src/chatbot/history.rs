//! Per-chat short-term conversation memory.
//!
//! An explicit cache object with a bounded window and age-based expiry,
//! injected into the engine. Persisted as JSON so a restart does not wipe
//! ongoing conversations.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::ai::{Message, Role};

/// One recorded turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Bounded per-chat conversation windows.
pub struct ConversationCache {
    max_turns: usize,
    max_age: TimeDelta,
    chats: HashMap<i64, Vec<Turn>>,
}

impl ConversationCache {
    pub fn new(max_turns: usize, max_age_minutes: i64) -> Self {
        Self {
            max_turns: max_turns.max(1),
            max_age: TimeDelta::minutes(max_age_minutes.max(1)),
            chats: HashMap::new(),
        }
    }

    /// Record a turn, stamping it with the current time.
    pub fn push(&mut self, chat_id: i64, role: Role, text: &str) {
        self.push_turn(
            chat_id,
            Turn {
                role,
                text: text.to_owned(),
                at: Utc::now(),
            },
        );
    }

    /// Record an already-stamped turn (restores from disk, tests).
    pub fn push_turn(&mut self, chat_id: i64, turn: Turn) {
        let turns = self.chats.entry(chat_id).or_default();
        turns.push(turn);
        let max = self.max_turns;
        if turns.len() > max {
            turns.drain(..turns.len() - max);
        }
    }

    /// The prompt window for one chat: expired turns dropped, consecutive
    /// same-role turns merged so roles strictly alternate, and any leading
    /// assistant turn removed (a window must open with the user).
    pub fn window(&mut self, chat_id: i64) -> Vec<Message> {
        self.prune(chat_id, Utc::now());
        let Some(turns) = self.chats.get(&chat_id) else {
            return Vec::new();
        };
        let mut window: Vec<Message> = Vec::with_capacity(turns.len());
        for turn in turns {
            match window.last_mut() {
                Some(last) if last.role == turn.role => {
                    last.content.push_str("\n\n");
                    last.content.push_str(&turn.text);
                }
                _ => window.push(Message {
                    role: turn.role,
                    content: turn.text.clone(),
                }),
            }
        }
        while window.first().is_some_and(|m| m.role == Role::Assistant) {
            window.remove(0);
        }
        window
    }

    /// Drop turns older than the age limit.
    pub fn prune(&mut self, chat_id: i64, now: DateTime<Utc>) {
        if let Some(turns) = self.chats.get_mut(&chat_id) {
            let cutoff = now - self.max_age;
            turns.retain(|t| t.at >= cutoff);
        }
    }

    /// Forget one chat entirely. Returns how many turns were dropped.
    pub fn reset(&mut self, chat_id: i64) -> usize {
        self.chats.remove(&chat_id).map_or(0, |t| t.len())
    }

    pub fn turn_count(&self, chat_id: i64) -> usize {
        self.chats.get(&chat_id).map_or(0, Vec::len)
    }
}

#[derive(Serialize, Deserialize)]
struct CacheState {
    chats: HashMap<i64, Vec<Turn>>,
}

impl ConversationCache {
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let state = CacheState {
            chats: self.chats.clone(),
        };
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| format!("Failed to serialize: {e}"))?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write: {e}"))?;
        Ok(())
    }

    pub fn load(path: &Path, max_turns: usize, max_age_minutes: i64) -> Result<Self, String> {
        let json = std::fs::read_to_string(path).map_err(|e| format!("Failed to read: {e}"))?;
        let state: CacheState =
            serde_json::from_str(&json).map_err(|e| format!("Failed to parse: {e}"))?;
        let mut cache = Self::new(max_turns, max_age_minutes);
        cache.chats = state.chats;
        info!(
            "Loaded conversation cache from {:?} ({} chat(s))",
            path,
            cache.chats.len()
        );
        Ok(cache)
    }

    pub fn load_or_new(path: &Path, max_turns: usize, max_age_minutes: i64) -> Self {
        if path.exists() {
            match Self::load(path, max_turns, max_age_minutes) {
                Ok(cache) => cache,
                Err(e) => {
                    warn!("Failed to load conversation cache: {e}");
                    Self::new(max_turns, max_age_minutes)
                }
            }
        } else {
            info!("No conversation cache file, starting fresh");
            Self::new(max_turns, max_age_minutes)
        }
    }
}
