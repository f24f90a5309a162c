//! Persistent SQLite log of the conversation.

use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

use crate::ai::Role;
use crate::chatbot::message::ChatMessage;

/// Aggregates for the /stats command.
#[derive(Debug, Clone)]
pub struct ChatStats {
    pub total: i64,
    pub from_user: i64,
    pub from_bot: i64,
    pub first_timestamp: Option<String>,
}

/// Persistent SQLite store for the chatbot.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Create a new in-memory database.
    pub fn new() -> Self {
        let conn = Connection::open_in_memory().expect("Failed to create in-memory database");
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema();
        db
    }

    /// Open (or create) a database at the given path.
    pub fn load_or_new(path: &Path) -> Self {
        let conn = Connection::open(path).expect("Failed to open database");
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema();

        let count: i64 = db
            .conn
            .lock()
            .unwrap()
            .query_row("SELECT COUNT(*) FROM log", [], |row| row.get(0))
            .unwrap_or(0);
        info!("Loaded database from {:?} ({} log entries)", path, count);
        db
    }

    fn init_schema(&self) {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                username TEXT NOT NULL,
                role TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                text TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_log_chat ON log(chat_id);
            CREATE INDEX IF NOT EXISTS idx_log_timestamp ON log(timestamp);
        "#,
        )
        .expect("Failed to initialize database schema");
    }

    /// Record an incoming user message.
    pub fn add_incoming(&self, msg: &ChatMessage) {
        let conn = self.conn.lock().unwrap();
        let _ = conn.execute(
            "INSERT INTO log (chat_id, user_id, username, role, timestamp, text) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![msg.chat_id, msg.user_id, msg.username, "user", msg.timestamp, msg.text],
        );
    }

    /// Record an outgoing reply.
    pub fn add_outgoing(&self, chat_id: i64, bot_user_id: i64, text: &str, timestamp: &str) {
        let conn = self.conn.lock().unwrap();
        let _ = conn.execute(
            "INSERT INTO log (chat_id, user_id, username, role, timestamp, text) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![chat_id, bot_user_id, "bot", "assistant", timestamp, text],
        );
    }

    /// Most recent turns for a chat, oldest first.
    pub fn recent_turns(&self, chat_id: i64, limit: usize) -> Vec<(Role, String)> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn
            .prepare("SELECT role, text FROM log WHERE chat_id = ?1 ORDER BY id DESC LIMIT ?2")
        {
            Ok(stmt) => stmt,
            Err(_) => return Vec::new(),
        };
        let rows = stmt
            .query_map(params![chat_id, limit as i64], |row| {
                let role: String = row.get(0)?;
                let text: String = row.get(1)?;
                Ok((Role::from_str(&role), text))
            })
            .map(|rows| rows.flatten().collect::<Vec<_>>())
            .unwrap_or_default();
        rows.into_iter().rev().collect()
    }

    /// Aggregate counts for one chat.
    pub fn stats(&self, chat_id: i64) -> ChatStats {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> i64 {
            conn.query_row(sql, params![chat_id], |row| row.get(0))
                .unwrap_or(0)
        };
        let total = count("SELECT COUNT(*) FROM log WHERE chat_id = ?1");
        let from_user = count("SELECT COUNT(*) FROM log WHERE chat_id = ?1 AND role = 'user'");
        let first_timestamp = conn
            .query_row(
                "SELECT timestamp FROM log WHERE chat_id = ?1 ORDER BY id ASC LIMIT 1",
                params![chat_id],
                |row| row.get(0),
            )
            .ok();
        ChatStats {
            total,
            from_user,
            from_bot: total - from_user,
            first_timestamp,
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_msg(chat_id: i64, text: &str) -> ChatMessage {
        ChatMessage {
            message_id: 1,
            chat_id,
            user_id: 100,
            username: "alice".to_string(),
            timestamp: "2026-01-01 10:00".to_string(),
            text: text.to_string(),
            reply_to: None,
        }
    }

    #[test]
    fn test_log_and_recent_turns() {
        let db = Database::new();
        db.add_incoming(&make_msg(5, "question"));
        db.add_outgoing(5, 42, "answer", "2026-01-01 10:01");

        let turns = db.recent_turns(5, 10);
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0], (Role::User, "question".to_string()));
        assert_eq!(turns[1], (Role::Assistant, "answer".to_string()));
    }

    #[test]
    fn test_recent_turns_limited_and_ordered() {
        let db = Database::new();
        for i in 0..10 {
            db.add_incoming(&make_msg(5, &format!("m{i}")));
        }
        let turns = db.recent_turns(5, 3);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].1, "m7");
        assert_eq!(turns[2].1, "m9");
    }

    #[test]
    fn test_stats_per_chat() {
        let db = Database::new();
        db.add_incoming(&make_msg(1, "a"));
        db.add_incoming(&make_msg(1, "b"));
        db.add_outgoing(1, 42, "r", "2026-01-01 10:01");
        db.add_incoming(&make_msg(2, "other chat"));

        let stats = db.stats(1);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.from_user, 2);
        assert_eq!(stats.from_bot, 1);
        assert!(stats.first_timestamp.is_some());
    }

    #[test]
    fn test_stats_empty_chat() {
        let db = Database::new();
        let stats = db.stats(99);
        assert_eq!(stats.total, 0);
        assert!(stats.first_timestamp.is_none());
    }

    #[test]
    fn test_file_backed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chatlog.db");
        {
            let db = Database::load_or_new(&path);
            db.add_incoming(&make_msg(3, "persisted"));
        }
        let db = Database::load_or_new(&path);
        let turns = db.recent_turns(3, 10);
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].1, "persisted");
    }
}
