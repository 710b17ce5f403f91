//! Append-only, in-memory conversation log.
//!
//! The log is the only shared mutable state in the system. Appends and
//! resets take the mutex; reads clone a consistent snapshot so concurrent
//! requests never observe a torn window. Prompt size is bounded by
//! [`ConversationLog::windowed`], not by the log itself.

use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Greeting used for the synthetic welcome turn.
pub const WELCOME_MESSAGE: &str =
    "Hi! Snap a photo of the item you want to fix or replace, or just ask me a question.";

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    System,
}

/// One extracted web search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
}

/// One recorded conversation entry. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Wall-clock seconds since the Unix epoch.
    pub timestamp: f64,
    pub role: Role,
    pub message: String,
    #[serde(default)]
    pub via_voice: bool,
    #[serde(default)]
    pub image_attached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_results: Option<Vec<SearchResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amazon_search_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_queries: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_image_url: Option<String>,
}

impl Turn {
    pub fn user(message: impl Into<String>) -> Self {
        Self::new(Role::User, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(Role::System, message)
    }

    fn new(role: Role, message: impl Into<String>) -> Self {
        Self {
            timestamp: now_seconds(),
            role,
            message: message.into(),
            via_voice: false,
            image_attached: false,
            search_results: None,
            amazon_search_url: None,
            origin_query: None,
            candidate_queries: None,
            uploaded_image_url: None,
        }
    }
}

fn now_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn welcome_turn() -> Turn {
    Turn::system(WELCOME_MESSAGE)
}

/// Ordered record of turns with interior synchronization.
#[derive(Debug)]
pub struct ConversationLog {
    turns: Mutex<Vec<Turn>>,
}

impl ConversationLog {
    /// Creates a log seeded with the welcome turn.
    pub fn new() -> Self {
        Self {
            turns: Mutex::new(vec![welcome_turn()]),
        }
    }

    /// Appends a turn. Never fails; turns are never reordered or dropped
    /// outside of [`ConversationLog::reset`].
    pub fn append(&self, turn: Turn) {
        self.lock().push(turn);
    }

    /// Returns the most recent `limit` turns in original order.
    pub fn windowed(&self, limit: usize) -> Vec<Turn> {
        let turns = self.lock();
        let start = turns.len().saturating_sub(limit);
        turns[start..].to_vec()
    }

    /// Atomically replaces all turns with a single fresh welcome turn,
    /// which is returned.
    pub fn reset(&self) -> Turn {
        let welcome = welcome_turn();
        let mut turns = self.lock();
        turns.clear();
        turns.push(welcome.clone());
        welcome
    }

    /// Returns the full history. Read-only export.
    pub fn all(&self) -> Vec<Turn> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Turn>> {
        self.turns.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log_with_messages(count: usize) -> ConversationLog {
        let log = ConversationLog::new();
        for i in 0..count {
            log.append(Turn::user(format!("message {i}")));
        }
        log
    }

    #[test]
    fn new_log_starts_with_welcome_turn() {
        let log = ConversationLog::new();
        let all = log.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].role, Role::System);
        assert_eq!(all[0].message, WELCOME_MESSAGE);
    }

    #[test]
    fn windowed_returns_most_recent_in_order() {
        let log = log_with_messages(5);
        let window = log.windowed(3);
        assert_eq!(window.len(), 3);
        assert_eq!(window[0].message, "message 2");
        assert_eq!(window[2].message, "message 4");
    }

    #[test]
    fn windowed_caps_at_log_length() {
        let log = log_with_messages(2);
        // welcome + 2 appended
        assert_eq!(log.windowed(100).len(), 3);
        assert_eq!(log.windowed(0).len(), 0);
    }

    #[test]
    fn reset_leaves_exactly_one_system_turn() {
        let log = log_with_messages(4);
        let welcome = log.reset();
        assert_eq!(welcome.role, Role::System);
        let all = log.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].role, Role::System);
        assert_eq!(all[0].message, WELCOME_MESSAGE);
    }

    #[test]
    fn append_preserves_relative_order() {
        let log = log_with_messages(10);
        let all = log.all();
        let messages: Vec<&str> = all[1..].iter().map(|t| t.message.as_str()).collect();
        let expected: Vec<String> = (0..10).map(|i| format!("message {i}")).collect();
        assert_eq!(messages, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }

    #[test]
    fn concurrent_append_and_read_stays_consistent() {
        use std::sync::Arc;

        let log = Arc::new(ConversationLog::new());
        let mut handles = Vec::new();
        for worker in 0..4 {
            let log = Arc::clone(&log);
            handles.push(std::thread::spawn(move || {
                for i in 0..50 {
                    log.append(Turn::user(format!("w{worker}-{i}")));
                    let window = log.windowed(8);
                    assert!(window.len() <= 8);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(log.len(), 1 + 4 * 50);
    }

    #[test]
    fn turn_serializes_without_empty_optionals() {
        let turn = Turn::user("hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("search_results").is_none());
        assert!(json.get("amazon_search_url").is_none());
    }
}
