//! Per-session conversational state.
//!
//! One `Conversation` instance is owned by one orchestrator per session.
//! Single-writer invariant: only the orchestrator that owns the session
//! mutates it, and never from two turns at once.

use crate::intent::Intent;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use strum::Display;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MessageRole {
    #[strum(serialize = "user")]
    User,
    #[strum(serialize = "assistant")]
    Assistant,
    #[strum(serialize = "system")]
    System,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub content: String,
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(content: impl Into<String>, role: MessageRole) -> Self {
        Self {
            content: content.into(),
            role,
            timestamp: Utc::now(),
        }
    }
}

/// Session history plus free-form scratch space for cross-turn facts
/// (e.g. the last booking made).
#[derive(Debug)]
pub struct Conversation {
    pub session_id: String,
    pub language: String,
    messages: Vec<Message>,
    scratch: HashMap<String, String>,
    intent_history: Vec<Intent>,
    started_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Conversation {
    pub fn new(language: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: Uuid::new_v4().to_string(),
            language: language.into(),
            messages: Vec::new(),
            scratch: HashMap::new(),
            intent_history: Vec::new(),
            started_at: now,
            last_activity: now,
        }
    }

    pub fn add_message(&mut self, message: Message) {
        self.last_activity = Utc::now();
        self.messages.push(message);
    }

    pub fn add_user_message(&mut self, content: impl Into<String>) {
        self.add_message(Message::new(content, MessageRole::User));
    }

    pub fn add_assistant_message(&mut self, content: impl Into<String>) {
        self.add_message(Message::new(content, MessageRole::Assistant));
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    /// Last `n` messages formatted as prompt context.
    pub fn recent_context(&self, n: usize) -> String {
        let start = self.messages.len().saturating_sub(n);
        self.messages[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Store a cross-turn fact.
    pub fn set_state(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.last_activity = Utc::now();
        self.scratch.insert(key.into(), value.into());
    }

    pub fn get_state(&self, key: &str) -> Option<&str> {
        self.scratch.get(key).map(String::as_str)
    }

    pub fn record_intent(&mut self, intent: Intent) {
        self.intent_history.push(intent);
    }

    pub fn last_intent(&self) -> Option<Intent> {
        self.intent_history.last().copied()
    }

    /// Whether the session has been inactive past its time-to-live.
    pub fn is_expired(&self, ttl_minutes: i64) -> bool {
        Utc::now() - self.last_activity > Duration::minutes(ttl_minutes)
    }

    pub fn duration_minutes(&self) -> f64 {
        (Utc::now() - self.started_at).num_seconds() as f64 / 60.0
    }

    /// One-line summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "Session {}: {} messages, {} intents, {:.1} min",
            self.session_id,
            self.messages.len(),
            self.intent_history.len(),
            self.duration_minutes()
        )
    }

    pub fn clear_history(&mut self) {
        self.messages.clear();
    }
}
