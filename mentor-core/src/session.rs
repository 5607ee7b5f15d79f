//! Conversation and response-history state.

use chrono::{DateTime, Local};
use mentor_shared::{ChatMessage, UsageStats};
use serde::{Deserialize, Serialize};

/// One completed response, kept until the next [`SessionState::reset`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseHistoryEntry {
    pub timestamp: DateTime<Local>,
    pub text: String,
    pub usage: Option<UsageStats>,
}

/// Holds the conversation message list and the append-only history of
/// completed responses.
///
/// Conversation policy: stateless single-turn. [`SessionState::build_session`]
/// always produces a fresh [system, user] pair; completed turns land in the
/// history, not in the next request's context.
#[derive(Debug)]
pub struct SessionState {
    default_system_prompt: String,
    messages: Vec<ChatMessage>,
    history: Vec<ResponseHistoryEntry>,
    last_response: Option<String>,
}

impl SessionState {
    pub fn new(default_system_prompt: impl Into<String>) -> Self {
        let default_system_prompt = default_system_prompt.into();
        let messages = vec![ChatMessage::system(default_system_prompt.clone())];
        Self {
            default_system_prompt,
            messages,
            history: Vec::new(),
            last_response: None,
        }
    }

    /// Clears the conversation back to a single system message and drops all
    /// response history. Calling it again on a fresh state is a no-op.
    pub fn reset(&mut self) {
        self.messages.clear();
        self.messages
            .push(ChatMessage::system(self.default_system_prompt.clone()));
        self.history.clear();
        self.last_response = None;
    }

    /// Appends a completed response to the history. Prior entries are never
    /// removed.
    pub fn record_completion(&mut self, text: impl Into<String>, usage: Option<UsageStats>) {
        let text = text.into();
        self.last_response = Some(text.clone());
        self.history.push(ResponseHistoryEntry {
            timestamp: Local::now(),
            text,
            usage,
        });
    }

    /// Builds the message sequence for the next request: a fresh two-element
    /// session. A blank system prompt falls back to the configured default.
    pub fn build_session(&self, system_prompt: &str, user_text: &str) -> Vec<ChatMessage> {
        let prompt = if system_prompt.trim().is_empty() {
            self.default_system_prompt.as_str()
        } else {
            system_prompt
        };
        vec![ChatMessage::system(prompt), ChatMessage::user(user_text)]
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn history(&self) -> &[ResponseHistoryEntry] {
        &self.history
    }

    pub fn last_response(&self) -> Option<&str> {
        self.last_response.as_deref()
    }
}
