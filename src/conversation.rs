//! Append-only conversation history

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mood::Emotion;

/// Default number of turns exposed to the backend
pub const DEFAULT_HISTORY_WINDOW: usize = 6;

/// Largest accepted history window
pub const MAX_HISTORY_WINDOW: usize = 50;

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single utterance in the conversation
///
/// Turns are immutable once created; fields are only readable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    role: Role,
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    emotion: Option<Emotion>,
    timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// A user utterance
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            emotion: None,
            timestamp: Utc::now(),
        }
    }

    /// An assistant reply spoken with the given emotion
    #[must_use]
    pub fn assistant(content: impl Into<String>, emotion: Option<Emotion>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            emotion,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        self.role
    }

    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[must_use]
    pub const fn emotion(&self) -> Option<Emotion> {
        self.emotion
    }

    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Ordered turn history with a bounded recall window
#[derive(Debug, Clone)]
pub struct ConversationStore {
    turns: Vec<ConversationTurn>,
    window: usize,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_WINDOW)
    }
}

impl ConversationStore {
    /// Create an empty store; `window` is clamped to `1..=MAX_HISTORY_WINDOW`
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            turns: Vec::new(),
            window: window.clamp(1, MAX_HISTORY_WINDOW),
        }
    }

    /// Append one turn
    pub fn append(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    /// Append a user turn followed by its reply
    pub fn record_exchange(&mut self, user: ConversationTurn, assistant: ConversationTurn) {
        self.turns.reserve(2);
        self.turns.push(user);
        self.turns.push(assistant);
    }

    /// The most recent turns, at most `window_size()` of them, oldest first
    #[must_use]
    pub fn window(&self) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(self.window);
        &self.turns[start..]
    }

    /// Configured window size
    #[must_use]
    pub const fn window_size(&self) -> usize {
        self.window
    }

    /// Full history, oldest first
    #[must_use]
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    #[must_use]
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}
