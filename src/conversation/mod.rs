//! # Conversation Module
//!
//! Per-connection dialogue history. Each browser connection owns one
//! [`Conversation`]: an ordered list of turns that always opens with the
//! fixed system instruction and then alternates user and assistant turns.
//!
//! ## Key Components:
//! - **Turn / Role**: One message in the format the chat API expects
//! - **Conversation**: The turn list plus bookkeeping
//! - **SessionStore**: Connection id → conversation map shared across connections

pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use store::{SessionStore, SharedConversation};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single (role, text) pair, serialized as a chat API message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Dialogue history for one connection.
///
/// The system turn is set at construction and there is no API that removes
/// or edits existing turns, so it stays first and unchanged for the life of
/// the conversation.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: Vec<Turn>,
    created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(system_prompt: &str) -> Self {
        Self {
            turns: vec![Turn::system(system_prompt)],
            created_at: Utc::now(),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::assistant(content));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// The system instruction this conversation started with.
    #[cfg(test)]
    pub fn system_turn(&self) -> &Turn {
        &self.turns[0]
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
