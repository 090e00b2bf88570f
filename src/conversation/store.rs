//! # Connection Session Store
//!
//! Maps connection identifiers to their conversation. The map itself is a
//! sharded concurrent map, so lookups and inserts for different connections
//! never contend on one global lock. Each conversation additionally sits
//! behind its own async mutex: the dialogue step holds it across the remote
//! chat call so a user turn and its assistant turn are appended inside one
//! critical section.
//!
//! Entries are created when a connection's audio message arrives and removed
//! when its socket actor stops. An exchange still running at that point keeps
//! its own handle and never re-inserts the entry.

use super::Conversation;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Handle to one connection's conversation.
pub type SharedConversation = Arc<Mutex<Conversation>>;

/// Connection id → conversation map.
pub struct SessionStore {
    sessions: DashMap<String, SharedConversation>,
    system_prompt: String,
}

impl SessionStore {
    /// Create an empty store whose new conversations open with `system_prompt`.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            sessions: DashMap::new(),
            system_prompt: system_prompt.into(),
        }
    }

    /// Return the connection's conversation, creating it if absent.
    ///
    /// The entry API holds the shard lock for the check-and-insert, so two
    /// racing calls for the same id always end up sharing one conversation.
    pub fn get_or_create(&self, connection_id: &str) -> SharedConversation {
        self.sessions
            .entry(connection_id.to_string())
            .or_insert_with(|| {
                debug!(connection_id, "Creating conversation");
                Arc::new(Mutex::new(Conversation::new(&self.system_prompt)))
            })
            .value()
            .clone()
    }

    /// Look up a conversation without creating one.
    pub fn get(&self, connection_id: &str) -> Option<SharedConversation> {
        self.sessions.get(connection_id).map(|entry| entry.value().clone())
    }

    /// Drop the connection's conversation. Returns whether one existed.
    pub fn remove(&self, connection_id: &str) -> bool {
        match self.sessions.remove(connection_id) {
            Some((_, conversation)) => {
                match conversation.try_lock() {
                    Ok(conversation) => info!(
                        connection_id,
                        turns = conversation.len(),
                        age_secs = (chrono::Utc::now() - conversation.created_at()).num_seconds(),
                        "Deleted conversation"
                    ),
                    Err(_) => info!(connection_id, "Deleted conversation (exchange in flight)"),
                }
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
