//! # Dialogue Module
//!
//! Produces the assistant's reply for a filtered user utterance and keeps
//! the conversation history consistent while doing so.
//!
//! ## Key Components:
//! - **ChatCompletion**: Seam for the remote chat-completion call
//! - **OpenAiClient**: `POST {api_base}/chat/completions` implementation
//! - **DialogueGenerator**: Appends turns and recovers failures with a fallback reply
//!
//! ## Failure behavior:
//! When the chat service fails the user turn stays in the history, no
//! assistant turn is added, and the configured fallback reply is returned
//! with `fallback = true`.

pub mod openai;

pub use openai::OpenAiClient;

use crate::conversation::{SharedConversation, Turn};
use crate::error::DialogueError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Remote chat-completion service.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    /// Reply text for the full turn list, system turn first.
    async fn complete(&self, turns: &[Turn]) -> Result<String, DialogueError>;
}

/// What the generator hands back to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogueReply {
    pub text: String,
    /// The chat service failed and `text` is the fallback reply
    pub fallback: bool,
}

pub struct DialogueGenerator {
    client: Arc<dyn ChatCompletion>,
    fallback_reply: String,
    timeout: Duration,
}

impl DialogueGenerator {
    pub fn new(client: Arc<dyn ChatCompletion>, fallback_reply: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            fallback_reply: fallback_reply.into(),
            timeout,
        }
    }

    /// Append `user_text`, ask the chat service, append its answer.
    ///
    /// The conversation lock is held for the whole exchange so two messages
    /// on one connection cannot interleave their turns.
    pub async fn respond(&self, conversation: &SharedConversation, user_text: &str) -> DialogueReply {
        let mut conversation = conversation.lock().await;
        conversation.push_user(user_text);

        let result = match tokio::time::timeout(self.timeout, self.client.complete(conversation.turns())).await {
            Ok(result) => result,
            Err(_) => Err(DialogueError::Timeout(self.timeout)),
        };

        match result.map(|text| text.trim().to_string()) {
            Ok(text) if !text.is_empty() => {
                conversation.push_assistant(text.clone());
                debug!(turns = conversation.len(), "Assistant reply appended");
                DialogueReply { text, fallback: false }
            }
            Ok(_) => self.fallback(DialogueError::EmptyResponse),
            Err(e) => self.fallback(e),
        }
    }

    fn fallback(&self, err: DialogueError) -> DialogueReply {
        error!("Chat completion failed, using fallback reply: {}", err);
        DialogueReply {
            text: self.fallback_reply.clone(),
            fallback: true,
        }
    }
}
