//! In-memory store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chatweave_core::error::StoreError;
use chatweave_core::message::{ConversationId, Message, MessageUpdate};
use chatweave_core::store::MessageStore;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// An in-memory store that keeps messages in a Vec, in insertion order.
pub struct InMemoryMessageStore {
    messages: Arc<RwLock<Vec<Message>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create a store pre-populated with `messages`.
    pub fn with_messages(messages: Vec<Message>) -> Self {
        Self {
            messages: Arc::new(RwLock::new(messages)),
        }
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn save_message(&self, mut message: Message) -> Result<String, StoreError> {
        if message.id.is_empty() {
            message.id = Uuid::new_v4().to_string();
        }
        let id = message.id.clone();
        self.messages.write().await.push(message);
        Ok(id)
    }

    async fn load_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| &m.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|m| m.id == id).cloned())
    }

    async fn update_message(&self, id: &str, update: MessageUpdate) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        update.apply_to(message);
        Ok(())
    }
}
