//! MessageStore trait — persistent storage for conversation messages.
//!
//! The engine reads a whole conversation before assembly and writes token
//! accounting back afterwards. It never deletes messages.

use crate::error::StoreError;
use crate::message::{ConversationId, Message, MessageUpdate};
use async_trait::async_trait;

/// The core MessageStore trait.
///
/// Implementations: in-memory (for testing), JSON-lines file.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// The backend name (e.g., "in_memory", "file").
    fn name(&self) -> &str;

    /// Store a new message. Returns its id.
    async fn save_message(&self, message: Message) -> std::result::Result<String, StoreError>;

    /// Load every message of a conversation, across all branches.
    async fn load_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> std::result::Result<Vec<Message>, StoreError>;

    /// Get a message by ID.
    async fn get_message(&self, id: &str) -> std::result::Result<Option<Message>, StoreError>;

    /// Apply a partial update to a stored message.
    async fn update_message(
        &self,
        id: &str,
        update: MessageUpdate,
    ) -> std::result::Result<(), StoreError>;
}
