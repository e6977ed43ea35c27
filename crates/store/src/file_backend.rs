//! File-based message store — persistent JSON-lines storage.
//!
//! Each line is a JSON-encoded [`Message`]. Records written by other tools in
//! camelCase (`messageId`, `parentMessageId`, `tokenCount`) are accepted.
//!
//! Default location: `~/.chatweave/messages.jsonl`

use async_trait::async_trait;
use chatweave_core::error::StoreError;
use chatweave_core::message::{ConversationId, Message, MessageUpdate};
use chatweave_core::store::MessageStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// A file-backed message store using JSONL (one message per line).
///
/// Messages are loaded into memory on creation and flushed to disk on every
/// mutation (save, update).
pub struct FileMessageStore {
    path: PathBuf,
    messages: Arc<RwLock<Vec<Message>>>,
}

impl FileMessageStore {
    /// Open the store at `path`.
    ///
    /// A missing file starts empty and is created on first write.
    pub fn new(path: PathBuf) -> Self {
        let messages = Self::load_from_disk(&path);
        debug!(path = %path.display(), count = messages.len(), "File message store loaded");
        Self {
            path,
            messages: Arc::new(RwLock::new(messages)),
        }
    }

    /// Default path: `~/.chatweave/messages.jsonl`
    pub fn default_path() -> PathBuf {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(".chatweave").join("messages.jsonl")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from_disk(path: &Path) -> Vec<Message> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str::<Message>(line) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(error = %e, "Skipping corrupted message record");
                    None
                }
            })
            .collect()
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let messages = self.messages.read().await;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StoreError::Storage(format!("Failed to create store directory: {e}"))
            })?;
        }

        let mut content = String::new();
        for message in messages.iter() {
            let line = serde_json::to_string(message).map_err(|e| {
                StoreError::Storage(format!("Failed to serialize message: {e}"))
            })?;
            content.push_str(&line);
            content.push('\n');
        }

        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to write message file: {e}")))
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn save_message(&self, mut message: Message) -> Result<String, StoreError> {
        if message.id.is_empty() {
            message.id = Uuid::new_v4().to_string();
        }
        let id = message.id.clone();
        self.messages.write().await.push(message);
        self.flush().await?;
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
        {
            let mut messages = self.messages.write().await;
            let message = messages
                .iter_mut()
                .find(|m| m.id == id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            update.apply_to(message);
        }
        self.flush().await
    }
}
