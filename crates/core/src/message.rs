//! Message and conversation domain types.
//!
//! A conversation is a set of [`Message`]s forming a tree through
//! `parent_id`. Any single path from a leaf to the root is a *branch*: one
//! coherent chat history. The engine formats a branch into
//! [`PromptMessage`]s before budgeting it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parent id carried by the first message of a conversation.
pub const ROOT_PARENT_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn root_parent() -> String {
    ROOT_PARENT_ID.to_string()
}

/// A single persisted message in a conversation tree.
///
/// Immutable once saved, except for the token accounting fields that the
/// engine attaches after assembly (`token_count`, `refined_text`,
/// `refined_token_count`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    #[serde(alias = "messageId")]
    pub id: String,

    /// Owning conversation
    #[serde(alias = "conversationId")]
    pub conversation_id: ConversationId,

    /// Parent message ID, or [`ROOT_PARENT_ID`] for the first message
    #[serde(default = "root_parent", alias = "parentMessageId")]
    pub parent_id: String,

    /// Who wrote this message
    pub role: Role,

    /// Display label of the author ("User", "ChatGPT", ...)
    #[serde(default)]
    pub sender: String,

    /// The text content
    pub text: String,

    /// Token cost recorded by a previous assembly
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "tokenCount")]
    pub token_count: Option<usize>,

    /// Optional author name (charged separately by some models)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Summary that replaced this message and everything older
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "refinedMessageText")]
    pub refined_text: Option<String>,

    /// Token cost of `refined_text`
    #[serde(default, skip_serializing_if = "Option::is_none", alias = "refinedTokenCount")]
    pub refined_token_count: Option<usize>,

    /// Timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(conversation_id: &ConversationId, parent_id: Option<&str>, role: Role, text: String) -> Self {
        let sender = match role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        };
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            parent_id: parent_id.map(str::to_string).unwrap_or_else(root_parent),
            role,
            sender: sender.into(),
            text,
            token_count: None,
            name: None,
            refined_text: None,
            refined_token_count: None,
            created_at: Utc::now(),
        }
    }

    /// Create a new user message replying to `parent_id` (`None` = root).
    pub fn user(
        conversation_id: &ConversationId,
        parent_id: Option<&str>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(conversation_id, parent_id, Role::User, text.into())
    }

    /// Create a new assistant message replying to `parent_id`.
    pub fn assistant(
        conversation_id: &ConversationId,
        parent_id: Option<&str>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(conversation_id, parent_id, Role::Assistant, text.into())
    }

    /// Replace the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a cached token count.
    pub fn with_token_count(mut self, tokens: usize) -> Self {
        self.token_count = Some(tokens);
        self
    }

    /// The parent id, or `None` for a root message.
    pub fn parent(&self) -> Option<&str> {
        if self.parent_id.is_empty() || self.parent_id == ROOT_PARENT_ID {
            None
        } else {
            Some(&self.parent_id)
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }
}

/// Partial update written back to the store after assembly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_text: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refined_token_count: Option<usize>,
}

impl MessageUpdate {
    pub fn is_empty(&self) -> bool {
        self.token_count.is_none() && self.refined_text.is_none() && self.refined_token_count.is_none()
    }

    /// Apply the non-empty fields to `message`.
    pub fn apply_to(&self, message: &mut Message) {
        if let Some(tokens) = self.token_count {
            message.token_count = Some(tokens);
        }
        if let Some(ref text) = self.refined_text {
            message.refined_text = Some(text.clone());
        }
        if let Some(tokens) = self.refined_token_count {
            message.refined_token_count = Some(tokens);
        }
    }
}

/// A formatted payload element, ready to be sent to a model.
///
/// `token_count` and `source_id` are bookkeeping for the engine and are not
/// part of the wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,

    pub content: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip)]
    pub token_count: Option<usize>,

    /// Id of the persisted [`Message`] this element was formatted from.
    /// `None` for synthetic elements (instructions, refined summaries).
    #[serde(skip)]
    pub source_id: Option<String>,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            token_count: None,
            source_id: None,
        }
    }

    /// The synthetic instructions block: a system message named `instructions`
    /// whose content is prefixed with `Instructions:`.
    pub fn instructions(text: &str) -> Self {
        Self::new(Role::System, format!("Instructions:\n{}", text.trim()))
            .with_name("instructions")
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_token_count(mut self, tokens: usize) -> Self {
        self.token_count = Some(tokens);
        self
    }

    pub fn with_source(mut self, id: impl Into<String>) -> Self {
        self.source_id = Some(id.into());
        self
    }

    /// Token count, or zero when none was computed.
    pub fn tokens(&self) -> usize {
        self.token_count.unwrap_or(0)
    }
}
