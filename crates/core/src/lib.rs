//! # chatweave Core
//!
//! Domain types, traits, and error definitions for the chatweave
//! conversation context engine. This crate has **no runtime dependencies**;
//! it defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator (message storage, secondary model calls,
//! tokenizer resources) is a trait here. Implementations live in their
//! respective crates. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod store;
pub mod tokenizer;

// Re-export key types at crate root for ergonomics
pub use error::{ContextError, Error, ProviderError, Result, StoreError, TokenizerError};
pub use message::{ConversationId, Message, MessageUpdate, PromptMessage, ROOT_PARENT_ID, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, Usage};
pub use store::MessageStore;
pub use tokenizer::{EncodingHandle, TokenizerBackend};
