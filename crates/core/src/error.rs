//! Error types for the chatweave domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all chatweave operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Context assembly errors ---
    #[error("Context error: {0}")]
    Context(#[from] ContextError),

    /// A fatal assembly error, annotated with the branch it was raised for.
    #[error("Assembly failed for conversation {conversation_id} at {leaf_id}: {source}")]
    Assembly {
        conversation_id: String,
        leaf_id: String,
        #[source]
        source: ContextError,
    },

    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Store errors ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Tokenizer errors ---
    #[error("Tokenizer error: {0}")]
    Tokenizer(#[from] TokenizerError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Errors raised while assembling a prompt from a conversation branch.
///
/// Everything except [`ContextError::RefinementFailed`] is fatal to the
/// assembly call. `RefinementFailed` is absorbed by the assembler and only
/// surfaces in logs.
#[derive(Debug, Clone, Error)]
pub enum ContextError {
    #[error("Malformed history: {reason} (at message {message_id})")]
    MalformedHistory { message_id: String, reason: String },

    #[error("Tokenization failed for encoding '{encoding}': {reason}")]
    TokenizationFailure { encoding: String, reason: String },

    #[error(
        "Message {message_id} needs {token_count} tokens, which alone exceeds the context budget of {max_context_tokens}"
    )]
    BudgetExceededBySingleMessage {
        message_id: String,
        token_count: usize,
        max_context_tokens: usize,
    },

    #[error("Refinement failed: {0}")]
    RefinementFailed(String),

    #[error("Invalid context configuration: {0}")]
    ConfigurationInvalid(String),
}

impl ContextError {
    /// Whether this error aborts an assembly call.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::RefinementFailed(_))
    }
}

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Message not found: {0}")]
    NotFound(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenizerError {
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("Failed to load encoding '{encoding}': {reason}")]
    LoadFailed { encoding: String, reason: String },

    #[error("Encoding '{0}' was released while in use")]
    Released(String),

    #[error("Encoding failed: {0}")]
    EncodeFailed(String),
}
