//! Token accounting.
//!
//! A [`TokenCounter`] turns text and formatted messages into token counts.
//! Message counts carry the chat-format overhead of the target model: a fixed
//! charge per message plus an adjustment when a `name` is attached.
//!
//! [`CachedTokenCounter`] is the production counter. It draws encodings from
//! a shared [`TokenizerCache`] and recovers from a released or broken encoder
//! by resetting the cache and retrying once.

pub mod cache;
pub mod heuristic;
pub mod tiktoken;

pub use cache::TokenizerCache;
pub use heuristic::{HeuristicBackend, estimate_tokens};
pub use tiktoken::TiktokenBackend;

use chatweave_config::{AppConfig, TokenizerKind};
use chatweave_core::error::{ContextError, TokenizerError};
use chatweave_core::message::{PromptMessage, Role};
use chatweave_core::tokenizer::{EncodingHandle, TokenizerBackend};
use std::sync::Arc;
use tracing::warn;

/// Per-message chat formatting overhead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageOverhead {
    pub tokens_per_message: i64,
    pub tokens_per_name: i64,
}

impl Default for MessageOverhead {
    fn default() -> Self {
        Self {
            tokens_per_message: 3,
            tokens_per_name: 1,
        }
    }
}

impl MessageOverhead {
    /// Overhead constants for `model`.
    ///
    /// `gpt-3.5-turbo-0301` wraps every message in `<|start|>{role}\n...<|end|>\n`
    /// and drops the role when a name is present.
    pub fn for_model(model: &str) -> Self {
        if model.contains("gpt-3.5-turbo-0301") {
            Self {
                tokens_per_message: 4,
                tokens_per_name: -1,
            }
        } else {
            Self::default()
        }
    }
}

/// Maps text or messages to token counts.
///
/// Counting is deterministic for a given configuration.
pub trait TokenCounter: Send + Sync {
    /// Raw token count of `text`.
    fn count_text(&self, text: &str) -> Result<usize, ContextError>;

    fn overhead(&self) -> MessageOverhead {
        MessageOverhead::default()
    }

    /// Token cost of one formatted message, overhead included.
    fn count_message(&self, message: &PromptMessage) -> Result<usize, ContextError> {
        message_tokens(self.overhead(), message, |text| self.count_text(text))
    }

    /// Completion tokens for a generated reply.
    fn count_response(&self, text: &str) -> Result<usize, ContextError> {
        self.count_message(&PromptMessage::new(Role::Assistant, text))
    }
}

/// `tokens_per_message + role + content (+ name + tokens_per_name)`, floored
/// at zero.
fn message_tokens<E>(
    overhead: MessageOverhead,
    message: &PromptMessage,
    mut count: impl FnMut(&str) -> Result<usize, E>,
) -> Result<usize, E> {
    let mut total = overhead.tokens_per_message;
    total += count(message.role.as_str())? as i64;
    total += count(&message.content)? as i64;

    if let Some(ref name) = message.name {
        total += count(name)? as i64;
        total += overhead.tokens_per_name;
    }

    Ok(total.max(0) as usize)
}

/// Encoding used for `model`: completion-era models keep `p50k_base`, chat
/// models use `cl100k_base`.
pub fn encoding_for_model(model: &str) -> &'static str {
    if model.starts_with("text-davinci") || model.starts_with("code-davinci") {
        "p50k_base"
    } else {
        "cl100k_base"
    }
}

/// Backend selected by configuration.
pub fn backend_for(kind: TokenizerKind) -> Arc<dyn TokenizerBackend> {
    match kind {
        TokenizerKind::Tiktoken => Arc::new(TiktokenBackend::new()),
        TokenizerKind::Heuristic => Arc::new(HeuristicBackend::new()),
    }
}

/// Token counter backed by a shared [`TokenizerCache`].
#[derive(Debug, Clone)]
pub struct CachedTokenCounter {
    cache: Arc<TokenizerCache>,
    encoding: String,
    overhead: MessageOverhead,
}

impl CachedTokenCounter {
    pub fn new(cache: Arc<TokenizerCache>, encoding: impl Into<String>) -> Self {
        Self {
            cache,
            encoding: encoding.into(),
            overhead: MessageOverhead::default(),
        }
    }

    /// Counter for `model`, honoring an explicit encoding override.
    pub fn for_model(cache: Arc<TokenizerCache>, model: &str, encoding: Option<&str>) -> Self {
        let encoding = encoding.unwrap_or_else(|| encoding_for_model(model));
        Self::new(cache, encoding).with_overhead(MessageOverhead::for_model(model))
    }

    /// Counter described by the `[tokenizer]` and `[context]` sections.
    pub fn from_config(config: &AppConfig) -> Self {
        let cache = TokenizerCache::new(
            backend_for(config.tokenizer.backend),
            config.tokenizer.reset_after_calls,
        );
        Self::for_model(
            Arc::new(cache),
            &config.context.model,
            config.tokenizer.encoding.as_deref(),
        )
    }

    pub fn with_overhead(mut self, overhead: MessageOverhead) -> Self {
        self.overhead = overhead;
        self
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn cache(&self) -> &Arc<TokenizerCache> {
        &self.cache
    }

    /// Run `op` against the cached encoder, resetting the cache and retrying
    /// once if the encoder was released or broken.
    fn with_encoder<T>(
        &self,
        op: impl Fn(&dyn EncodingHandle) -> Result<T, TokenizerError>,
    ) -> Result<T, ContextError> {
        let attempt = || op(&*self.cache.get(&self.encoding)?);
        match attempt() {
            Ok(value) => Ok(value),
            Err(first) => {
                warn!(
                    encoding = %self.encoding,
                    error = %first,
                    "Tokenizer unavailable, resetting encoders and retrying"
                );
                self.cache.reset();
                attempt().map_err(|e| ContextError::TokenizationFailure {
                    encoding: self.encoding.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl TokenCounter for CachedTokenCounter {
    fn count_text(&self, text: &str) -> Result<usize, ContextError> {
        self.with_encoder(|handle| handle.count(text))
    }

    /// One cache lookup per message, so the periodic reset tracks messages
    /// rather than text fragments.
    fn count_message(&self, message: &PromptMessage) -> Result<usize, ContextError> {
        self.with_encoder(|handle| message_tokens(self.overhead, message, |text| handle.count(text)))
    }

    fn overhead(&self) -> MessageOverhead {
        self.overhead
    }
}
