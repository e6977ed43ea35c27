//! Tokenizer backend traits.
//!
//! A backend turns an encoding name into a loaded [`EncodingHandle`]. Handles
//! are expensive resources, so the engine caches them and releases them
//! explicitly; a handle that has been released must report
//! [`TokenizerError::Released`] instead of encoding.

use crate::error::TokenizerError;
use std::sync::Arc;

/// A loaded encoding resource.
pub trait EncodingHandle: Send + Sync {
    /// Encoding name (e.g., "cl100k_base").
    fn encoding(&self) -> &str;

    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> Result<usize, TokenizerError>;

    /// Free the underlying resource. Later `count` calls fail with
    /// [`TokenizerError::Released`].
    fn release(&self);

    fn is_released(&self) -> bool;
}

/// Supplies encodings by name.
pub trait TokenizerBackend: Send + Sync {
    /// The backend name (e.g., "tiktoken", "heuristic").
    fn name(&self) -> &str;

    /// Load the named encoding (or model name).
    fn load(&self, encoding: &str) -> Result<Arc<dyn EncodingHandle>, TokenizerError>;
}
