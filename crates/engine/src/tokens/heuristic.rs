//! Character-based token estimation.
//!
//! Heuristic: ~4 characters per token, rounded up. Accurate within ~10% for
//! BPE tokenizers on English text, needs no resources, and keeps test
//! budgets predictable.

use chatweave_core::error::TokenizerError;
use chatweave_core::tokenizer::{EncodingHandle, TokenizerBackend};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// Backend that serves the same estimator under any encoding name.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicBackend;

impl HeuristicBackend {
    pub fn new() -> Self {
        Self
    }
}

impl TokenizerBackend for HeuristicBackend {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn load(&self, encoding: &str) -> Result<Arc<dyn EncodingHandle>, TokenizerError> {
        Ok(Arc::new(HeuristicHandle {
            encoding: encoding.to_string(),
            released: AtomicBool::new(false),
        }))
    }
}

struct HeuristicHandle {
    encoding: String,
    released: AtomicBool,
}

impl EncodingHandle for HeuristicHandle {
    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        if self.is_released() {
            return Err(TokenizerError::Released(self.encoding.clone()));
        }
        Ok(estimate_tokens(text))
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}
