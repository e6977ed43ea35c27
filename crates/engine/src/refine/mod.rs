//! Overflow refinement.
//!
//! When the fitter routes history to refinement, an [`OverflowRefiner`]
//! condenses it into a single assistant message with its own token count.
//! Refinement is best-effort: the assembler treats any error, cancellation
//! included, as a soft failure and leaves the summary out.

pub mod provider;
pub mod splitter;

pub use provider::ProviderRefiner;
pub use splitter::TextSplitter;

use async_trait::async_trait;
use chatweave_core::error::{ContextError, ProviderError};
use chatweave_core::message::PromptMessage;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RefineError {
    #[error("refinement cancelled")]
    Cancelled,

    #[error("summary provider failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("nothing to summarize or empty summary")]
    Empty,

    #[error("could not count summary tokens: {0}")]
    Counting(#[from] ContextError),
}

/// Condenses overflowing history into one summary message.
#[async_trait]
pub trait OverflowRefiner: Send + Sync {
    /// Summarize `messages` (oldest first). The returned message has role
    /// assistant and a token count attached.
    async fn refine(
        &self,
        messages: &[PromptMessage],
        remaining_context_tokens: usize,
        cancel: &CancellationToken,
    ) -> Result<PromptMessage, RefineError>;
}
