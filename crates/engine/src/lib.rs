//! The chatweave context engine.
//!
//! Turns a parent-pointer message tree into a prompt that fits the target
//! model's context window:
//!
//! 1. **Linearize** the branch ending at a leaf message
//! 2. **Count** every message with the model's chat-format overhead
//! 3. **Fit** the newest messages into the budget
//! 4. **Refine** overflow into a summary, or discard it
//! 5. **Account** the tokens charged per message and persist them
//!
//! The engine holds no process-wide state of its own: the tokenizer cache
//! is an explicit object owned by whoever composes the engine.

pub mod context;
pub mod refine;
pub mod session;
pub mod tokens;

pub use context::{
    AssembledContext, BudgetLedger, ContextAssembler, FitResult, FormatOptions, MessageArena,
    PRIMING_TOKENS, RefinedEntry, TokenCountMap,
};
pub use refine::{OverflowRefiner, ProviderRefiner, RefineError, TextSplitter};
pub use session::{ContextSession, PreparedPrompt};
pub use tokens::{CachedTokenCounter, MessageOverhead, TokenCounter, TokenizerCache};

#[cfg(test)]
pub(crate) mod test_helpers;
