//! Conversation context assembly.
//!
//! | Stage | Module | Output |
//! |-------|--------|--------|
//! | Linearize | [`linearizer`] | Branch, oldest → newest |
//! | Fit | [`fitter`] | Kept suffix, overflow, remaining budget |
//! | Assemble | [`assembler`] | Payload, token-count map, prompt tokens |

pub mod assembler;
pub mod fitter;
pub mod linearizer;

pub use assembler::{
    AssembledContext, ContextAssembler, FormatOptions, RefinedEntry, TokenCountMap,
    add_instructions,
};
pub use fitter::{BudgetLedger, FitResult, PRIMING_TOKENS, fit};
pub use linearizer::MessageArena;
