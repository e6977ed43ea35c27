//! LLM Provider implementations for chatweave.
//!
//! All providers implement the `chatweave_core::Provider` trait. The engine
//! only needs them for the refinement step.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
