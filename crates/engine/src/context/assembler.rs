//! Context assembly pipeline: the orchestration of one prompt.
//!
//! 1. **Linearize** the branch ending at the leaf
//! 2. **Format** each message and reuse cached token counts
//! 3. **Inject** the instructions block before the newest message
//! 4. **Fit** the sequence into the context budget
//! 5. **Refine** overflow into a summary spliced at the front (refine only)
//! 6. **Account** the tokens charged per surviving message
//!
//! # Determinism
//!
//! Identical inputs produce identical payloads. The only non-deterministic
//! step is the refiner, and its failure never aborts the assembly.

use super::fitter::{self, FitResult};
use super::linearizer::MessageArena;
use crate::refine::OverflowRefiner;
use crate::tokens::TokenCounter;
use chatweave_config::{ContextSettings, ContextStrategy, FormatConfig};
use chatweave_core::error::ContextError;
use chatweave_core::message::{Message, PromptMessage, Role};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Emit at `debug` when diagnostics are switched on, `trace` otherwise.
macro_rules! diag {
    ($on:expr, $($arg:tt)+) => {
        if $on {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    };
}

// ── Types ─────────────────────────────────────────────────────────────────

/// Names attached to formatted messages, per role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatOptions {
    pub user_name: Option<String>,
    pub assistant_name: Option<String>,
}

impl From<&FormatConfig> for FormatOptions {
    fn from(config: &FormatConfig) -> Self {
        Self {
            user_name: config.user_name.clone(),
            assistant_name: config.assistant_name.clone(),
        }
    }
}

impl FormatOptions {
    /// Format a stored message, carrying over its cached token count.
    pub fn format(&self, message: &Message) -> PromptMessage {
        let name = match message.role {
            Role::User => self.user_name.clone(),
            Role::Assistant => self.assistant_name.clone(),
            Role::System => None,
        }
        .or_else(|| message.name.clone());

        PromptMessage {
            role: message.role,
            content: message.text.clone(),
            name,
            token_count: message.token_count,
            source_id: Some(message.id.clone()),
        }
    }
}

/// Summary metadata recorded against the message it stands in for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefinedEntry {
    pub message_id: String,
    pub content: String,
    pub token_count: usize,
}

/// Tokens charged per message in the final payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenCountMap {
    /// Message id → tokens charged for it. The message a summary stands in
    /// for is recorded only through `refined`.
    pub counts: BTreeMap<String, usize>,
    /// The refined summary, keyed to the newest message it replaced.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refined: Option<RefinedEntry>,
    /// The instructions block, when one was sent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<usize>,
}

impl TokenCountMap {
    pub fn get(&self, message_id: &str) -> Option<usize> {
        self.counts.get(message_id).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// The assembled prompt, ready for a completion call.
#[derive(Debug, Clone, Serialize)]
pub struct AssembledContext {
    /// Messages to send, oldest first.
    pub payload: Vec<PromptMessage>,
    pub token_count_map: TokenCountMap,
    /// `max_context_tokens - remaining_context_tokens`.
    pub prompt_tokens: usize,
    pub remaining_context_tokens: usize,
    /// The instructions-augmented branch, trimmed to what the payload
    /// represents directly or through the summary.
    pub messages: Vec<PromptMessage>,
}

/// Place `instructions` immediately before the newest message.
pub fn add_instructions(
    mut messages: Vec<PromptMessage>,
    instructions: Option<PromptMessage>,
) -> Vec<PromptMessage> {
    let Some(instructions) = instructions else {
        return messages;
    };
    match messages.pop() {
        Some(last) => {
            messages.push(instructions);
            messages.push(last);
        }
        None => messages.push(instructions),
    }
    messages
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless across calls; create one and reuse it.
pub struct ContextAssembler {
    settings: ContextSettings,
    counter: Arc<dyn TokenCounter>,
    refiner: Option<Arc<dyn OverflowRefiner>>,
    format: FormatOptions,
}

impl ContextAssembler {
    /// Fails with [`ContextError::ConfigurationInvalid`] when the refine
    /// strategy has no refiner or the budget cannot hold the priming tokens.
    pub fn new(
        settings: ContextSettings,
        counter: Arc<dyn TokenCounter>,
        refiner: Option<Arc<dyn OverflowRefiner>>,
    ) -> Result<Self, ContextError> {
        fitter::BudgetLedger::primed(settings.max_context_tokens())?;

        if settings.strategy() == ContextStrategy::Refine && refiner.is_none() {
            return Err(ContextError::ConfigurationInvalid(
                "refine strategy requires a refiner".into(),
            ));
        }

        Ok(Self {
            settings,
            counter,
            refiner,
            format: FormatOptions::default(),
        })
    }

    pub fn with_format(mut self, format: FormatOptions) -> Self {
        self.format = format;
        self
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub fn counter(&self) -> &Arc<dyn TokenCounter> {
        &self.counter
    }

    /// Format the branch ending at `leaf_id`, oldest first.
    pub fn format_branch(
        &self,
        arena: &MessageArena,
        leaf_id: Option<&str>,
    ) -> Result<Vec<PromptMessage>, ContextError> {
        arena.linearize_with(leaf_id, |message| self.format.format(message))
    }

    /// Attach token counts to messages that do not carry one yet.
    pub fn count_missing(&self, messages: &mut [PromptMessage]) -> Result<(), ContextError> {
        for message in messages.iter_mut().filter(|m| m.token_count.is_none()) {
            message.token_count = Some(self.counter.count_message(message)?);
        }
        Ok(())
    }

    /// The counted instructions block, or `None` for blank text.
    pub fn instructions_block(
        &self,
        instructions: Option<&str>,
    ) -> Result<Option<PromptMessage>, ContextError> {
        let Some(text) = instructions.filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };
        let mut block = PromptMessage::instructions(text);
        block.token_count = Some(self.counter.count_message(&block)?);
        Ok(Some(block))
    }

    /// Assemble the prompt for the branch ending at `leaf_id`.
    pub async fn assemble(
        &self,
        arena: &MessageArena,
        leaf_id: Option<&str>,
        instructions: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AssembledContext, ContextError> {
        let ordered = self.format_branch(arena, leaf_id)?;
        self.assemble_ordered(ordered, instructions, cancel).await
    }

    /// Assemble from an already ordered (oldest → newest) sequence.
    pub async fn assemble_ordered(
        &self,
        mut ordered: Vec<PromptMessage>,
        instructions: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<AssembledContext, ContextError> {
        let debug = self.settings.debug();
        let max_context_tokens = self.settings.max_context_tokens();

        self.count_missing(&mut ordered)?;
        let instructions = self.instructions_block(instructions)?;
        let augmented = add_instructions(ordered, instructions);

        let FitResult {
            context,
            mut remaining_context_tokens,
            messages_to_refine,
            refine_index,
        } = fitter::fit(&augmented, max_context_tokens, self.settings.strategy())?;

        diag!(
            debug,
            augmented = augmented.len(),
            kept = context.len(),
            to_refine = messages_to_refine.len(),
            remaining_context_tokens,
            max_context_tokens,
            "Fitted history into context budget"
        );

        let mut payload = context;
        let mut refined_entry = None;
        let mut spliced = false;

        if !messages_to_refine.is_empty() {
            if let Some(refined) = self
                .refine_overflow(&messages_to_refine, remaining_context_tokens, cancel)
                .await
            {
                let tokens = refined.tokens();
                let boundary = refine_index.and_then(|i| augmented.get(i));
                refined_entry = boundary
                    .and_then(|m| m.source_id.clone())
                    .map(|message_id| RefinedEntry {
                        message_id,
                        content: refined.content.clone(),
                        token_count: tokens,
                    });
                remaining_context_tokens -= tokens;
                payload.insert(0, refined);
                spliced = true;

                diag!(
                    debug,
                    refined_tokens = tokens,
                    remaining_context_tokens,
                    "Spliced refined summary"
                );
            }
        }

        // Everything before `diff` is represented neither directly nor by
        // the summary.
        let diff = augmented.len() - payload.len();
        let messages: Vec<PromptMessage> = augmented.into_iter().skip(diff).collect();

        let mut token_count_map = TokenCountMap {
            refined: refined_entry,
            ..TokenCountMap::default()
        };
        // With a summary spliced in, the first kept message is the one it
        // replaced and was never charged.
        for message in messages.iter().skip(usize::from(spliced)) {
            match message.source_id {
                Some(ref id) => {
                    token_count_map.counts.insert(id.clone(), message.tokens());
                }
                None => token_count_map.instructions = message.token_count,
            }
        }

        let prompt_tokens = max_context_tokens - remaining_context_tokens;

        diag!(
            debug,
            diff,
            prompt_tokens,
            remaining_context_tokens,
            token_count_map = ?token_count_map,
            "Assembled context"
        );

        Ok(AssembledContext {
            payload,
            token_count_map,
            prompt_tokens,
            remaining_context_tokens,
            messages,
        })
    }

    /// Run the refiner, absorbing every failure.
    async fn refine_overflow(
        &self,
        messages: &[PromptMessage],
        remaining_context_tokens: usize,
        cancel: &CancellationToken,
    ) -> Option<PromptMessage> {
        let Some(ref refiner) = self.refiner else {
            return None;
        };

        let mut refined = match refiner.refine(messages, remaining_context_tokens, cancel).await {
            Ok(refined) => refined,
            Err(e) => {
                let err = ContextError::RefinementFailed(e.to_string());
                warn!(error = %err, messages = messages.len(), "Omitting refined history");
                return None;
            }
        };

        refined.role = Role::Assistant;
        refined.source_id = None;
        if refined.token_count.is_none() {
            match self.counter.count_message(&refined) {
                Ok(tokens) => refined.token_count = Some(tokens),
                Err(e) => {
                    warn!(error = %e, "Could not count refined summary, omitting it");
                    return None;
                }
            }
        }

        if refined.tokens() > remaining_context_tokens {
            warn!(
                refined_tokens = refined.tokens(),
                remaining_context_tokens, "Refined summary does not fit, omitting it"
            );
            return None;
        }

        Some(refined)
    }
}
