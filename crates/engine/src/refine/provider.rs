//! Provider-backed refinement.
//!
//! Overflow is grouped into user and non-user text, split into headed chunks,
//! and folded into one summary: the first chunk is summarized, every further
//! chunk refines the running summary. Each step is one `complete` call racing
//! the caller's cancellation token.

use super::splitter::TextSplitter;
use super::{OverflowRefiner, RefineError};
use crate::tokens::TokenCounter;
use async_trait::async_trait;
use chatweave_config::RefinerConfig;
use chatweave_core::message::{PromptMessage, Role};
use chatweave_core::provider::{Provider, ProviderRequest};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const USER_HEADER: &str = "DOCUMENT NAME: User Message\n\n---\n\n";
const ASSISTANT_HEADER: &str = "DOCUMENT NAME: Assistant Message\n\n---\n\n";
const TRUNCATION_MARKER: &str = "\n...[truncated]...\n";

fn initial_prompt(text: &str) -> String {
    format!("Write a concise summary of the following:\n\n\n\"{text}\"\n\n\nCONCISE SUMMARY:")
}

fn refine_prompt(summary: &str, text: &str) -> String {
    format!(
        "Your job is to produce a final summary of a conversation.\n\
         We have provided an existing summary up to a certain point: \"{summary}\"\n\
         We have the opportunity to refine the existing summary (only if needed) \
         with some more context below.\n\
         ------------\n\
         {text}\n\
         ------------\n\
         Given the new context, refine the original summary, keeping names, facts \
         and open questions. If the context isn't useful, return the original summary.\n\
         REFINED SUMMARY:"
    )
}

/// `"{name or role}:\n{content}\n\n"` per message.
pub fn concatenate_messages<'a>(messages: impl IntoIterator<Item = &'a PromptMessage>) -> String {
    messages
        .into_iter()
        .map(|m| {
            let label = m.name.as_deref().unwrap_or(m.role.as_str());
            format!("{label}:\n{}\n\n", m.content)
        })
        .collect()
}

/// Summarizes overflow through a secondary model.
pub struct ProviderRefiner {
    provider: Arc<dyn Provider>,
    counter: Arc<dyn TokenCounter>,
    splitter: TextSplitter,
    model: String,
    temperature: f32,
    max_input_tokens: usize,
}

impl ProviderRefiner {
    pub fn new(
        provider: Arc<dyn Provider>,
        counter: Arc<dyn TokenCounter>,
        config: &RefinerConfig,
    ) -> Self {
        Self {
            provider,
            counter,
            splitter: TextSplitter::new(config.chunk_size, config.chunk_overlap),
            model: config.model.clone(),
            temperature: config.temperature,
            max_input_tokens: config.input_token_limit(),
        }
    }

    /// Headed chunks: user text first, then everything else.
    pub fn documents(&self, messages: &[PromptMessage]) -> Vec<String> {
        let (user, other): (Vec<&PromptMessage>, Vec<&PromptMessage>) =
            messages.iter().partition(|m| m.role == Role::User);

        let mut docs = Vec::new();
        for (group, header) in [(user, USER_HEADER), (other, ASSISTANT_HEADER)] {
            if group.is_empty() {
                continue;
            }
            let text = concatenate_messages(group);
            docs.extend(self.splitter.create_documents(&text, header));
        }
        docs
    }

    /// Keep the trailing documents that fit the summary model's input cap.
    /// When not even one fits, the last document is cut to its head and
    /// tail.
    fn fit_input(&self, docs: Vec<String>) -> Result<Vec<String>, RefineError> {
        let mut total = 0usize;
        let mut counts = Vec::with_capacity(docs.len());
        for doc in &docs {
            let tokens = self.counter.count_text(doc)?;
            total += tokens;
            counts.push(tokens);
        }

        if total <= self.max_input_tokens {
            return Ok(docs);
        }

        let mut budget = self.max_input_tokens;
        let mut keep_from = docs.len();
        for (i, &tokens) in counts.iter().enumerate().rev() {
            if tokens > budget {
                break;
            }
            budget -= tokens;
            keep_from = i;
        }

        if keep_from < docs.len() {
            debug!(
                dropped = keep_from,
                kept = docs.len() - keep_from,
                "Refinement input over limit, dropping leading chunks"
            );
            return Ok(docs.into_iter().skip(keep_from).collect());
        }

        let Some(last) = docs.last() else {
            return Err(RefineError::Empty);
        };
        let tokens = counts.last().copied().unwrap_or(1).max(1);
        Ok(vec![truncate_middle(last, self.max_input_tokens, tokens)])
    }

    async fn complete(&self, prompt: String, cancel: &CancellationToken) -> Result<String, RefineError> {
        let request = ProviderRequest::new(
            self.model.clone(),
            vec![PromptMessage::new(Role::User, prompt)],
        )
        .with_temperature(self.temperature);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(RefineError::Cancelled),
            response = self.provider.complete(request) => Ok(response?.message.content),
        }
    }
}

/// Keep roughly `limit / tokens` of `text`, split between head and tail.
fn truncate_middle(text: &str, limit: usize, tokens: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    let keep = chars.len() * limit / tokens * 9 / 10;
    let head = keep / 2;
    let tail = keep - head;
    let head_text: String = chars[..head].iter().collect();
    let tail_text: String = chars[chars.len() - tail..].iter().collect();
    format!("{head_text}{TRUNCATION_MARKER}{tail_text}")
}

#[async_trait]
impl OverflowRefiner for ProviderRefiner {
    async fn refine(
        &self,
        messages: &[PromptMessage],
        remaining_context_tokens: usize,
        cancel: &CancellationToken,
    ) -> Result<PromptMessage, RefineError> {
        if cancel.is_cancelled() {
            return Err(RefineError::Cancelled);
        }

        let docs = self.fit_input(self.documents(messages))?;
        let mut chunks = docs.into_iter();
        let first = chunks.next().ok_or(RefineError::Empty)?;

        debug!(
            provider = self.provider.name(),
            messages = messages.len(),
            chunks = chunks.len() + 1,
            "Refining overflow"
        );

        let mut summary = self.complete(initial_prompt(&first), cancel).await?;
        for chunk in chunks {
            summary = self.complete(refine_prompt(&summary, &chunk), cancel).await?;
        }

        let summary = summary.trim();
        if summary.is_empty() {
            warn!(provider = self.provider.name(), "Summary provider returned empty text");
            return Err(RefineError::Empty);
        }

        let mut refined = PromptMessage::new(Role::Assistant, summary);
        let tokens = self.counter.count_message(&refined)?;
        refined.token_count = Some(tokens);

        debug!(
            tokens,
            remaining_context_tokens,
            after_refining = remaining_context_tokens as i64 - tokens as i64,
            "Refined overflow"
        );
        Ok(refined)
    }
}
