//! Load → assemble → persist flow for one completion request.
//!
//! The session loads a conversation from the [`MessageStore`], assembles the
//! prompt for one branch, and writes the discovered token counts (and the
//! refined summary, if any) back to the stored messages.

use crate::context::{AssembledContext, ContextAssembler, FormatOptions, MessageArena, TokenCountMap};
use crate::refine::{OverflowRefiner, ProviderRefiner};
use crate::tokens::{CachedTokenCounter, TokenCounter};
use chatweave_config::{AppConfig, ContextStrategy};
use chatweave_core::error::{ContextError, Error, StoreError};
use chatweave_core::message::{ConversationId, MessageUpdate, PromptMessage};
use chatweave_core::provider::Provider;
use chatweave_core::store::MessageStore;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A prompt ready to send, with its accounting.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedPrompt {
    pub payload: Vec<PromptMessage>,
    pub token_count_map: TokenCountMap,
    pub prompt_tokens: usize,
    pub messages: Vec<PromptMessage>,
    /// Stored messages updated with new token accounting.
    pub persisted: usize,
}

pub struct ContextSession {
    store: Arc<dyn MessageStore>,
    assembler: ContextAssembler,
}

impl ContextSession {
    pub fn new(store: Arc<dyn MessageStore>, assembler: ContextAssembler) -> Self {
        Self { store, assembler }
    }

    /// Wire a session from configuration.
    ///
    /// `provider` backs the refiner; it is only required by the refine
    /// strategy.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn MessageStore>,
        provider: Option<Arc<dyn Provider>>,
    ) -> Result<Self, ContextError> {
        let settings = config.context.resolve()?;
        let counter: Arc<dyn TokenCounter> = Arc::new(CachedTokenCounter::from_config(config));

        let refiner = match (settings.strategy(), provider) {
            (ContextStrategy::Refine, Some(provider)) => Some(Arc::new(ProviderRefiner::new(
                provider,
                Arc::clone(&counter),
                &config.refiner,
            )) as Arc<dyn OverflowRefiner>),
            _ => None,
        };

        let assembler = ContextAssembler::new(settings, counter, refiner)?
            .with_format(FormatOptions::from(&config.format));
        Ok(Self::new(store, assembler))
    }

    pub fn assembler(&self) -> &ContextAssembler {
        &self.assembler
    }

    /// Assemble the prompt for the branch ending at `leaf_id` and persist the
    /// token accounting.
    ///
    /// Fatal assembly errors are returned as [`Error::Assembly`] carrying the
    /// conversation and leaf ids.
    pub async fn prepare(
        &self,
        conversation_id: &ConversationId,
        leaf_id: Option<&str>,
        instructions: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<PreparedPrompt, Error> {
        let arena = MessageArena::new(self.store.load_conversation(conversation_id).await?);
        debug!(
            conversation_id = %conversation_id,
            leaf_id = leaf_id.unwrap_or_default(),
            messages = arena.len(),
            "Loaded conversation"
        );

        let AssembledContext {
            payload,
            token_count_map,
            prompt_tokens,
            messages,
            ..
        } = self
            .assembler
            .assemble(&arena, leaf_id, instructions, cancel)
            .await
            .map_err(|source| Error::Assembly {
                conversation_id: conversation_id.to_string(),
                leaf_id: leaf_id.unwrap_or_default().to_string(),
                source,
            })?;

        let persisted = self.persist(&arena, &messages, &token_count_map).await?;

        info!(
            conversation_id = %conversation_id,
            payload = payload.len(),
            prompt_tokens,
            persisted,
            refined = token_count_map.refined.is_some(),
            "Prepared prompt"
        );

        Ok(PreparedPrompt {
            payload,
            token_count_map,
            prompt_tokens,
            messages,
            persisted,
        })
    }

    /// Write counts for messages that had none, and the refined summary onto
    /// the message it replaces.
    async fn persist(
        &self,
        arena: &MessageArena,
        messages: &[PromptMessage],
        map: &TokenCountMap,
    ) -> Result<usize, StoreError> {
        let mut persisted = 0;

        for formatted in messages {
            let (Some(id), Some(tokens)) = (formatted.source_id.as_deref(), formatted.token_count) else {
                continue;
            };
            let Some(message) = arena.get(id) else {
                continue;
            };

            let update = match map.refined {
                Some(ref refined) if refined.message_id == id => MessageUpdate {
                    token_count: Some(tokens),
                    refined_text: Some(refined.content.clone()),
                    refined_token_count: Some(refined.token_count),
                },
                _ if message.token_count.is_none() => MessageUpdate {
                    token_count: Some(tokens),
                    ..MessageUpdate::default()
                },
                _ => continue,
            };

            debug!(message_id = %id, ?update, "Persisting token accounting");
            self.store.update_message(id, update).await?;
            persisted += 1;
        }

        Ok(persisted)
    }
}
