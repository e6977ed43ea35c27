//! `chatweave assemble` — Build the prompt payload for a branch.

use chatweave_config::{AppConfig, ContextStrategy};
use chatweave_core::message::ConversationId;
use chatweave_core::provider::Provider;
use chatweave_core::store::MessageStore;
use chatweave_engine::ContextSession;
use chatweave_providers::OpenAiCompatProvider;
use chatweave_store::{FileMessageStore, InMemoryMessageStore};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct AssembleArgs {
    pub thread: PathBuf,
    pub conversation: String,
    pub leaf: Option<String>,
    pub instructions: Option<String>,
    pub strategy: Option<ContextStrategy>,
    pub max_context_tokens: Option<usize>,
    pub persist: bool,
    pub debug: bool,
}

/// Apply command-line overrides on top of the loaded configuration.
pub fn apply_overrides(config: &mut AppConfig, args: &AssembleArgs) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(strategy) = args.strategy {
        config.context.strategy = strategy;
    }
    if let Some(max) = args.max_context_tokens {
        config.context.max_context_tokens = Some(max);
        // A smaller window would otherwise leave the default reply
        // allowance larger than the whole context.
        if config.context.max_response_tokens.is_none() && config.context.max_prompt_tokens.is_none() {
            config.context.max_response_tokens = Some(0);
        }
    }
    if args.debug {
        config.context.debug = true;
    }
    config.validate()?;
    Ok(())
}

pub async fn run(args: AssembleArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load()?;
    apply_overrides(&mut config, &args)?;

    let conversation_id = ConversationId::from(args.conversation.as_str());
    let file_store = FileMessageStore::new(args.thread.clone());
    let store: Arc<dyn MessageStore> = if args.persist {
        Arc::new(file_store)
    } else {
        let messages = file_store.load_conversation(&conversation_id).await?;
        Arc::new(InMemoryMessageStore::with_messages(messages))
    };

    let provider: Option<Arc<dyn Provider>> = match config.context.strategy {
        ContextStrategy::Refine => Some(Arc::new(OpenAiCompatProvider::from_config(&config)?)),
        ContextStrategy::Discard => None,
    };

    let session = ContextSession::from_config(&config, store, provider)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling refinement");
            on_interrupt.cancel();
        }
    });

    let prepared = session
        .prepare(
            &conversation_id,
            args.leaf.as_deref(),
            args.instructions.as_deref(),
            &cancel,
        )
        .await?;

    info!(
        model = session.assembler().settings().model(),
        strategy = %session.assembler().settings().strategy(),
        prompt_tokens = prepared.prompt_tokens,
        "Assembled"
    );

    println!("{}", serde_json::to_string_pretty(&prepared)?);
    Ok(())
}
