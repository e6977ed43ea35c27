//! End-to-end tests for context assembly.
//!
//! These exercise the public pipeline from a stored message tree to the
//! final payload: linearization, counting, budget fitting, refinement and
//! token accounting.

use std::sync::{Arc, Mutex};

use chatweave_config::{ContextSettings, ContextStrategy, RefinerConfig};
use chatweave_core::error::{ContextError, ProviderError};
use chatweave_core::message::{ConversationId, Message, PromptMessage, Role};
use chatweave_core::provider::{Provider, ProviderRequest, ProviderResponse};
use chatweave_core::store::MessageStore;
use chatweave_engine::tokens::HeuristicBackend;
use chatweave_engine::{
    CachedTokenCounter, ContextAssembler, ContextSession, MessageArena, OverflowRefiner,
    PRIMING_TOKENS, ProviderRefiner, TokenCounter, TokenizerCache,
};
use chatweave_store::InMemoryMessageStore;
use tokio_util::sync::CancellationToken;

// ── Mock Provider ────────────────────────────────────────────────────────

/// A provider that answers every call with the same summary.
struct SummaryProvider {
    summary: Result<String, ProviderError>,
    calls: Mutex<usize>,
}

impl SummaryProvider {
    fn ok(summary: &str) -> Self {
        Self {
            summary: Ok(summary.into()),
            calls: Mutex::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            summary: Err(ProviderError::ApiError {
                status_code: 500,
                message: "upstream exploded".into(),
            }),
            calls: Mutex::new(0),
        }
    }

    fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl Provider for SummaryProvider {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        *self.calls.lock().unwrap() += 1;
        assert_eq!(request.messages.len(), 1);
        let text = self.summary.clone()?;
        Ok(ProviderResponse {
            message: PromptMessage::new(Role::Assistant, text),
            usage: None,
            model: request.model,
        })
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn counter() -> Arc<dyn TokenCounter> {
    let cache = Arc::new(TokenizerCache::new(Arc::new(HeuristicBackend::new()), 25));
    Arc::new(CachedTokenCounter::new(cache, "cl100k_base"))
}

/// A linear thread of `sizes.len()` alternating turns with cached counts.
fn thread(conv: &ConversationId, sizes: &[usize]) -> Vec<Message> {
    let mut parent: Option<String> = None;
    sizes
        .iter()
        .enumerate()
        .map(|(i, &tokens)| {
            let text = format!("turn number {i}");
            let message = if i % 2 == 0 {
                Message::user(conv, parent.as_deref(), text)
            } else {
                Message::assistant(conv, parent.as_deref(), text)
            }
            .with_id(format!("m{i}"))
            .with_token_count(tokens);
            parent = Some(message.id.clone());
            message
        })
        .collect()
}

fn assembler(
    max: usize,
    strategy: ContextStrategy,
    provider: Option<Arc<dyn Provider>>,
) -> ContextAssembler {
    let counter = counter();
    let refiner = provider.map(|provider| {
        Arc::new(ProviderRefiner::new(
            provider,
            Arc::clone(&counter),
            &RefinerConfig::default(),
        )) as Arc<dyn OverflowRefiner>
    });
    let settings = ContextSettings::new(max, 0, strategy).unwrap();
    ContextAssembler::new(settings, counter, refiner).unwrap()
}

fn ids(messages: &[PromptMessage]) -> Vec<String> {
    messages.iter().filter_map(|m| m.source_id.clone()).collect()
}

// ── Budget fitting ───────────────────────────────────────────────────────

#[tokio::test]
async fn discard_scenario_keeps_three_newest() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(thread(&conv, &[50; 5]));
    let assembler = assembler(180, ContextStrategy::Discard, None);

    let result = assembler
        .assemble(&arena, Some("m4"), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ids(&result.payload), ["m2", "m3", "m4"]);
    assert_eq!(result.prompt_tokens, 153);
    assert_eq!(result.remaining_context_tokens, 27);
}

#[tokio::test]
async fn refine_scenario_routes_two_oldest() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(thread(&conv, &[50; 5]));
    let provider = Arc::new(SummaryProvider::ok("Earlier: greetings."));
    let assembler = assembler(180, ContextStrategy::Refine, Some(provider.clone()));

    let result = assembler
        .assemble(&arena, Some("m4"), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.payload.len(), 4);
    assert_eq!(result.payload[0].content, "Earlier: greetings.");
    assert!(result.payload[0].source_id.is_none());
    assert_eq!(ids(&result.payload), ["m2", "m3", "m4"]);
    assert_eq!(result.token_count_map.refined.as_ref().unwrap().message_id, "m1");
    // One user chunk and one assistant chunk.
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn everything_fits_means_nothing_refined() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(thread(&conv, &[10; 6]));
    let provider = Arc::new(SummaryProvider::ok("unused"));
    let assembler = assembler(4095, ContextStrategy::Refine, Some(provider.clone()));

    let result = assembler
        .assemble(&arena, Some("m5"), Some("Be kind"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.payload.len(), 7);
    assert_eq!(result.messages.len(), 7);
    assert!(result.token_count_map.refined.is_none());
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn budget_property_holds_across_budgets() {
    let conv = ConversationId::from("c");
    let sizes = [120, 35, 80, 12, 64, 5, 90, 41, 17, 23];
    let arena = MessageArena::new(thread(&conv, &sizes));

    for max in [60usize, 100, 200, 300, 600] {
        for strategy in [ContextStrategy::Discard, ContextStrategy::Refine] {
            let provider: Arc<dyn Provider> = Arc::new(SummaryProvider::ok("recap"));
            let assembler = assembler(max, strategy, Some(provider));
            let result = assembler
                .assemble(&arena, Some("m9"), Some("Stay on topic"), &CancellationToken::new())
                .await
                .unwrap();

            let used: usize = result.payload.iter().map(|m| m.tokens()).sum();
            assert!(
                used + PRIMING_TOKENS <= max,
                "{strategy}: {used} + {PRIMING_TOKENS} > {max}"
            );
            assert_eq!(result.prompt_tokens, used + PRIMING_TOKENS);

            let map = &result.token_count_map;
            let mapped = map.counts.values().sum::<usize>()
                + map.instructions.unwrap_or(0)
                + map.refined.as_ref().map_or(0, |r| r.token_count);
            assert_eq!(mapped + PRIMING_TOKENS, result.prompt_tokens, "{strategy} at {max}");
        }
    }
}

#[tokio::test]
async fn payload_preserves_chronological_order() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(thread(&conv, &[30; 8]));
    let provider: Arc<dyn Provider> = Arc::new(SummaryProvider::ok("recap"));
    let assembler = assembler(130, ContextStrategy::Refine, Some(provider));

    let result = assembler
        .assemble(&arena, Some("m7"), None, &CancellationToken::new())
        .await
        .unwrap();

    let kept: Vec<usize> = ids(&result.payload)
        .iter()
        .map(|id| id[1..].parse().unwrap())
        .collect();
    assert!(kept.windows(2).all(|w| w[0] + 1 == w[1]));
    assert_eq!(kept.last(), Some(&7));
}

// ── Edge cases ───────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_branch_yields_instructions_only() {
    let arena = MessageArena::default();
    let assembler = assembler(180, ContextStrategy::Discard, None);

    let result = assembler
        .assemble(&arena, Some("ghost"), Some("You are terse."), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.payload.len(), 1);
    assert_eq!(result.payload[0].role, Role::System);
    assert_eq!(result.payload[0].content, "Instructions:\nYou are terse.");
    assert!(result.token_count_map.is_empty());
    assert!(result.token_count_map.instructions.is_some());
}

#[tokio::test]
async fn empty_branch_without_instructions_is_empty() {
    let assembler = assembler(180, ContextStrategy::Discard, None);
    let result = assembler
        .assemble(&MessageArena::default(), None, None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(result.payload.is_empty());
    assert_eq!(result.prompt_tokens, PRIMING_TOKENS);
}

#[tokio::test]
async fn refiner_failure_still_produces_payload() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(thread(&conv, &[50; 5]));
    let provider = Arc::new(SummaryProvider::failing());
    let assembler = assembler(180, ContextStrategy::Refine, Some(provider.clone()));

    let result = assembler
        .assemble(&arena, Some("m4"), None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(ids(&result.payload), ["m2", "m3", "m4"]);
    assert!(result.token_count_map.refined.is_none());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn cancelled_request_omits_refinement() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(thread(&conv, &[50; 5]));
    let provider = Arc::new(SummaryProvider::ok("never used"));
    let assembler = assembler(180, ContextStrategy::Refine, Some(provider.clone()));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let result = assembler.assemble(&arena, Some("m4"), None, &cancel).await.unwrap();

    assert_eq!(result.payload.len(), 3);
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn instructions_that_crowd_out_the_newest_turn_are_fatal() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(thread(&conv, &[10, 10, 20]));
    let provider = Arc::new(SummaryProvider::failing());
    let assembler = assembler(100, ContextStrategy::Refine, Some(provider.clone()));
    let instructions = vec!["rule"; 200].join(" ");

    let err = assembler
        .assemble(&arena, Some("m2"), Some(&instructions), &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ContextError::BudgetExceededBySingleMessage {
            message_id,
            max_context_tokens,
            ..
        } => {
            assert_eq!(message_id, "m2");
            assert_eq!(max_context_tokens, 100);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(provider.calls(), 0);
}

#[tokio::test]
async fn single_oversized_message_is_an_error() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(thread(&conv, &[10, 10, 5000]));
    let assembler = assembler(4095, ContextStrategy::Discard, None);

    let err = assembler
        .assemble(&arena, Some("m2"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ContextError::BudgetExceededBySingleMessage {
            token_count: 5000,
            max_context_tokens: 4095,
            ..
        }
    ));
}

#[tokio::test]
async fn cyclic_history_is_malformed() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(vec![
        Message::user(&conv, Some("b"), "loop").with_id("a"),
        Message::assistant(&conv, Some("a"), "de loop").with_id("b"),
    ]);
    let assembler = assembler(180, ContextStrategy::Discard, None);

    let err = assembler
        .assemble(&arena, Some("a"), None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ContextError::MalformedHistory { .. }));
}

// ── Determinism and idempotence ──────────────────────────────────────────

#[tokio::test]
async fn repeated_assembly_is_deterministic() {
    let conv = ConversationId::from("c");
    let arena = MessageArena::new(thread(&conv, &[40, 25, 60, 15, 33]));
    let assembler = assembler(120, ContextStrategy::Discard, None);
    let cancel = CancellationToken::new();

    let a = assembler.assemble(&arena, Some("m4"), Some("Hi"), &cancel).await.unwrap();
    let b = assembler.assemble(&arena, Some("m4"), Some("Hi"), &cancel).await.unwrap();

    assert_eq!(a.payload, b.payload);
    assert_eq!(a.token_count_map, b.token_count_map);
    assert_eq!(a.prompt_tokens, b.prompt_tokens);
}

#[tokio::test]
async fn session_round_trip_keeps_cached_counts() {
    let conv = ConversationId::from("c");
    let mut messages = thread(&conv, &[0; 4]);
    for message in &mut messages {
        message.token_count = None;
    }
    let store = Arc::new(InMemoryMessageStore::with_messages(messages));
    let session = ContextSession::new(store.clone(), assembler(4095, ContextStrategy::Discard, None));
    let cancel = CancellationToken::new();

    let first = session.prepare(&conv, Some("m3"), None, &cancel).await.unwrap();
    assert_eq!(first.persisted, 4);

    let stored: Vec<Option<usize>> = store
        .load_conversation(&conv)
        .await
        .unwrap()
        .iter()
        .map(|m| m.token_count)
        .collect();
    assert!(stored.iter().all(Option::is_some));

    let second = session.prepare(&conv, Some("m3"), None, &cancel).await.unwrap();
    assert_eq!(second.persisted, 0);
    assert_eq!(first.token_count_map, second.token_count_map);

    let restored: Vec<Option<usize>> = store
        .load_conversation(&conv)
        .await
        .unwrap()
        .iter()
        .map(|m| m.token_count)
        .collect();
    assert_eq!(stored, restored);
}
