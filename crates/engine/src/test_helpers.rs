//! Shared test helpers for engine tests.

use async_trait::async_trait;
use chatweave_core::error::{ContextError, ProviderError, TokenizerError};
use chatweave_core::message::{PromptMessage, Role};
use chatweave_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use chatweave_core::tokenizer::{EncodingHandle, TokenizerBackend};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::tokens::TokenCounter;

// ── Tokenizer ─────────────────────────────────────────────────────────────

/// Backend whose encodings count whitespace-separated words.
///
/// Knows `cl100k_base` and `o200k_base`; anything else is unknown.
pub struct MockBackend {
    loads: AtomicUsize,
    failures_left: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::failing_counts(0)
    }

    /// The first `n` `count` calls across all handles fail.
    pub fn failing_counts(n: usize) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            failures_left: Arc::new(AtomicUsize::new(n)),
        }
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl TokenizerBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn load(&self, encoding: &str) -> Result<Arc<dyn EncodingHandle>, TokenizerError> {
        if encoding != "cl100k_base" && encoding != "o200k_base" {
            return Err(TokenizerError::UnknownEncoding(encoding.into()));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockHandle {
            encoding: encoding.into(),
            released: AtomicBool::new(false),
            failures_left: Arc::clone(&self.failures_left),
        }))
    }
}

struct MockHandle {
    encoding: String,
    released: AtomicBool,
    failures_left: Arc<AtomicUsize>,
}

impl EncodingHandle for MockHandle {
    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        if self.is_released() {
            return Err(TokenizerError::Released(self.encoding.clone()));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(TokenizerError::EncodeFailed("corrupted ranks".into()));
        }
        Ok(text.split_whitespace().count())
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

/// Counter that charges one token per word and no message overhead.
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count_text(&self, text: &str) -> Result<usize, ContextError> {
        Ok(text.split_whitespace().count())
    }

    fn count_message(&self, message: &PromptMessage) -> Result<usize, ContextError> {
        self.count_text(&message.content)
    }
}

/// A formatted message with a preset token count.
pub fn sized(id: &str, role: Role, tokens: usize) -> PromptMessage {
    PromptMessage::new(role, format!("message {id}"))
        .with_source(id)
        .with_token_count(tokens)
}

// ── Providers ─────────────────────────────────────────────────────────────

/// A mock provider that returns a sequence of scripted replies.
///
/// Each call to `complete` returns the next reply in the queue and records
/// the request.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Replies `text` to every call.
    pub fn repeating(text: &str, times: usize) -> Self {
        Self::new((0..times).map(|_| Ok(text.to_string())).collect())
    }

    pub fn failing(error: ProviderError) -> Self {
        Self::new(vec![Err(error)])
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedProvider: no more replies"));
        reply.map(|text| make_text_response(&text))
    }
}

/// A provider that never answers.
pub struct HangingProvider;

#[async_trait]
impl Provider for HangingProvider {
    fn name(&self) -> &str {
        "hanging_mock"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        std::future::pending::<()>().await;
        unreachable!()
    }
}

/// Create a simple assistant text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: PromptMessage::new(Role::Assistant, text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}
