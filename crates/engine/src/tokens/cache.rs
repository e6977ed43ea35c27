//! Process-wide tokenizer resource cache.
//!
//! Loaded encodings are kept in a mutex-guarded map and handed out as
//! `Arc`s. Every lookup bumps a call counter; once it passes the configured
//! threshold all cached handles are released and the map starts over, which
//! bounds the memory held by rarely-used encodings.
//!
//! A handle released while another task still holds it reports
//! [`TokenizerError::Released`] on its next `count`, which the token counter
//! treats as a signal to reload.

use chatweave_core::error::TokenizerError;
use chatweave_core::tokenizer::{EncodingHandle, TokenizerBackend};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Default number of lookups between full resets. A counted message is one
/// lookup.
pub const DEFAULT_RESET_AFTER_CALLS: usize = 25;

struct CacheState {
    encoders: HashMap<String, Arc<dyn EncodingHandle>>,
    calls: usize,
}

/// Injectable, synchronized cache of loaded encodings.
pub struct TokenizerCache {
    backend: Arc<dyn TokenizerBackend>,
    reset_after: usize,
    state: Mutex<CacheState>,
}

impl TokenizerCache {
    pub fn new(backend: Arc<dyn TokenizerBackend>, reset_after: usize) -> Self {
        Self {
            backend,
            reset_after: reset_after.max(1),
            state: Mutex::new(CacheState {
                encoders: HashMap::new(),
                calls: 0,
            }),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        // A panic while holding the lock leaves only a map of handles behind,
        // which is still consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch (loading if needed) the handle for `encoding`.
    pub fn get(&self, encoding: &str) -> Result<Arc<dyn EncodingHandle>, TokenizerError> {
        let mut state = self.lock();

        state.calls += 1;
        if state.calls > self.reset_after {
            debug!(
                calls = state.calls - 1,
                cached = state.encoders.len(),
                "Releasing all cached encoders"
            );
            Self::release_all(&mut state);
            state.calls = 1;
        }

        if let Some(handle) = state.encoders.get(encoding) {
            if !handle.is_released() {
                return Ok(Arc::clone(handle));
            }
        }

        let handle = self.backend.load(encoding)?;
        debug!(encoding, backend = self.backend.name(), "Loaded encoder");
        state
            .encoders
            .insert(encoding.to_string(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Release every cached handle and restart the call count.
    pub fn reset(&self) {
        let mut state = self.lock();
        Self::release_all(&mut state);
        state.calls = 0;
    }

    fn release_all(state: &mut CacheState) {
        for (_, handle) in state.encoders.drain() {
            handle.release();
        }
    }

    /// Number of encodings currently cached.
    pub fn cached(&self) -> usize {
        self.lock().encoders.len()
    }

    /// Lookups since the last reset.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }
}

impl std::fmt::Debug for TokenizerCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerCache")
            .field("backend", &self.backend.name())
            .field("reset_after", &self.reset_after)
            .finish()
    }
}
