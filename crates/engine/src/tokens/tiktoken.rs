//! BPE token counting via `tiktoken-rs`.

use chatweave_core::error::TokenizerError;
use chatweave_core::tokenizer::{EncodingHandle, TokenizerBackend};
use std::sync::{Arc, RwLock};
use tiktoken_rs::CoreBPE;

/// Loads OpenAI BPE encodings by encoding name or model name.
#[derive(Debug, Default, Clone, Copy)]
pub struct TiktokenBackend;

impl TiktokenBackend {
    pub fn new() -> Self {
        Self
    }
}

impl TokenizerBackend for TiktokenBackend {
    fn name(&self) -> &str {
        "tiktoken"
    }

    fn load(&self, encoding: &str) -> Result<Arc<dyn EncodingHandle>, TokenizerError> {
        let bpe = match encoding {
            "cl100k_base" => tiktoken_rs::cl100k_base(),
            "o200k_base" => tiktoken_rs::o200k_base(),
            "p50k_base" => tiktoken_rs::p50k_base(),
            "r50k_base" => tiktoken_rs::r50k_base(),
            model => match tiktoken_rs::get_bpe_from_model(model) {
                Ok(bpe) => Ok(bpe),
                Err(_) => return Err(TokenizerError::UnknownEncoding(model.to_string())),
            },
        }
        .map_err(|e| TokenizerError::LoadFailed {
            encoding: encoding.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Arc::new(TiktokenHandle {
            encoding: encoding.to_string(),
            bpe: RwLock::new(Some(bpe)),
        }))
    }
}

/// A loaded BPE. Releasing drops the ranks table.
struct TiktokenHandle {
    encoding: String,
    bpe: RwLock<Option<CoreBPE>>,
}

impl EncodingHandle for TiktokenHandle {
    fn encoding(&self) -> &str {
        &self.encoding
    }

    fn count(&self, text: &str) -> Result<usize, TokenizerError> {
        let guard = self
            .bpe
            .read()
            .map_err(|_| TokenizerError::EncodeFailed(format!("{} lock poisoned", self.encoding)))?;
        let bpe = guard
            .as_ref()
            .ok_or_else(|| TokenizerError::Released(self.encoding.clone()))?;
        Ok(bpe.encode_with_special_tokens(text).len())
    }

    fn release(&self) {
        if let Ok(mut guard) = self.bpe.write() {
            guard.take();
        }
    }

    fn is_released(&self) -> bool {
        self.bpe.read().map(|guard| guard.is_none()).unwrap_or(true)
    }
}
