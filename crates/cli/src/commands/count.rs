//! `chatweave count` — Count tokens with the configured encoding.

use chatweave_config::AppConfig;
use chatweave_core::error::ContextError;
use chatweave_core::message::{PromptMessage, Role};
use chatweave_engine::{CachedTokenCounter, TokenCounter};

/// Raw token count of `text`, or its cost as a user message.
pub fn count_tokens(config: &AppConfig, text: &str, as_message: bool) -> Result<usize, ContextError> {
    let counter = CachedTokenCounter::from_config(config);
    if as_message {
        counter.count_message(&PromptMessage::new(Role::User, text))
    } else {
        counter.count_text(text)
    }
}

pub fn run(text: &str, as_message: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    let tokens = count_tokens(&config, text, as_message)?;
    println!("{tokens}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatweave_config::TokenizerKind;

    fn heuristic() -> AppConfig {
        let mut config = AppConfig::default();
        config.tokenizer.backend = TokenizerKind::Heuristic;
        config
    }

    #[test]
    fn raw_count() {
        assert_eq!(count_tokens(&heuristic(), "abcdefgh", false).unwrap(), 2);
    }

    #[test]
    fn message_count_adds_overhead() {
        // 3 + "user" (1) + "abcdefgh" (2)
        assert_eq!(count_tokens(&heuristic(), "abcdefgh", true).unwrap(), 6);
    }
}
