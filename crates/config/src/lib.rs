//! Configuration loading, validation, and management for chatweave.
//!
//! Loads configuration from `~/.chatweave/config.toml` with environment
//! variable overrides. The loosely-typed file sections are resolved once into
//! [`ContextSettings`], a validated struct with every default applied.

use chatweave_core::error::ContextError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// The root configuration structure.
///
/// Maps directly to `~/.chatweave/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the refinement provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Context budget configuration
    #[serde(default)]
    pub context: ContextConfig,

    /// Tokenizer configuration
    #[serde(default)]
    pub tokenizer: TokenizerConfig,

    /// Refinement (overflow summarization) configuration
    #[serde(default)]
    pub refiner: RefinerConfig,

    /// Provider endpoint used by the refiner
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Names attached to formatted prompt messages
    #[serde(default)]
    pub format: FormatConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("context", &self.context)
            .field("tokenizer", &self.tokenizer)
            .field("refiner", &self.refiner)
            .field("provider", &self.provider)
            .field("format", &self.format)
            .finish()
    }
}

// ── Context ───────────────────────────────────────────────────────────────

/// What to do with history that does not fit the context budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStrategy {
    /// Drop the oldest messages silently.
    #[default]
    Discard,
    /// Summarize the oldest messages into one refined message.
    Refine,
}

impl std::fmt::Display for ContextStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextStrategy::Discard => f.write_str("discard"),
            ContextStrategy::Refine => f.write_str("refine"),
        }
    }
}

impl FromStr for ContextStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "discard" => Ok(ContextStrategy::Discard),
            "refine" => Ok(ContextStrategy::Refine),
            other => Err(ConfigError::ValidationError(format!(
                "unknown context strategy '{other}' (expected discard or refine)"
            ))),
        }
    }
}

/// Raw `[context]` section as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Target completion model; picks the default context window
    #[serde(default = "default_model")]
    pub model: String,

    /// Context window override (tokens)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,

    /// Tokens reserved for the model's reply
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<usize>,

    /// Prompt allowance; defaults to context minus response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_prompt_tokens: Option<usize>,

    #[serde(default)]
    pub strategy: ContextStrategy,

    /// Verbose assembly diagnostics
    #[serde(default)]
    pub debug: bool,
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}

/// Default reply allowance when none is configured.
pub const DEFAULT_MAX_RESPONSE_TOKENS: usize = 1024;

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_context_tokens: None,
            max_response_tokens: None,
            max_prompt_tokens: None,
            strategy: ContextStrategy::default(),
            debug: false,
        }
    }
}

impl ContextConfig {
    /// Apply defaults and validate the budget constraints.
    pub fn resolve(&self) -> Result<ContextSettings, ConfigError> {
        let max_context_tokens = self
            .max_context_tokens
            .unwrap_or_else(|| model_max_tokens(&self.model));
        let max_response_tokens = self
            .max_response_tokens
            .unwrap_or(DEFAULT_MAX_RESPONSE_TOKENS);

        ContextSettings::build(
            self.model.clone(),
            max_context_tokens,
            max_response_tokens,
            self.max_prompt_tokens,
            self.strategy,
            self.debug,
        )
    }
}

/// Validated context budget settings.
///
/// Invariant: `max_context_tokens > 0` and
/// `max_prompt_tokens + max_response_tokens <= max_context_tokens`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextSettings {
    model: String,
    max_context_tokens: usize,
    max_response_tokens: usize,
    max_prompt_tokens: usize,
    strategy: ContextStrategy,
    debug: bool,
}

impl ContextSettings {
    /// Validated settings for `model` with an explicit budget.
    pub fn new(
        max_context_tokens: usize,
        max_response_tokens: usize,
        strategy: ContextStrategy,
    ) -> Result<Self, ConfigError> {
        Self::build(
            default_model(),
            max_context_tokens,
            max_response_tokens,
            None,
            strategy,
            false,
        )
    }

    fn build(
        model: String,
        max_context_tokens: usize,
        max_response_tokens: usize,
        max_prompt_tokens: Option<usize>,
        strategy: ContextStrategy,
        debug: bool,
    ) -> Result<Self, ConfigError> {
        if max_context_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "max_context_tokens must be greater than 0".into(),
            ));
        }

        let max_prompt_tokens =
            max_prompt_tokens.unwrap_or(max_context_tokens.saturating_sub(max_response_tokens));

        if max_prompt_tokens + max_response_tokens > max_context_tokens {
            return Err(ConfigError::ValidationError(format!(
                "max_prompt_tokens + max_response_tokens ({max_prompt_tokens} + {max_response_tokens} = {}) \
                 must be less than or equal to max_context_tokens ({max_context_tokens})",
                max_prompt_tokens + max_response_tokens
            )));
        }

        Ok(Self {
            model,
            max_context_tokens,
            max_response_tokens,
            max_prompt_tokens,
            strategy,
            debug,
        })
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn max_context_tokens(&self) -> usize {
        self.max_context_tokens
    }

    pub fn max_response_tokens(&self) -> usize {
        self.max_response_tokens
    }

    pub fn max_prompt_tokens(&self) -> usize {
        self.max_prompt_tokens
    }

    pub fn strategy(&self) -> ContextStrategy {
        self.strategy
    }

    pub fn debug(&self) -> bool {
        self.debug
    }
}

/// Context window (one less than the advertised maximum) for known models.
///
/// Matched most-specific first; unknown models get 4095.
pub fn model_max_tokens(model: &str) -> usize {
    const WINDOWS: &[(&str, usize)] = &[
        ("gpt-4o", 127_999),
        ("gpt-4-turbo", 127_999),
        ("gpt-4-1106", 127_999),
        ("gpt-4-0125", 127_999),
        ("gpt-4-32k", 32_767),
        ("gpt-4", 8_191),
        ("gpt-3.5-turbo-16k", 16_383),
        ("gpt-3.5-turbo-1106", 16_383),
        ("gpt-3.5-turbo", 4_095),
        ("text-davinci-003", 4_096),
    ];

    WINDOWS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, tokens)| *tokens)
        .unwrap_or(4_095)
}

// ── Tokenizer ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenizerKind {
    /// BPE encodings via tiktoken
    #[default]
    Tiktoken,
    /// ~4 characters per token, no resources to load
    Heuristic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenizerConfig {
    #[serde(default)]
    pub backend: TokenizerKind,

    /// Encoding override (e.g., "o200k_base"); derived from the model otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,

    /// Release all cached encoders after this many lookups
    #[serde(default = "default_reset_after_calls")]
    pub reset_after_calls: usize,
}

fn default_reset_after_calls() -> usize {
    25
}

impl Default for TokenizerConfig {
    fn default() -> Self {
        Self {
            backend: TokenizerKind::default(),
            encoding: None,
            reset_after_calls: default_reset_after_calls(),
        }
    }
}

// ── Refiner ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinerConfig {
    /// Model used to summarize overflow
    #[serde(default = "default_model")]
    pub model: String,

    /// Characters per chunk fed to the summarizer
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Input cap for the summary model; its context window otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_input_tokens: Option<usize>,

    #[serde(default)]
    pub temperature: f32,
}

fn default_chunk_size() -> usize {
    1500
}
fn default_chunk_overlap() -> usize {
    100
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_input_tokens: None,
            temperature: 0.0,
        }
    }
}

impl RefinerConfig {
    /// Effective input cap for the summary model.
    pub fn input_token_limit(&self) -> usize {
        self.max_input_tokens
            .unwrap_or_else(|| model_max_tokens(&self.model))
    }
}

// ── Provider ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_provider_name() -> String {
    "openai".into()
}
fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_url: default_api_url(),
        }
    }
}

// ── Formatting ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Name attached to user messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    /// Name attached to assistant messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_name: Option<String>,
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from the default path (~/.chatweave/config.toml).
    ///
    /// Environment overrides:
    /// - `CHATWEAVE_API_KEY`, then `OPENAI_API_KEY` (when no key is configured)
    /// - `CHATWEAVE_MODEL`
    /// - `CHATWEAVE_CONTEXT_STRATEGY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("CHATWEAVE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(model) = std::env::var("CHATWEAVE_MODEL") {
            config.context.model = model;
        }

        if let Ok(strategy) = std::env::var("CHATWEAVE_CONTEXT_STRATEGY") {
            config.context.strategy = strategy.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatweave")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.context.resolve()?;

        if self.tokenizer.reset_after_calls == 0 {
            return Err(ConfigError::ValidationError(
                "tokenizer.reset_after_calls must be greater than 0".into(),
            ));
        }

        if self.refiner.chunk_size == 0 || self.refiner.chunk_overlap >= self.refiner.chunk_size {
            return Err(ConfigError::ValidationError(
                "refiner.chunk_overlap must be smaller than a non-zero refiner.chunk_size".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.refiner.temperature) {
            return Err(ConfigError::ValidationError(
                "refiner.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            context: ContextConfig::default(),
            tokenizer: TokenizerConfig::default(),
            refiner: RefinerConfig::default(),
            provider: ProviderConfig::default(),
            format: FormatConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for ContextError {
    fn from(err: ConfigError) -> Self {
        ContextError::ConfigurationInvalid(err.to_string())
    }
}
