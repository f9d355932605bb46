//! Client configuration.
//!
//! Holds the provider credentials, endpoint, model fallback chain and
//! streaming options.

use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{SlideStreamError, SlideStreamResult};
use crate::streaming::{FrameFormat, SessionOptions, SnapshotMode};

/// Default request timeout (120 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default output token limit per generation.
pub const DEFAULT_MAX_TOKENS: u32 = 16_000;

/// Version header sent to the Anthropic Messages API.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Bedrock models tried in order when none are configured.
pub const DEFAULT_BEDROCK_MODELS: [&str; 4] = [
    "claude-sonnet-4-5-20250929-v1:0",
    "us.anthropic.claude-sonnet-4-5-20250929-v1:0",
    "amazon.nova-lite-v1:0",
    "amazon.nova-pro-v1:0",
];

/// Model provider API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProviderKind {
    /// AWS Bedrock `converse-stream`.
    #[default]
    BedrockConverse,
    /// Anthropic Messages API with `stream: true`.
    Anthropic,
    /// OpenAI-compatible chat completions with `stream: true`.
    OpenAiCompatible,
}

impl ProviderKind {
    /// Base URL used when none is configured.
    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::BedrockConverse => "https://bedrock-runtime.us-east-1.amazonaws.com",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::OpenAiCompatible => "https://api.openai.com/v1",
        }
    }

    /// Models used when none are configured.
    pub fn default_models(self) -> Vec<String> {
        match self {
            ProviderKind::BedrockConverse => {
                DEFAULT_BEDROCK_MODELS.iter().map(|m| (*m).to_string()).collect()
            }
            ProviderKind::Anthropic => vec!["claude-sonnet-4-5".to_string()],
            ProviderKind::OpenAiCompatible => Vec::new(),
        }
    }

    /// Framing of this provider's streaming responses.
    pub fn frame_format(self) -> FrameFormat {
        match self {
            ProviderKind::BedrockConverse => FrameFormat::bedrock_converse(),
            ProviderKind::Anthropic | ProviderKind::OpenAiCompatible => FrameFormat::EventStream,
        }
    }
}

impl FromStr for ProviderKind {
    type Err = SlideStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "bedrock" | "bedrock-converse" => Ok(ProviderKind::BedrockConverse),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "openai" | "openai-compatible" => Ok(ProviderKind::OpenAiCompatible),
            other => Err(SlideStreamError::configuration(format!(
                "Unknown provider: {}",
                other
            ))),
        }
    }
}

/// Configuration for the slide stream client.
#[derive(Clone)]
pub struct SlideStreamConfig {
    /// API key for authentication (stored securely).
    pub(crate) api_key: SecretString,
    /// Base URL for API requests.
    pub base_url: String,
    /// Provider API.
    pub provider: ProviderKind,
    /// Models tried in order until one opens a stream.
    pub models: Vec<String>,
    /// Request timeout.
    pub timeout: Duration,
    /// Output token limit.
    pub max_tokens: u32,
    /// Partial-parse strategy for sessions.
    pub snapshot_mode: SnapshotMode,
    /// Custom headers to include in requests.
    pub custom_headers: Vec<(String, String)>,
}

impl SlideStreamConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> SlideStreamConfigBuilder {
        SlideStreamConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SLIDE_STREAM_API_KEY` (required): API key for authentication
    /// - `SLIDE_STREAM_BASE_URL` (optional): Custom base URL
    /// - `SLIDE_STREAM_PROVIDER` (optional): `bedrock`, `anthropic` or `openai`
    /// - `SLIDE_STREAM_MODELS` (optional): Comma-separated model fallback chain
    /// - `SLIDE_STREAM_TIMEOUT` (optional): Request timeout in seconds
    /// - `SLIDE_STREAM_MAX_TOKENS` (optional): Output token limit
    pub fn from_env() -> SlideStreamResult<Self> {
        let api_key = std::env::var("SLIDE_STREAM_API_KEY").map_err(|_| {
            SlideStreamError::configuration("SLIDE_STREAM_API_KEY environment variable not set")
        })?;

        let mut builder = SlideStreamConfigBuilder::new().api_key(api_key);

        if let Ok(base_url) = std::env::var("SLIDE_STREAM_BASE_URL") {
            builder = builder.base_url(base_url);
        }

        if let Ok(provider) = std::env::var("SLIDE_STREAM_PROVIDER") {
            builder = builder.provider(provider.parse()?);
        }

        if let Ok(models) = std::env::var("SLIDE_STREAM_MODELS") {
            builder = builder.models(parse_model_list(&models));
        }

        if let Ok(timeout_str) = std::env::var("SLIDE_STREAM_TIMEOUT") {
            if let Ok(timeout_secs) = timeout_str.parse::<u64>() {
                builder = builder.timeout(Duration::from_secs(timeout_secs));
            }
        }

        if let Ok(max_tokens_str) = std::env::var("SLIDE_STREAM_MAX_TOKENS") {
            if let Ok(max_tokens) = max_tokens_str.parse::<u32>() {
                builder = builder.max_tokens(max_tokens);
            }
        }

        builder.build()
    }

    /// Returns the API key hint (last 4 characters) for debugging.
    pub fn api_key_hint(&self) -> String {
        let key = self.api_key.expose_secret();
        match key.char_indices().rev().nth(3) {
            Some((idx, _)) if idx > 0 => format!("...{}", &key[idx..]),
            _ => "****".to_string(),
        }
    }

    /// Session options matching the configured provider.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions::new(self.provider.frame_format()).with_snapshot_mode(self.snapshot_mode)
    }
}

impl std::fmt::Debug for SlideStreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlideStreamConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("provider", &self.provider)
            .field("models", &self.models)
            .field("timeout", &self.timeout)
            .field("max_tokens", &self.max_tokens)
            .field("snapshot_mode", &self.snapshot_mode)
            .finish_non_exhaustive()
    }
}

fn parse_model_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .collect()
}

/// Builder for `SlideStreamConfig`.
#[derive(Default)]
pub struct SlideStreamConfigBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    provider: ProviderKind,
    models: Vec<String>,
    timeout: Option<Duration>,
    max_tokens: Option<u32>,
    snapshot_mode: SnapshotMode,
    custom_headers: Vec<(String, String)>,
}

impl SlideStreamConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Sets the provider API.
    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }

    /// Appends a model to the fallback chain.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.models.push(model.into());
        self
    }

    /// Replaces the fallback chain.
    pub fn models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = models.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the output token limit.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the partial-parse strategy.
    pub fn snapshot_mode(mut self, mode: SnapshotMode) -> Self {
        self.snapshot_mode = mode;
        self
    }

    /// Adds a custom header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.push((name.into(), value.into()));
        self
    }

    /// Builds the configuration.
    pub fn build(self) -> SlideStreamResult<SlideStreamConfig> {
        let api_key = self
            .api_key
            .ok_or_else(|| SlideStreamError::configuration("API key is required"))?;

        if api_key.is_empty() {
            return Err(SlideStreamError::configuration("API key cannot be empty"));
        }

        let base_url = self
            .base_url
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
            .trim_end_matches('/')
            .to_string();

        let parsed = url::Url::parse(&base_url)?;
        if parsed.scheme() != "https" {
            return Err(SlideStreamError::configuration("Base URL must use HTTPS"));
        }

        let models = if self.models.is_empty() {
            self.provider.default_models()
        } else {
            self.models
        };
        if models.is_empty() {
            return Err(SlideStreamError::configuration(
                "At least one model is required",
            ));
        }

        let max_tokens = self.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
        if max_tokens == 0 {
            return Err(SlideStreamError::configuration(
                "max_tokens must be greater than zero",
            ));
        }

        Ok(SlideStreamConfig {
            api_key: SecretString::new(api_key),
            base_url,
            provider: self.provider,
            models,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            max_tokens,
            snapshot_mode: self.snapshot_mode,
            custom_headers: self.custom_headers,
        })
    }
}
