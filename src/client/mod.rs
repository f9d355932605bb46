//! Slide stream client.
//!
//! Provides the main entry point: configure a provider once, then open deck
//! generations as event streams.

use std::sync::Arc;
use std::time::Duration;

use crate::auth::{ApiKeyAuth, AuthProvider};
use crate::config::{ProviderKind, SlideStreamConfig, SlideStreamConfigBuilder};
use crate::errors::{SlideStreamError, SlideStreamResult};
use crate::observability::{InMemoryMetricsCollector, MetricsCollector};
use crate::services::{GenerationRequest, GenerationService};
use crate::streaming::{DeckEventStream, SnapshotMode};
use crate::transport::{HttpTransport, HttpTransportImpl};
use crate::types::DeckDocument;

/// The main slide stream client.
///
/// # Example
///
/// ```rust,no_run
/// use futures::StreamExt;
/// use slide_stream::{DeckEvent, ProviderKind, SlideStreamClient};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = SlideStreamClient::builder()
///         .api_key("sk-ant-your-key")
///         .provider(ProviderKind::Anthropic)
///         .build()?;
///
///     let mut events = client.stream_deck("A five slide deck about tide pools").await?;
///     while let Some(event) = events.next().await {
///         if let DeckEvent::Slide { index, slide, .. } = &event {
///             println!("slide {}: {:?}", index, slide.title());
///         }
///     }
///     Ok(())
/// }
/// ```
pub struct SlideStreamClient {
    config: Arc<SlideStreamConfig>,
    generation: GenerationService,
    metrics: Arc<dyn MetricsCollector>,
}

impl SlideStreamClient {
    /// Creates a new client builder.
    pub fn builder() -> SlideStreamClientBuilder {
        SlideStreamClientBuilder::new()
    }

    /// Creates a client from environment variables.
    ///
    /// See [`SlideStreamConfig::from_env`] for the variables read.
    pub fn from_env() -> SlideStreamResult<Self> {
        let config = SlideStreamConfig::from_env()?;
        SlideStreamClientBuilder::from_config(config).build()
    }

    /// Returns the generation service.
    pub fn generation(&self) -> &GenerationService {
        &self.generation
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SlideStreamConfig {
        &self.config
    }

    /// Returns the metrics collector.
    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }

    /// Opens a generation for `prompt` with the configured models.
    pub async fn stream_deck(
        &self,
        prompt: impl Into<String>,
    ) -> SlideStreamResult<DeckEventStream> {
        self.generation.stream_deck(GenerationRequest::new(prompt)).await
    }

    /// Generates a deck and waits for the finalized document.
    pub async fn generate_deck(
        &self,
        request: GenerationRequest,
    ) -> SlideStreamResult<DeckDocument> {
        self.generation.stream_deck(request).await?.collect_document().await
    }
}

impl std::fmt::Debug for SlideStreamClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlideStreamClient")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for the slide stream client.
pub struct SlideStreamClientBuilder {
    config_builder: SlideStreamConfigBuilder,
    config: Option<SlideStreamConfig>,
    transport: Option<Arc<dyn HttpTransport>>,
    auth: Option<Arc<dyn AuthProvider>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
}

impl SlideStreamClientBuilder {
    /// Creates a new client builder.
    pub fn new() -> Self {
        Self {
            config_builder: SlideStreamConfigBuilder::new(),
            config: None,
            transport: None,
            auth: None,
            metrics: None,
        }
    }

    /// Creates a builder from an existing configuration.
    ///
    /// Configuration setters on the builder are ignored afterwards.
    pub fn from_config(config: SlideStreamConfig) -> Self {
        Self {
            config: Some(config),
            ..Self::new()
        }
    }

    /// Sets the API key.
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.api_key(api_key);
        self
    }

    /// Sets the base URL.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.base_url(base_url);
        self
    }

    /// Sets the provider API.
    pub fn provider(mut self, provider: ProviderKind) -> Self {
        self.config_builder = self.config_builder.provider(provider);
        self
    }

    /// Appends a model to the fallback chain.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.model(model);
        self
    }

    /// Sets the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the output token limit.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.config_builder = self.config_builder.max_tokens(max_tokens);
        self
    }

    /// Sets the partial-parse strategy.
    pub fn snapshot_mode(mut self, mode: SnapshotMode) -> Self {
        self.config_builder = self.config_builder.snapshot_mode(mode);
        self
    }

    /// Sets a custom transport.
    pub fn transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets a custom auth provider.
    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets a custom metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Builds the client.
    pub fn build(self) -> SlideStreamResult<SlideStreamClient> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_builder.build()?,
        };

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(t) => t,
            None => Arc::new(
                HttpTransportImpl::new(&config.base_url, config.timeout).map_err(|e| {
                    SlideStreamError::Configuration {
                        message: e.to_string(),
                    }
                })?,
            ),
        };

        let auth: Arc<dyn AuthProvider> = match self.auth {
            Some(a) => a,
            None => Arc::new(ApiKeyAuth::for_provider(config.provider, config.api_key.clone())),
        };
        auth.validate()?;

        let metrics: Arc<dyn MetricsCollector> = self
            .metrics
            .unwrap_or_else(|| Arc::new(InMemoryMetricsCollector::new()));

        tracing::debug!(
            provider = ?config.provider,
            models = ?config.models,
            key = %config.api_key_hint(),
            "Building slide stream client"
        );

        let config = Arc::new(config);
        let generation = GenerationService::new(transport, auth, Arc::clone(&config))
            .with_metrics(Arc::clone(&metrics));

        Ok(SlideStreamClient {
            config,
            generation,
            metrics,
        })
    }
}

impl Default for SlideStreamClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
