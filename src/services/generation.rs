//! Deck generation service: opens a provider stream and wraps it in a
//! session.

use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

use crate::auth::AuthProvider;
use crate::config::{ProviderKind, SlideStreamConfig, ANTHROPIC_VERSION};
use crate::errors::{SlideStreamError, SlideStreamResult};
use crate::observability::{log_request, log_response, MetricsCollector};
use crate::streaming::DeckEventStream;
use crate::transport::{HttpRequest, HttpTransport};

/// Bytes of an error response body kept in the failure message.
const ERROR_BODY_LIMIT: usize = 1024;

/// A prompt to generate a deck from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// User prompt; expected to ask for the deck JSON.
    pub prompt: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Fallback chain overriding the configured models.
    pub models: Option<Vec<String>>,
    /// Output token limit overriding the configured one.
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Creates a request for `prompt`.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            models: None,
            max_tokens: None,
        }
    }

    /// Sets the system prompt.
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Overrides the model fallback chain.
    pub fn with_models<I, S>(mut self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.models = Some(models.into_iter().map(Into::into).collect());
        self
    }

    /// Overrides the output token limit.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Validates the request.
    pub fn validate(&self) -> SlideStreamResult<()> {
        if self.prompt.trim().is_empty() {
            return Err(SlideStreamError::configuration("prompt cannot be empty"));
        }
        if self.models.as_ref().is_some_and(Vec::is_empty) {
            return Err(SlideStreamError::configuration(
                "model override must name at least one model",
            ));
        }
        if self.max_tokens == Some(0) {
            return Err(SlideStreamError::configuration(
                "max_tokens must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Deck generation service.
pub struct GenerationService {
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn AuthProvider>,
    config: Arc<SlideStreamConfig>,
    metrics: Option<Arc<dyn MetricsCollector>>,
}

impl GenerationService {
    /// Creates a new generation service.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth: Arc<dyn AuthProvider>,
        config: Arc<SlideStreamConfig>,
    ) -> Self {
        Self {
            transport,
            auth,
            config,
            metrics: None,
        }
    }

    /// Reports model attempts and session outcomes to `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Opens a streaming generation and returns its event stream.
    ///
    /// Models are tried in order. A transport failure or a non-2xx status
    /// moves on to the next model; once a stream is open it is never
    /// retried.
    ///
    /// # Errors
    ///
    /// `AllModelsFailed` when no model opened a stream, with one entry per
    /// attempt.
    #[instrument(skip(self, request), fields(provider = ?self.config.provider))]
    pub async fn stream_deck(
        &self,
        request: GenerationRequest,
    ) -> SlideStreamResult<DeckEventStream> {
        request.validate()?;

        let models = request.models.as_ref().unwrap_or(&self.config.models);
        let mut attempts = Vec::with_capacity(models.len());

        for model in models {
            let http_request = self.build_request(&request, model)?;
            log_request("POST", &http_request.path, model);
            let started = Instant::now();

            match self.transport.send_streaming(http_request).await {
                Ok(response) if response.is_success() => {
                    log_response(response.status, elapsed_ms(started), model);
                    self.record_attempt(model, true);
                    tracing::info!(model = %model, "Opened generation stream");

                    let stream =
                        DeckEventStream::new(response.stream, self.config.session_options());
                    return Ok(match &self.metrics {
                        Some(metrics) => stream.with_metrics(Arc::clone(metrics)),
                        None => stream,
                    });
                }
                Ok(response) => {
                    let status = response.status;
                    log_response(status, elapsed_ms(started), model);
                    let body = response.read_text(ERROR_BODY_LIMIT).await;
                    tracing::warn!(model = %model, status, "Model rejected request, trying next");
                    self.record_attempt(model, false);
                    attempts.push(format!("{}: HTTP {}: {}", model, status, body.trim()));
                }
                Err(e) => {
                    tracing::warn!(model = %model, error = %e, "Model request failed, trying next");
                    self.record_attempt(model, false);
                    attempts.push(format!("{}: {}", model, e));
                }
            }
        }

        tracing::error!(attempts = attempts.len(), "All models failed");
        Err(SlideStreamError::AllModelsFailed { attempts })
    }

    fn record_attempt(&self, model: &str, success: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_model_attempt(model, success);
        }
    }

    /// Builds the provider-specific streaming request for `model`.
    pub fn build_request(
        &self,
        request: &GenerationRequest,
        model: &str,
    ) -> SlideStreamResult<HttpRequest> {
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        let system = request.system.as_deref();

        let (path, body) = match self.config.provider {
            ProviderKind::BedrockConverse => {
                let model_id: String =
                    url::form_urlencoded::byte_serialize(model.as_bytes()).collect();
                (
                    format!("model/{}/converse-stream", model_id),
                    bedrock_body(&request.prompt, system, max_tokens),
                )
            }
            ProviderKind::Anthropic => (
                "messages".to_string(),
                anthropic_body(model, &request.prompt, system, max_tokens),
            ),
            ProviderKind::OpenAiCompatible => (
                "chat/completions".to_string(),
                openai_body(model, &request.prompt, system, max_tokens),
            ),
        };

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        match self.config.provider {
            ProviderKind::BedrockConverse => {
                headers.insert(
                    "Accept".to_string(),
                    "application/vnd.amazon.eventstream".to_string(),
                );
            }
            ProviderKind::Anthropic => {
                headers.insert("Accept".to_string(), "text/event-stream".to_string());
                headers.insert("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string());
            }
            ProviderKind::OpenAiCompatible => {
                headers.insert("Accept".to_string(), "text/event-stream".to_string());
            }
        }
        for (name, value) in &self.config.custom_headers {
            headers.insert(name.clone(), value.clone());
        }
        self.auth.apply_auth(&mut headers);

        Ok(HttpRequest {
            path,
            headers,
            body: Some(serde_json::to_vec(&body)?),
            timeout: Some(self.config.timeout),
        })
    }
}

impl std::fmt::Debug for GenerationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn bedrock_body(prompt: &str, system: Option<&str>, max_tokens: u32) -> Value {
    let mut body = json!({
        "messages": [{"role": "user", "content": [{"text": prompt}]}],
        "inferenceConfig": {"maxTokens": max_tokens},
    });
    if let Some(system) = system {
        body["system"] = json!([{"text": system}]);
    }
    body
}

fn anthropic_body(model: &str, prompt: &str, system: Option<&str>, max_tokens: u32) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "stream": true,
        "messages": [{"role": "user", "content": prompt}],
    });
    if let Some(system) = system {
        body["system"] = json!(system);
    }
    body
}

fn openai_body(model: &str, prompt: &str, system: Option<&str>, max_tokens: u32) -> Value {
    let mut messages = Vec::new();
    if let Some(system) = system {
        messages.push(json!({"role": "system", "content": system}));
    }
    messages.push(json!({"role": "user", "content": prompt}));
    json!({
        "model": model,
        "max_tokens": max_tokens,
        "stream": true,
        "messages": messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiKeyAuth;
    use crate::mocks::MockTransport;
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;

    fn service(provider: ProviderKind, transport: Arc<MockTransport>) -> GenerationService {
        let config = SlideStreamConfig::builder()
            .api_key("test-key")
            .provider(provider)
            .models(["model-a", "model-b"])
            .max_tokens(1000)
            .build()
            .unwrap();
        let auth = ApiKeyAuth::for_provider(provider, SecretString::new("test-key".to_string()));
        GenerationService::new(transport, Arc::new(auth), Arc::new(config))
    }

    fn body_of(request: &HttpRequest) -> Value {
        serde_json::from_slice(request.body.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn test_bedrock_request_shape() {
        let svc = service(ProviderKind::BedrockConverse, Arc::new(MockTransport::new()));
        let request = svc
            .build_request(&GenerationRequest::new("Make slides"), "us.anthropic.claude-v1:0")
            .unwrap();

        assert_eq!(request.path, "model/us.anthropic.claude-v1%3A0/converse-stream");
        assert_eq!(
            body_of(&request),
            json!({
                "messages": [{"role": "user", "content": [{"text": "Make slides"}]}],
                "inferenceConfig": {"maxTokens": 1000}
            })
        );
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Bearer test-key")
        );
    }

    #[test]
    fn test_anthropic_request_shape() {
        let svc = service(ProviderKind::Anthropic, Arc::new(MockTransport::new()));
        let request = svc
            .build_request(
                &GenerationRequest::new("Make slides").with_system("JSON only").with_max_tokens(50),
                "model-a",
            )
            .unwrap();

        assert_eq!(request.path, "messages");
        assert_eq!(
            request.headers.get("anthropic-version").map(String::as_str),
            Some(ANTHROPIC_VERSION)
        );
        assert_eq!(request.headers.get("x-api-key").map(String::as_str), Some("test-key"));
        let body = body_of(&request);
        assert_eq!(body["model"], "model-a");
        assert_eq!(body["max_tokens"], 50);
        assert_eq!(body["stream"], true);
        assert_eq!(body["system"], "JSON only");
    }

    #[test]
    fn test_openai_request_shape() {
        let svc = service(ProviderKind::OpenAiCompatible, Arc::new(MockTransport::new()));
        let request = svc
            .build_request(&GenerationRequest::new("Make slides").with_system("JSON only"), "model-b")
            .unwrap();

        assert_eq!(request.path, "chat/completions");
        let body = body_of(&request);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "Make slides");
    }

    #[test]
    fn test_request_validation() {
        assert!(GenerationRequest::new("  ").validate().is_err());
        assert!(GenerationRequest::new("x").with_models(Vec::<String>::new()).validate().is_err());
        assert!(GenerationRequest::new("x").with_max_tokens(0).validate().is_err());
        assert!(GenerationRequest::new("x").validate().is_ok());
    }

    #[tokio::test]
    async fn test_falls_back_to_next_model() {
        let transport = Arc::new(
            MockTransport::new()
                .with_error_response(503, "overloaded")
                .with_streaming_response(vec![
                    "data: {\"choices\":[{\"delta\":{\"content\":\"{\\\"designTheme\\\":{},\\\"slides\\\":[{\\\"title\\\":\\\"A\\\"}]}\"}}]}\n\n",
                    "data: [DONE]\n\n",
                ]),
        );
        let svc = service(ProviderKind::OpenAiCompatible, Arc::clone(&transport));

        let doc = svc
            .stream_deck(GenerationRequest::new("Make slides"))
            .await
            .unwrap()
            .collect_document()
            .await
            .unwrap();

        assert_eq!(doc.slide_count(), 1);
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(body_of(&requests[0])["model"], "model-a");
        assert_eq!(body_of(&requests[1])["model"], "model-b");
    }

    #[tokio::test]
    async fn test_all_models_failed() {
        let transport = Arc::new(
            MockTransport::new()
                .with_error_response(500, "boom")
                .with_transport_error("connection refused"),
        );
        let svc = service(ProviderKind::Anthropic, transport);

        let err = svc
            .stream_deck(GenerationRequest::new("Make slides"))
            .await
            .unwrap_err();

        match err {
            SlideStreamError::AllModelsFailed { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[0].starts_with("model-a: HTTP 500"));
                assert!(attempts[1].contains("connection refused"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
