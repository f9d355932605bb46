//! Integration tests for the generation service over HTTP.

use futures::StreamExt;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use slide_stream::auth::ApiKeyAuth;
use slide_stream::mocks::{fixtures, MockResponse, MockTransport};
use slide_stream::observability::{InMemoryMetricsCollector, MetricsCollector};
use slide_stream::transport::{HttpTransportImpl, TransportError};
use slide_stream::{
    DeckEvent, GenerationRequest, GenerationService, ProviderKind, SlideStreamClient,
    SlideStreamConfig, SlideStreamError,
};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Helper to create a service talking to `server`.
fn create_service(
    server: &MockServer,
    provider: ProviderKind,
    models: &[&str],
) -> GenerationService {
    let config = SlideStreamConfig::builder()
        .api_key("test-key")
        .provider(provider)
        .models(models.iter().copied())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap();
    let transport = HttpTransportImpl::new(server.uri(), config.timeout).unwrap();
    let auth = ApiKeyAuth::for_provider(provider, SecretString::new("test-key".to_string()));

    GenerationService::new(Arc::new(transport), Arc::new(auth), Arc::new(config))
}

fn kinds(events: &[DeckEvent]) -> Vec<&'static str> {
    events.iter().map(DeckEvent::kind).collect()
}

#[tokio::test]
async fn test_anthropic_stream_over_http() {
    // Arrange
    let server = MockServer::start().await;
    let sse = fixtures::anthropic_sse(&fixtures::sample_deck(), 12);
    Mock::given(method("POST"))
        .and(path("/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .and(body_partial_json(serde_json::json!({"model": "claude-test", "stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;
    let service = create_service(&server, ProviderKind::Anthropic, &["claude-test"]);

    // Act
    let stream = service
        .stream_deck(GenerationRequest::new("Quarterly review deck"))
        .await
        .unwrap();
    let events: Vec<DeckEvent> = stream.collect().await;

    // Assert
    assert_eq!(kinds(&events), vec!["theme", "slide", "slide", "slide", "complete", "done"]);
    match &events[0] {
        DeckEvent::Theme {
            suggested_theme_key,
            ..
        } => assert_eq!(suggested_theme_key.as_deref(), Some("ocean")),
        other => panic!("expected theme, got {:?}", other),
    }
}

#[tokio::test]
async fn test_bedrock_stream_over_http() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path_regex(r"^/model/.+/converse-stream$"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({"inferenceConfig": {"maxTokens": 16000}})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            fixtures::bedrock_envelopes(&fixtures::sample_deck(), 10),
            "application/vnd.amazon.eventstream",
        ))
        .mount(&server)
        .await;
    let service =
        create_service(&server, ProviderKind::BedrockConverse, &["amazon.nova-lite-v1:0"]);

    // Act
    let doc = service
        .stream_deck(GenerationRequest::new("Quarterly review deck"))
        .await
        .unwrap()
        .collect_document()
        .await;

    // Assert
    let doc = doc.unwrap();
    assert_eq!(doc.slide_count(), 3);
    assert_eq!(doc.slides()[2].title(), Some("Revenue"));
}

#[tokio::test]
async fn test_openai_fallback_after_server_error() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"model": "primary"})))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"model": "backup"})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            fixtures::openai_sse(&fixtures::sample_deck(), 30),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;
    let service = create_service(&server, ProviderKind::OpenAiCompatible, &["primary", "backup"]);

    // Act
    let doc = service
        .stream_deck(GenerationRequest::new("Quarterly review deck"))
        .await
        .unwrap()
        .collect_document()
        .await
        .unwrap();

    // Assert
    assert_eq!(doc.slide_count(), 3);
}

#[tokio::test]
async fn test_all_models_failed_lists_every_attempt() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
        .expect(2)
        .mount(&server)
        .await;
    let service = create_service(&server, ProviderKind::OpenAiCompatible, &["a", "b"]);

    // Act
    let result = service
        .stream_deck(GenerationRequest::new("Quarterly review deck"))
        .await;

    // Assert
    match result {
        Err(SlideStreamError::AllModelsFailed { attempts }) => {
            assert_eq!(attempts.len(), 2);
            assert!(attempts[0].starts_with("a: HTTP 403"));
            assert!(attempts[1].contains("access denied"));
        }
        other => panic!("expected AllModelsFailed, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_request_override_models_and_system_prompt() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(serde_json::json!({"model": "override", "max_tokens": 512})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            fixtures::openai_sse(&fixtures::sample_deck(), 50),
            "text/event-stream",
        ))
        .expect(1)
        .mount(&server)
        .await;
    let service = create_service(&server, ProviderKind::OpenAiCompatible, &["configured"]);
    let request = GenerationRequest::new("Quarterly review deck")
        .with_system("Reply with JSON only")
        .with_models(["override"])
        .with_max_tokens(512);

    // Act
    let result = service.stream_deck(request).await;

    // Assert
    assert!(result.is_ok());
    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body["messages"][0]["role"], "system");
    assert_eq!(body["messages"][0]["content"], "Reply with JSON only");
    assert_eq!(body["messages"][1]["content"], "Quarterly review deck");
}

#[tokio::test]
async fn test_mid_stream_disconnect_surfaces_error_event() {
    // Arrange
    let sse = fixtures::openai_sse(&fixtures::sample_deck(), 8);
    let (head, _) = sse.split_at(sse.len() / 2);
    let transport = Arc::new(MockTransport::new().with_response(
        MockResponse::streaming(fixtures::byte_chunks(head, 64)).then_fail(
            TransportError::Connection {
                message: "connection reset by peer".to_string(),
            },
        ),
    ));
    let metrics = Arc::new(InMemoryMetricsCollector::new());
    let client = SlideStreamClient::builder()
        .api_key("sk-test")
        .provider(ProviderKind::OpenAiCompatible)
        .model("gpt-test")
        .transport(transport)
        .metrics(metrics.clone())
        .build()
        .unwrap();

    // Act
    let events: Vec<DeckEvent> = client.stream_deck("deck").await.unwrap().collect().await;

    // Assert
    assert_eq!(events.last().map(DeckEvent::kind), Some("error"));
    assert!(!kinds(&events).contains(&"complete"));
    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot.sessions_failed, 1);
    assert_eq!(snapshot.errors.get("network"), Some(&1));
}

#[tokio::test]
async fn test_metrics_track_model_attempts() {
    // Arrange
    let transport = Arc::new(
        MockTransport::new()
            .with_transport_error("refused")
            .with_streaming_response(vec![fixtures::openai_sse(&fixtures::sample_deck(), 40)]),
    );
    let metrics = Arc::new(InMemoryMetricsCollector::new());
    let client = SlideStreamClient::builder()
        .api_key("sk-test")
        .provider(ProviderKind::OpenAiCompatible)
        .model("first")
        .model("second")
        .transport(transport)
        .metrics(metrics.clone())
        .build()
        .unwrap();

    // Act
    let doc = client
        .generate_deck(GenerationRequest::new("deck"))
        .await
        .unwrap();

    // Assert
    assert_eq!(doc.slide_count(), 3);
    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot.models.get("first"), Some(&(0, 1)));
    assert_eq!(snapshot.models.get("second"), Some(&(1, 0)));
    assert_eq!(snapshot.sessions_completed, 1);
    assert_eq!(snapshot.slides_streamed + snapshot.slides_flushed, 3);
}
