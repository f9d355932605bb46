//! Mock implementations for testing.
//!
//! Provides a mock transport that replays queued streaming bodies chunk by
//! chunk, plus fixtures that frame deck text the way each provider does.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::auth::AuthProvider;
use crate::errors::SlideStreamError;
use crate::transport::{ByteStream, HttpRequest, HttpTransport, StreamingResponse, TransportError};

/// One step of a mock response body.
#[derive(Debug, Clone)]
pub enum MockChunk {
    /// Bytes delivered to the reader.
    Data(Bytes),
    /// The connection fails at this point.
    Fail(TransportError),
}

impl From<&str> for MockChunk {
    fn from(value: &str) -> Self {
        MockChunk::Data(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<String> for MockChunk {
    fn from(value: String) -> Self {
        MockChunk::Data(Bytes::from(value))
    }
}

impl From<Vec<u8>> for MockChunk {
    fn from(value: Vec<u8>) -> Self {
        MockChunk::Data(Bytes::from(value))
    }
}

/// A mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// A response whose body arrives in `chunks`.
    Stream {
        /// HTTP status code.
        status: u16,
        /// Response headers.
        headers: HashMap<String, String>,
        /// Body chunks, in delivery order.
        chunks: Vec<MockChunk>,
        /// Pause before each chunk.
        delay: Option<Duration>,
    },
    /// The request fails before any response arrives.
    Failure(TransportError),
}

impl MockResponse {
    /// Creates a 200 response streaming `chunks`.
    pub fn streaming<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<MockChunk>,
    {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "text/event-stream".to_string());
        MockResponse::Stream {
            status: 200,
            headers,
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: None,
        }
    }

    /// Creates an error response with a JSON error body.
    pub fn error(status: u16, message: &str) -> Self {
        let error = serde_json::json!({
            "error": {
                "message": message,
                "type": "error"
            }
        });
        let body = serde_json::to_vec(&error).unwrap_or_default();
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        MockResponse::Stream {
            status,
            headers,
            chunks: vec![MockChunk::Data(Bytes::from(body))],
            delay: None,
        }
    }

    /// Creates a connection failure.
    pub fn connection_error(message: impl Into<String>) -> Self {
        MockResponse::Failure(TransportError::Connection {
            message: message.into(),
        })
    }

    /// Appends a mid-body transport failure.
    pub fn then_fail(mut self, error: TransportError) -> Self {
        if let MockResponse::Stream { chunks, .. } = &mut self {
            chunks.push(MockChunk::Fail(error));
        }
        self
    }

    /// Pauses before every chunk.
    pub fn with_delay(mut self, pause: Duration) -> Self {
        if let MockResponse::Stream { delay, .. } = &mut self {
            *delay = Some(pause);
        }
        self
    }
}

/// Mock HTTP transport for testing.
///
/// Responses are served in the order they were queued; once the queue is
/// empty every request gets a 500.
pub struct MockTransport {
    responses: Mutex<Vec<MockResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues a response.
    pub fn queue(&self, response: MockResponse) {
        lock(&self.responses).push(response);
    }

    /// Queues a response, builder style.
    pub fn with_response(self, response: MockResponse) -> Self {
        self.queue(response);
        self
    }

    /// Queues a 200 response streaming `chunks`.
    pub fn with_streaming_response<I, C>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<MockChunk>,
    {
        self.with_response(MockResponse::streaming(chunks))
    }

    /// Queues an error response.
    pub fn with_error_response(self, status: u16, message: &str) -> Self {
        self.with_response(MockResponse::error(status, message))
    }

    /// Queues a connection failure.
    pub fn with_transport_error(self, message: impl Into<String>) -> Self {
        self.with_response(MockResponse::connection_error(message))
    }

    /// Gets all recorded requests.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }

    /// Gets the last recorded request.
    pub fn last_request(&self) -> Option<HttpRequest> {
        lock(&self.requests).last().cloned()
    }

    /// Returns the number of requests made.
    pub fn request_count(&self) -> usize {
        lock(&self.requests).len()
    }

    fn next_response(&self) -> MockResponse {
        let mut responses = lock(&self.responses);
        if responses.is_empty() {
            MockResponse::error(500, "No mock response configured")
        } else {
            responses.remove(0)
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn replay(chunks: Vec<MockChunk>, delay: Option<Duration>) -> ByteStream {
    Box::pin(async_stream::stream! {
        for chunk in chunks {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            match chunk {
                MockChunk::Data(bytes) => yield Ok(bytes),
                MockChunk::Fail(error) => {
                    yield Err(error);
                    break;
                }
            }
        }
    })
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send_streaming(
        &self,
        request: HttpRequest,
    ) -> Result<StreamingResponse, TransportError> {
        lock(&self.requests).push(request);

        match self.next_response() {
            MockResponse::Stream {
                status,
                headers,
                chunks,
                delay,
            } => Ok(StreamingResponse {
                status,
                headers,
                stream: replay(chunks, delay),
            }),
            MockResponse::Failure(error) => Err(error),
        }
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("request_count", &self.request_count())
            .finish()
    }
}

/// Mock auth provider for testing.
pub struct MockAuth {
    api_key: String,
}

impl MockAuth {
    /// Creates a new mock auth provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl Default for MockAuth {
    fn default() -> Self {
        Self::new("mock-test-key")
    }
}

impl AuthProvider for MockAuth {
    fn apply_auth(&self, headers: &mut HashMap<String, String>) {
        headers.insert(
            "Authorization".to_string(),
            format!("Bearer {}", self.api_key),
        );
    }

    fn scheme(&self) -> &str {
        "Bearer"
    }

    fn validate(&self) -> Result<(), SlideStreamError> {
        Ok(())
    }
}

impl std::fmt::Debug for MockAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAuth").finish()
    }
}

/// Fixtures framing deck text as provider bodies.
pub mod fixtures {
    use serde_json::json;

    /// A three-slide deck, including a chart slide.
    pub fn sample_deck() -> String {
        json!({
            "suggestedThemeKey": "ocean",
            "designTheme": {
                "name": "Ocean",
                "colors": {"primary": "#0077b6", "background": "#ffffff"},
                "fonts": {"heading": "Inter", "body": "Inter"}
            },
            "slides": [
                {"type": "title", "title": "Quarterly Review", "subtitle": "Q3"},
                {"type": "content", "title": "Highlights", "content": ["Revenue up", "Churn down"]},
                {
                    "type": "chart",
                    "title": "Revenue",
                    "chart": {
                        "type": "bar",
                        "data": {
                            "labels": ["Jul", "Aug", "Sep"],
                            "datasets": [{"label": "Revenue", "data": [10, 12, 15]}]
                        }
                    }
                }
            ]
        })
        .to_string()
    }

    /// Splits `text` into pieces of at most `size` bytes.
    ///
    /// Boundaries fall on bytes, so multi-byte characters may be split.
    pub fn byte_chunks(text: &str, size: usize) -> Vec<Vec<u8>> {
        text.as_bytes()
            .chunks(size.max(1))
            .map(<[u8]>::to_vec)
            .collect()
    }

    /// Splits `text` into pieces of at most `size` characters.
    pub fn char_pieces(text: &str, size: usize) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(size.max(1))
            .map(|piece| piece.iter().collect())
            .collect()
    }

    /// Frames `text` as OpenAI-style SSE deltas followed by `[DONE]`.
    pub fn openai_sse(text: &str, piece_chars: usize) -> String {
        let mut body = String::new();
        for piece in char_pieces(text, piece_chars) {
            let event = json!({"choices": [{"index": 0, "delta": {"content": piece}}]});
            body.push_str(&format!("data: {}\n\n", event));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    /// Frames `text` as Anthropic Messages SSE events.
    pub fn anthropic_sse(text: &str, piece_chars: usize) -> String {
        let mut body = String::from(
            "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_1\"}}\n\n",
        );
        body.push_str("event: ping\ndata: {\"type\":\"ping\"}\n\n");
        for piece in char_pieces(text, piece_chars) {
            let event = json!({
                "type": "content_block_delta",
                "index": 0,
                "delta": {"type": "text_delta", "text": piece}
            });
            body.push_str(&format!("event: content_block_delta\ndata: {}\n\n", event));
        }
        body.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
        body
    }

    /// Frames `text` as Bedrock `converse-stream` envelopes between binary
    /// preludes and checksums.
    pub fn bedrock_envelopes(text: &str, piece_chars: usize) -> Vec<u8> {
        let mut body = Vec::new();
        for piece in char_pieces(text, piece_chars) {
            let envelope = json!({"contentBlockIndex": 0, "delta": {"text": piece}, "p": "abcd"});
            body.extend_from_slice(&[0x00, 0x00, 0x00, 0x9f, 0x00, 0x00, 0x00, 0x57, 0xd2, 0x8f]);
            body.extend_from_slice(b":event-type\x07\x00\x11contentBlockDelta");
            body.extend_from_slice(envelope.to_string().as_bytes());
            body.extend_from_slice(&[0xff, 0x13, 0xa4, 0x01]);
        }
        body.extend_from_slice(b":event-type\x07\x00\x0cmessageStop{\"stopReason\":\"end_turn\"}");
        body
    }
}
