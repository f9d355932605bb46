//! Slide Stream
//!
//! Reconstructs a slide deck from an LLM token stream while the model is
//! still writing it. The model emits one JSON document (a design theme plus
//! an ordered list of slides); this crate decodes the provider's streaming
//! response, finds each slide the moment its JSON object closes, and emits
//! it as an event. When the stream ends the buffer is reconciled into a
//! final document, repairing the malformations models commonly produce.
//!
//! # Features
//!
//! - **Incremental**: slides are emitted as soon as they are complete,
//!   exactly once and in order
//! - **Framing-agnostic**: SSE, Bedrock `converse-stream` envelopes, or
//!   plain text
//! - **Repair**: balanced-object slicing, key typo correction, stray comma
//!   and noise removal
//! - **Providers**: Bedrock, Anthropic and OpenAI-compatible endpoints with
//!   ordered model fallback
//! - **Observability**: structured logging and session metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use slide_stream::{DeckEvent, ProviderKind, SlideStreamClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = SlideStreamClient::builder()
//!         .api_key("sk-your-key")
//!         .provider(ProviderKind::OpenAiCompatible)
//!         .model("gpt-4o")
//!         .build()?;
//!
//!     let mut events = client.stream_deck("Ten slides on orbital mechanics").await?;
//!     while let Some(event) = events.next().await {
//!         match event {
//!             DeckEvent::Theme { theme, .. } => println!("theme: {:?}", theme.name()),
//!             DeckEvent::Slide { index, total, .. } => println!("slide {}/{}", index + 1, total),
//!             DeckEvent::Complete { data } => println!("done, {} slides", data.slide_count()),
//!             DeckEvent::Error { message } => eprintln!("failed: {}", message),
//!             DeckEvent::Done => break,
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Without a Provider
//!
//! A [`DeckSession`] can be fed bytes from any source:
//!
//! ```rust
//! use slide_stream::{DeckSession, FrameFormat, SessionOptions};
//!
//! let mut session = DeckSession::new(SessionOptions::new(FrameFormat::Plain));
//! let mut events = session.push_text(r#"{"designTheme":{"name":"Dusk"},"slides":[{"title":"One"},"#);
//! events.extend(session.push_text(r#"{"title":"Two"}]}"#));
//! events.extend(session.finish());
//! assert_eq!(events.last().map(|e| e.kind()), Some("done"));
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod config;
pub mod errors;
pub mod observability;
pub mod services;
pub mod streaming;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use client::{SlideStreamClient, SlideStreamClientBuilder};
pub use config::{ProviderKind, SlideStreamConfig, SlideStreamConfigBuilder};
pub use errors::{SlideStreamError, SlideStreamResult};
pub use services::{GenerationRequest, GenerationService};

// Streaming re-exports
pub use streaming::{
    finalize, DeckEvent, DeckEventStream, DeckSession, FrameFormat, Reconciler, SessionOptions,
    SessionState, SnapshotMode,
};

// Type re-exports
pub use types::{Chart, ChartData, Dataset, DeckDocument, DesignTheme, SlideRecord};

/// Mock implementations for testing.
pub mod mocks;
