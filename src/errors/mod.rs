//! Error types for slide stream sessions.
//!
//! Covers transport failures, byte decoding failures, and the terminal
//! reconciliation failures of a streaming session. An object that is simply
//! not complete yet is never represented here: incomplete input is the normal
//! state of a stream and is modelled as `None` by the extractor.

use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportError;

/// Number of characters kept when previewing unparsed text in errors.
pub const PREVIEW_CHARS: usize = 500;

/// Result type alias for slide stream operations.
pub type SlideStreamResult<T> = Result<T, SlideStreamError>;

/// Error type for slide stream operations.
#[derive(Debug, Clone, Error)]
pub enum SlideStreamError {
    /// Configuration error (missing API key, bad base URL, etc.)
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue.
        message: String,
    },

    /// Network/connection error.
    #[error("Network error: {message}")]
    Network {
        /// Error message.
        message: String,
    },

    /// Timeout error.
    #[error("Request timeout after {timeout:?}")]
    Timeout {
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Provider returned a non-success status.
    #[error("Server error (HTTP {status_code}): {message}")]
    Server {
        /// HTTP status code.
        status_code: u16,
        /// Error message or response body excerpt.
        message: String,
    },

    /// Every model in the fallback chain failed to open a stream.
    #[error("All models failed: {}", attempts.join("; "))]
    AllModelsFailed {
        /// One entry per attempted model, `model: reason`.
        attempts: Vec<String>,
    },

    /// Raw bytes could not be decoded as UTF-8.
    #[error("Decode error: {message}")]
    Decode {
        /// Error message.
        message: String,
    },

    /// Stream error reported by the transport mid-session.
    #[error("Stream error: {message}")]
    Stream {
        /// Error message.
        message: String,
    },

    /// The accumulated buffer could not be reconstructed into JSON.
    #[error("Parse error: {message} (preview: {preview})")]
    Parse {
        /// Error message.
        message: String,
        /// Leading excerpt of the text that failed to parse.
        preview: String,
    },

    /// Parsed JSON does not have the shape of a slide deck.
    #[error("Invalid document: {message} (preview: {preview})")]
    InvalidDocument {
        /// Error message.
        message: String,
        /// Leading excerpt of the offending JSON.
        preview: String,
    },

    /// Serialization/deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },
}

impl SlideStreamError {
    /// Returns true if a caller could reasonably retry the whole session.
    ///
    /// Reconciliation failures are reported as retryable too: the usual
    /// remedy is to ask the model again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SlideStreamError::Network { .. }
                | SlideStreamError::Timeout { .. }
                | SlideStreamError::Server { status_code: 500..=504, .. }
                | SlideStreamError::Stream { .. }
                | SlideStreamError::AllModelsFailed { .. }
                | SlideStreamError::Parse { .. }
                | SlideStreamError::InvalidDocument { .. }
        )
    }

    /// Returns true for errors raised while talking to the provider.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SlideStreamError::Network { .. }
                | SlideStreamError::Timeout { .. }
                | SlideStreamError::Server { .. }
                | SlideStreamError::Stream { .. }
                | SlideStreamError::AllModelsFailed { .. }
        )
    }

    /// Short stable name of the variant, used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            SlideStreamError::Configuration { .. } => "configuration",
            SlideStreamError::Network { .. } => "network",
            SlideStreamError::Timeout { .. } => "timeout",
            SlideStreamError::Server { .. } => "server",
            SlideStreamError::AllModelsFailed { .. } => "all_models_failed",
            SlideStreamError::Decode { .. } => "decode",
            SlideStreamError::Stream { .. } => "stream",
            SlideStreamError::Parse { .. } => "parse",
            SlideStreamError::InvalidDocument { .. } => "invalid_document",
            SlideStreamError::Serialization { .. } => "serialization",
        }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        SlideStreamError::Configuration {
            message: message.into(),
        }
    }

    /// Creates a parse error carrying a preview of `text`.
    pub fn parse(message: impl Into<String>, text: &str) -> Self {
        SlideStreamError::Parse {
            message: message.into(),
            preview: preview(text),
        }
    }

    /// Creates an invalid document error carrying a preview of `text`.
    pub fn invalid_document(message: impl Into<String>, text: &str) -> Self {
        SlideStreamError::InvalidDocument {
            message: message.into(),
            preview: preview(text),
        }
    }
}

/// Returns at most [`PREVIEW_CHARS`] characters of `text`.
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

impl From<TransportError> for SlideStreamError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout { timeout } => SlideStreamError::Timeout { timeout },
            TransportError::Connection { message } | TransportError::Tls { message } => {
                SlideStreamError::Network { message }
            }
            TransportError::InvalidResponse { message } => SlideStreamError::Stream { message },
        }
    }
}

impl From<reqwest::Error> for SlideStreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SlideStreamError::Timeout {
                timeout: Duration::ZERO,
            }
        } else if let Some(status) = err.status() {
            SlideStreamError::Server {
                status_code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            SlideStreamError::Network {
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for SlideStreamError {
    fn from(err: serde_json::Error) -> Self {
        SlideStreamError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for SlideStreamError {
    fn from(err: url::ParseError) -> Self {
        SlideStreamError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}
