//! Events delivered to the consumer of a session.

use serde::{Deserialize, Serialize};

use super::decoder::{DATA_PREFIX, DONE_SENTINEL};
use crate::types::{DeckDocument, DesignTheme, SlideRecord};

/// One event of a session, in delivery order.
///
/// Serialized with a `type` discriminator, e.g.
/// `{"type":"slide","slide":{...},"index":0,"current":1,"total":3}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeckEvent {
    /// The design theme, emitted at most once.
    Theme {
        /// Theme object.
        theme: DesignTheme,
        /// Suggested theme preset, if the model named one.
        #[serde(rename = "suggestedThemeKey", default, skip_serializing_if = "Option::is_none")]
        suggested_theme_key: Option<String>,
    },
    /// A newly completed slide.
    Slide {
        /// Slide record.
        slide: SlideRecord,
        /// Zero-based slide index.
        index: usize,
        /// One-based position, `index + 1`.
        current: usize,
        /// Slides known in the document the slide came from.
        total: usize,
    },
    /// The reconciled document.
    Complete {
        /// Full document after finalization.
        data: DeckDocument,
    },
    /// Terminal failure.
    Error {
        /// Error message, including a preview of unparsed text when relevant.
        message: String,
    },
    /// Terminal sentinel; nothing follows.
    Done,
}

impl DeckEvent {
    /// Builds a slide event.
    pub fn slide(slide: SlideRecord, index: usize, total: usize) -> Self {
        DeckEvent::Slide {
            slide,
            index,
            current: index + 1,
            total,
        }
    }

    /// True for `error` and the terminal sentinel.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeckEvent::Error { .. } | DeckEvent::Done)
    }

    /// Event name, matching the serialized `type`.
    pub fn kind(&self) -> &'static str {
        match self {
            DeckEvent::Theme { .. } => "theme",
            DeckEvent::Slide { .. } => "slide",
            DeckEvent::Complete { .. } => "complete",
            DeckEvent::Error { .. } => "error",
            DeckEvent::Done => "done",
        }
    }

    /// Encodes the event as one server-sent event frame.
    ///
    /// The sentinel is written as `data: [DONE]`, everything else as its JSON.
    pub fn to_sse_frame(&self) -> String {
        if matches!(self, DeckEvent::Done) {
            return format!("{} {}\n\n", DATA_PREFIX, DONE_SENTINEL);
        }
        match serde_json::to_string(self) {
            Ok(json) => format!("{} {}\n\n", DATA_PREFIX, json),
            Err(e) => {
                tracing::error!(error = %e, kind = self.kind(), "Failed to serialize event");
                let fallback = serde_json::json!({"type": "error", "message": e.to_string()});
                format!("{} {}\n\n", DATA_PREFIX, fallback)
            }
        }
    }
}
