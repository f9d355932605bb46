//! Emission cursor over the slides of successive parses.

use crate::types::{DeckDocument, DesignTheme, SlideRecord};

/// A slide that has not been emitted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSlide {
    /// Zero-based position in the slides array.
    pub index: usize,
    /// The slide record.
    pub slide: SlideRecord,
}

/// Returns slides at or after `cursor` that are ready to emit, and the
/// advanced cursor.
///
/// Slides are taken in order and the walk stops at the first slide that is
/// not eligible, so a later slide is never emitted ahead of an earlier one.
/// A slide that parses but has neither `title` nor `type` therefore holds the
/// cursor until a newer parse fills it in.
pub fn check_for_new_slides(doc: &DeckDocument, cursor: usize) -> (Vec<NewSlide>, usize) {
    let mut fresh = Vec::new();
    let mut next = cursor;

    for slide in doc.slides().iter().skip(cursor) {
        if !slide.is_eligible() {
            break;
        }
        fresh.push(NewSlide {
            index: next,
            slide: slide.clone(),
        });
        next += 1;
    }

    (fresh, next)
}

/// Per-session emission state: the slide cursor and the emit-once theme flag.
#[derive(Debug, Clone, Default)]
pub struct SlideBoundaryTracker {
    cursor: usize,
    theme_emitted: bool,
}

impl SlideBoundaryTracker {
    /// Creates a tracker with nothing emitted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slides emitted so far.
    pub fn emitted(&self) -> usize {
        self.cursor
    }

    /// True once the theme has been emitted.
    pub fn theme_emitted(&self) -> bool {
        self.theme_emitted
    }

    /// Returns the document's theme the first time one is seen.
    ///
    /// Every later call returns `None`, whatever the document holds.
    pub fn take_theme(&mut self, doc: &DeckDocument) -> Option<DesignTheme> {
        if self.theme_emitted {
            if doc.design_theme.is_some() {
                tracing::trace!("Ignoring theme after first emission");
            }
            return None;
        }
        let theme = doc.design_theme.clone()?;
        self.theme_emitted = true;
        Some(theme)
    }

    /// Returns the slides of `doc` beyond the cursor and advances it.
    ///
    /// Nothing is returned before the theme has been emitted.
    pub fn advance(&mut self, doc: &DeckDocument) -> Vec<NewSlide> {
        if !self.theme_emitted {
            return Vec::new();
        }
        let (fresh, cursor) = check_for_new_slides(doc, self.cursor);
        self.cursor = cursor;
        fresh
    }
}
