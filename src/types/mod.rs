//! Type definitions for slide deck documents.

pub mod deck;
pub mod validation;

pub use deck::{Chart, ChartData, Dataset, DeckDocument, DesignTheme, SlideRecord};
pub use validation::{fix_chart_slides, sanitize_deck, split_oversized_slides, validate_deck};
