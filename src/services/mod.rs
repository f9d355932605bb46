//! Service implementations.
//!
//! Provides the deck generation service that opens a provider stream with
//! model fallback.

mod generation;

pub use generation::{GenerationRequest, GenerationService};
