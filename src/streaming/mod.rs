//! Streaming deck reconstruction.
//!
//! A provider response body flows through four stages:
//!
//! 1. [`StreamDecoder`] turns raw chunks into model text, whatever the
//!    transport framing.
//! 2. [`DeckSession`] appends the text to a buffer and finds complete slides
//!    with the resumable [`ObjectScanner`] and the [`SlideBoundaryTracker`].
//! 3. At end of stream the [`Reconciler`] recovers a document from the
//!    buffer, repairing it if needed.
//! 4. [`DeckEventStream`] exposes the resulting [`DeckEvent`]s as an async
//!    stream.

mod decoder;
mod events;
mod extractor;
mod reconcile;
mod session;
mod stream;
mod tracker;

pub use decoder::{
    extract_text_delta, EnvelopeFramer, EventStreamFramer, Frame, FrameFormat, Framer,
    LineSplitter, PlainFramer, StreamDecoder, Utf8ChunkDecoder, BEDROCK_DELTA_MARKER,
    DATA_PREFIX, DONE_SENTINEL,
};
pub use events::DeckEvent;
pub use extractor::{extract_complete_object, ExtractedObject, ObjectScanner, ObjectSpan};
pub use reconcile::{
    finalize, BalancedSlice, KeyTypo, NoiseTrim, Reconciled, Reconciler, RepairHeuristic,
    StrayComma,
};
pub use session::{DeckSession, SessionOptions, SessionState, SessionStats, SnapshotMode};
pub use stream::{DeckEventStream, CANCELLED_KIND};
pub use tracker::{check_for_new_slides, NewSlide, SlideBoundaryTracker};
