//! Per-session state machine driving decoder, extractor, tracker and
//! reconciler.
//!
//! A session owns everything it mutates: the text buffer, the scanner, the
//! emission cursor and the theme flag. Two sessions never share state, so
//! each one can live in its own task.

use uuid::Uuid;

use super::decoder::{Frame, FrameFormat, StreamDecoder};
use super::events::DeckEvent;
use super::extractor::ObjectScanner;
use super::reconcile::Reconciler;
use super::tracker::{NewSlide, SlideBoundaryTracker};
use crate::errors::SlideStreamError;
use crate::types::DeckDocument;

/// When partial documents are parsed during streaming.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SnapshotMode {
    /// Parse only once the top-level object balances.
    #[default]
    Balanced,
    /// Also parse the prefix up to the last completed member or array
    /// element, closed with the matching brackets, while the object is open.
    Progressive,
}

impl std::str::FromStr for SnapshotMode {
    type Err = SlideStreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" => Ok(SnapshotMode::Balanced),
            "progressive" => Ok(SnapshotMode::Progressive),
            other => Err(SlideStreamError::configuration(format!(
                "Unknown snapshot mode: {}",
                other
            ))),
        }
    }
}

/// Options for a single session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Transport framing of the response body.
    pub frame_format: FrameFormat,
    /// Partial-parse strategy.
    pub snapshot_mode: SnapshotMode,
}

impl SessionOptions {
    /// Options for the given framing with balanced parsing.
    pub fn new(frame_format: FrameFormat) -> Self {
        Self {
            frame_format,
            snapshot_mode: SnapshotMode::default(),
        }
    }

    /// Sets the snapshot mode.
    pub fn with_snapshot_mode(mut self, mode: SnapshotMode) -> Self {
        self.snapshot_mode = mode;
        self
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No theme has been seen yet.
    AwaitingTheme,
    /// Theme emitted; slides are emitted as they complete.
    StreamingSlides,
    /// The transport ended and the buffer is being reconciled.
    Finalizing,
    /// `complete` and the sentinel have been emitted.
    Done,
    /// An `error` event has been emitted.
    Error,
}

impl SessionState {
    /// True once no further events can be produced.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Error)
    }
}

/// Counters describing how a session went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Slides emitted while the stream was still open.
    pub slides_streamed: usize,
    /// Slides emitted by the finalization flush.
    pub slides_flushed: usize,
    /// Transport frames skipped as malformed.
    pub malformed_frames: usize,
    /// Repair heuristic that recovered the final document, if any.
    pub repair_heuristic: Option<&'static str>,
    /// Bytes of model text accumulated.
    pub buffered_bytes: usize,
}

/// One streaming generation, from first byte to terminal event.
#[derive(Debug)]
pub struct DeckSession {
    id: Uuid,
    options: SessionOptions,
    state: SessionState,
    decoder: StreamDecoder,
    buffer: String,
    scanner: ObjectScanner,
    last_checkpoint: Option<usize>,
    deck_found: bool,
    tracker: SlideBoundaryTracker,
    reconciler: Reconciler,
    latest: Option<DeckDocument>,
    error: Option<SlideStreamError>,
    stats: SessionStats,
}

impl DeckSession {
    /// Creates a session.
    pub fn new(options: SessionOptions) -> Self {
        let decoder = StreamDecoder::new(&options.frame_format);
        Self {
            id: Uuid::new_v4(),
            options,
            state: SessionState::AwaitingTheme,
            decoder,
            buffer: String::new(),
            scanner: ObjectScanner::new(),
            last_checkpoint: None,
            deck_found: false,
            tracker: SlideBoundaryTracker::new(),
            reconciler: Reconciler::new(),
            latest: None,
            error: None,
            stats: SessionStats::default(),
        }
    }

    /// Replaces the finalization pipeline.
    pub fn with_reconciler(mut self, reconciler: Reconciler) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Session id, used as a tracing field.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True once `complete`/sentinel or `error` has been emitted.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Model text accumulated so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Most recent document: the last successful partial parse while
    /// streaming, the reconciled document once done.
    pub fn last_document(&self) -> Option<&DeckDocument> {
        self.latest.as_ref()
    }

    /// The error that ended the session, if it failed.
    pub fn error(&self) -> Option<&SlideStreamError> {
        self.error.as_ref()
    }

    /// Session counters.
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            malformed_frames: self.decoder.malformed_frames(),
            buffered_bytes: self.buffer.len(),
            ..self.stats
        }
    }

    /// Feeds a raw transport chunk and returns the events it produced.
    pub fn push_bytes(&mut self, chunk: &[u8]) -> Vec<DeckEvent> {
        if self.state.is_terminal() || self.state == SessionState::Finalizing {
            return Vec::new();
        }
        match self.decoder.decode(chunk) {
            Ok(frames) => self.apply_frames(frames),
            Err(e) => self.fail(e),
        }
    }

    /// Feeds already decoded model text, bypassing transport framing.
    pub fn push_text(&mut self, text: &str) -> Vec<DeckEvent> {
        if self.state.is_terminal() || self.state == SessionState::Finalizing {
            return Vec::new();
        }
        self.apply_frames(vec![Frame::Text(text.to_string())])
    }

    fn apply_frames(&mut self, frames: Vec<Frame>) -> Vec<DeckEvent> {
        let mut events = Vec::new();
        let mut appended = false;

        for frame in frames {
            match frame {
                Frame::Text(text) => {
                    self.buffer.push_str(&text);
                    appended = true;
                }
                Frame::Error(message) => {
                    if appended {
                        events.extend(self.progress());
                    }
                    events.extend(self.fail(SlideStreamError::Stream { message }));
                    return events;
                }
                Frame::Done => {
                    tracing::debug!(session_id = %self.id, "Received terminal sentinel");
                    if appended {
                        events.extend(self.progress());
                    }
                    events.extend(self.finalize());
                    return events;
                }
            }
        }

        if appended {
            events.extend(self.progress());
        }
        events
    }

    /// Opportunistic partial parsing after new text arrived.
    fn progress(&mut self) -> Vec<DeckEvent> {
        let mut events = Vec::new();
        if self.deck_found {
            return events;
        }

        while let Some(span) = self.scanner.scan(&self.buffer) {
            match DeckDocument::parse(span.slice(&self.buffer)) {
                Ok(doc) if doc.has_deck_shape() => {
                    self.deck_found = true;
                    self.last_checkpoint = None;
                    self.observe(doc, &mut events, false);
                    return events;
                }
                Ok(_) => {
                    tracing::debug!(
                        session_id = %self.id,
                        start = span.start,
                        "Balanced object is not a deck"
                    );
                }
                Err(e) => {
                    tracing::debug!(
                        session_id = %self.id,
                        start = span.start,
                        error = %e,
                        "Balanced span does not parse yet"
                    );
                }
            }
        }

        if self.options.snapshot_mode == SnapshotMode::Progressive {
            let checkpoint = self.scanner.checkpoint_end();
            if checkpoint.is_some() && checkpoint != self.last_checkpoint {
                self.last_checkpoint = checkpoint;
                if let Some(snapshot) = self.scanner.snapshot(&self.buffer) {
                    match DeckDocument::parse(&snapshot) {
                        Ok(doc) => self.observe(doc, &mut events, false),
                        Err(e) => {
                            tracing::debug!(
                                session_id = %self.id,
                                error = %e,
                                "Snapshot does not parse"
                            );
                        }
                    }
                }
            }
        }

        events
    }

    /// Emits the theme and any slides of `doc` beyond the cursor.
    fn observe(&mut self, doc: DeckDocument, events: &mut Vec<DeckEvent>, flush: bool) {
        if let Some(theme) = self.tracker.take_theme(&doc) {
            tracing::info!(
                session_id = %self.id,
                theme = theme.name().unwrap_or_default(),
                "Theme detected"
            );
            events.push(DeckEvent::Theme {
                theme,
                suggested_theme_key: doc.suggested_theme_key.clone(),
            });
            if self.state == SessionState::AwaitingTheme {
                self.state = SessionState::StreamingSlides;
            }
        }

        let total = doc.slide_count();
        for NewSlide { index, slide } in self.tracker.advance(&doc) {
            tracing::debug!(session_id = %self.id, index, total, flush, "Emitting slide");
            events.push(DeckEvent::slide(slide, index, total));
            if flush {
                self.stats.slides_flushed += 1;
            } else {
                self.stats.slides_streamed += 1;
            }
        }

        self.latest = Some(doc);
    }

    /// Signals that the transport closed and returns the final events.
    ///
    /// Runs reconciliation on the whole buffer, emits the theme and every
    /// slide not yet emitted, then `complete` and the sentinel. On failure
    /// emits a single `error` event instead.
    pub fn finish(&mut self) -> Vec<DeckEvent> {
        if self.state.is_terminal() || self.state == SessionState::Finalizing {
            return Vec::new();
        }

        let frames = match self.decoder.finish() {
            Ok(frames) => frames,
            Err(e) => return self.fail(e),
        };
        for frame in frames {
            match frame {
                Frame::Text(text) => self.buffer.push_str(&text),
                Frame::Error(message) => return self.fail(SlideStreamError::Stream { message }),
                Frame::Done => {}
            }
        }

        self.finalize()
    }

    fn finalize(&mut self) -> Vec<DeckEvent> {
        self.state = SessionState::Finalizing;
        tracing::debug!(session_id = %self.id, len = self.buffer.len(), "Finalizing");

        let reconciled = match self.reconciler.finalize(&self.buffer) {
            Ok(reconciled) => reconciled,
            Err(e) => return self.fail(e),
        };

        if let Some(heuristic) = reconciled.heuristic {
            tracing::warn!(
                session_id = %self.id,
                heuristic,
                "Recovered document with repair heuristic"
            );
            self.stats.repair_heuristic = Some(heuristic);
        }
        if reconciled.dropped > 0 {
            tracing::debug!(
                session_id = %self.id,
                dropped = reconciled.dropped,
                "Dropped empty slides"
            );
        }

        let document = reconciled.document;
        if self.tracker.emitted() > document.slide_count() {
            tracing::warn!(
                session_id = %self.id,
                emitted = self.tracker.emitted(),
                finalized = document.slide_count(),
                "Finalized document has fewer slides than were already emitted"
            );
        }

        let mut events = Vec::new();
        self.observe(document.clone(), &mut events, true);
        events.push(DeckEvent::Complete { data: document });
        events.push(DeckEvent::Done);

        tracing::info!(
            session_id = %self.id,
            slides = self.tracker.emitted(),
            streamed = self.stats.slides_streamed,
            flushed = self.stats.slides_flushed,
            "Session complete"
        );
        self.state = SessionState::Done;
        events
    }

    /// Ends the session with an error, e.g. a transport failure.
    ///
    /// Returns the `error` event, or nothing if the session already ended.
    pub fn fail(&mut self, error: SlideStreamError) -> Vec<DeckEvent> {
        if self.state.is_terminal() {
            return Vec::new();
        }
        tracing::error!(session_id = %self.id, error = %error, "Session failed");
        let message = error.to_string();
        self.error = Some(error);
        self.state = SessionState::Error;
        vec![DeckEvent::Error { message }]
    }
}
