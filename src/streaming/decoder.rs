//! Transport framing: raw response bytes to model text deltas.
//!
//! Bytes are first decoded to UTF-8 with multi-byte sequences carried across
//! chunk boundaries, then handed to a [`Framer`] selected by [`FrameFormat`]:
//!
//! - `EventStream`: `data: {json}` lines, `[DONE]` sentinel
//! - `EmbeddedEnvelope`: JSON envelopes located inside opaque chunks by a
//!   marker substring (e.g. the binary AWS event stream behind Bedrock's
//!   `converse-stream`), each one cut out with the brace-matching extractor
//! - `Plain`: the body is the model text itself, optionally ending in a
//!   `[DONE]` that sits outside any JSON string
//!
//! A frame that fails to parse is logged and skipped; it never ends a session.

use serde_json::Value;

use super::extractor::extract_complete_object;
use crate::errors::{SlideStreamError, SlideStreamResult};

/// Terminal sentinel sent in place of a payload.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Field prefix of event-stream payload lines.
pub const DATA_PREFIX: &str = "data:";

/// Start of a Bedrock `contentBlockDelta` envelope.
pub const BEDROCK_DELTA_MARKER: &str = r#"{"contentBlockIndex""#;

/// JSON pointers tried, in order, to find the text carried by a payload.
const TEXT_DELTA_POINTERS: [&str; 5] = [
    "/delta/text",
    "/choices/0/delta/content",
    "/contentBlockDelta/delta/text",
    "/text",
    "/completion",
];

/// Transport framing of a response body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FrameFormat {
    /// Server-sent events carrying JSON payloads on `data:` lines.
    #[default]
    EventStream,
    /// JSON envelopes embedded in opaque chunks, located by `marker`.
    EmbeddedEnvelope {
        /// Substring that starts every envelope of interest.
        marker: String,
    },
    /// Unframed model text.
    Plain,
}

impl FrameFormat {
    /// Envelope framing for Bedrock `converse-stream` responses.
    pub fn bedrock_converse() -> Self {
        FrameFormat::EmbeddedEnvelope {
            marker: BEDROCK_DELTA_MARKER.to_string(),
        }
    }

    /// Whether bytes that are not valid UTF-8 are expected in this framing.
    fn is_binary(&self) -> bool {
        matches!(self, FrameFormat::EmbeddedEnvelope { .. })
    }
}

/// A unit of decoded transport output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Model text to append to the document buffer.
    Text(String),
    /// The provider reported an error inside the stream.
    Error(String),
    /// The terminal sentinel arrived.
    Done,
}

/// Finds the model text carried by a provider payload.
///
/// Returns `None` for payloads without text, such as pings, usage reports or
/// message start/stop envelopes.
pub fn extract_text_delta(payload: &Value) -> Option<&str> {
    TEXT_DELTA_POINTERS
        .iter()
        .find_map(|pointer| payload.pointer(pointer).and_then(Value::as_str))
}

/// Returns the error message of an in-stream error payload.
fn extract_stream_error(payload: &Value) -> Option<String> {
    let is_error_type = payload.get("type").and_then(Value::as_str) == Some("error");
    let error = payload.get("error")?;
    if !is_error_type && !error.is_object() {
        return None;
    }
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .map_or_else(|| error.to_string(), str::to_owned);
    Some(message)
}

/// UTF-8 decoder that carries incomplete sequences over to the next chunk.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
    lossy: bool,
}

impl Utf8ChunkDecoder {
    /// Creates a decoder that fails on invalid byte sequences.
    pub fn strict() -> Self {
        Self::default()
    }

    /// Creates a decoder that replaces invalid sequences with U+FFFD.
    pub fn lossy() -> Self {
        Self {
            pending: Vec::new(),
            lossy: true,
        }
    }

    /// Decodes a chunk, holding back a trailing incomplete sequence.
    pub fn decode(&mut self, chunk: &[u8]) -> SlideStreamResult<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut out = String::with_capacity(bytes.len());
        let mut rest = bytes.as_slice();

        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    out.push_str(text);
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match err.error_len() {
                        None => {
                            self.pending = rest[valid..].to_vec();
                            break;
                        }
                        Some(len) if self.lossy => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        Some(_) => {
                            return Err(SlideStreamError::Decode {
                                message: format!(
                                    "invalid UTF-8 sequence after {} valid bytes",
                                    valid
                                ),
                            });
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    /// Flushes the decoder at end of stream.
    pub fn finish(&mut self) -> SlideStreamResult<String> {
        if self.pending.is_empty() {
            return Ok(String::new());
        }
        self.pending.clear();
        if self.lossy {
            Ok(char::REPLACEMENT_CHARACTER.to_string())
        } else {
            Err(SlideStreamError::Decode {
                message: "stream ended inside a multi-byte sequence".to_string(),
            })
        }
    }
}

/// Splits text into complete lines, holding back a trailing partial line.
#[derive(Debug, Default)]
pub struct LineSplitter {
    partial: String,
}

impl LineSplitter {
    /// Creates an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends text and returns every line it completed, without `\r\n`.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.partial.push_str(text);
        let Some(last_newline) = self.partial.rfind('\n') else {
            return Vec::new();
        };

        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        complete
            .split_terminator('\n')
            .map(|line| line.trim_end_matches('\r').to_string())
            .collect()
    }

    /// Returns the trailing line left when the stream ends without a newline.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.partial);
        let line = line.trim_end_matches('\r');
        (!line.is_empty()).then(|| line.to_string())
    }
}

/// Turns decoded transport text into frames.
pub trait Framer: Send {
    /// Consumes decoded text and returns the frames it completed.
    fn push(&mut self, text: &str) -> Vec<Frame>;

    /// Flushes buffered input at end of stream.
    fn finish(&mut self) -> Vec<Frame>;

    /// Number of frames skipped because they were malformed.
    fn malformed(&self) -> usize;
}

/// `data:` line framing.
#[derive(Debug, Default)]
pub struct EventStreamFramer {
    lines: LineSplitter,
    malformed: usize,
}

impl EventStreamFramer {
    /// Creates a framer.
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_line(&mut self, line: &str) -> Option<Frame> {
        // Blank lines end events; comments start with ':'
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        let payload = line.strip_prefix(DATA_PREFIX)?.trim();
        if payload.is_empty() {
            return None;
        }
        if payload == DONE_SENTINEL {
            return Some(Frame::Done);
        }

        match serde_json::from_str::<Value>(payload) {
            Ok(value) => {
                if let Some(message) = extract_stream_error(&value) {
                    return Some(Frame::Error(message));
                }
                extract_text_delta(&value).map(|text| Frame::Text(text.to_string()))
            }
            Err(e) => {
                self.malformed += 1;
                tracing::debug!(
                    error = %e,
                    line = %truncate(payload, 200),
                    "Skipping malformed event-stream line"
                );
                None
            }
        }
    }
}

impl Framer for EventStreamFramer {
    fn push(&mut self, text: &str) -> Vec<Frame> {
        self.lines
            .push(text)
            .into_iter()
            .filter_map(|line| self.parse_line(&line))
            .collect()
    }

    fn finish(&mut self) -> Vec<Frame> {
        self.lines
            .finish()
            .and_then(|line| self.parse_line(&line))
            .into_iter()
            .collect()
    }

    fn malformed(&self) -> usize {
        self.malformed
    }
}

/// Marker-located JSON envelope framing.
#[derive(Debug)]
pub struct EnvelopeFramer {
    marker: String,
    buffer: String,
    malformed: usize,
}

impl EnvelopeFramer {
    /// Creates a framer looking for envelopes that start with `marker`.
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
            buffer: String::new(),
            malformed: 0,
        }
    }

    /// Drops scanned bytes, keeping a tail that could still begin a marker.
    fn discard_scanned(&mut self) {
        let keep = self.marker.len().saturating_sub(1);
        let mut cut = self.buffer.len().saturating_sub(keep);
        while !self.buffer.is_char_boundary(cut) {
            cut -= 1;
        }
        self.buffer.drain(..cut);
    }
}

impl Framer for EnvelopeFramer {
    fn push(&mut self, text: &str) -> Vec<Frame> {
        self.buffer.push_str(text);
        let mut frames = Vec::new();

        loop {
            let Some(marker_pos) = self.buffer.find(self.marker.as_str()) else {
                self.discard_scanned();
                break;
            };

            let (parsed, end) = match extract_complete_object(&self.buffer, marker_pos) {
                Some(envelope) => (
                    serde_json::from_str::<Value>(envelope.json),
                    envelope.end_index,
                ),
                None => {
                    self.buffer.drain(..marker_pos);
                    break;
                }
            };

            match parsed {
                Ok(value) => {
                    if let Some(text) = extract_text_delta(&value) {
                        frames.push(Frame::Text(text.to_string()));
                    }
                }
                Err(e) => {
                    self.malformed += 1;
                    tracing::debug!(
                        error = %e,
                        envelope = %truncate(&self.buffer[marker_pos..end], 200),
                        "Skipping malformed envelope"
                    );
                }
            }
            self.buffer.drain(..end);
        }

        frames
    }

    fn finish(&mut self) -> Vec<Frame> {
        if self.buffer.contains(self.marker.as_str()) {
            tracing::debug!(
                pending = self.buffer.len(),
                "Stream ended inside an envelope"
            );
        }
        self.buffer.clear();
        Vec::new()
    }

    fn malformed(&self) -> usize {
        self.malformed
    }
}

/// Unframed text, with an optional literal `[DONE]` terminator.
///
/// The sentinel only counts outside JSON strings, so slide text that
/// mentions `[DONE]` passes through untouched.
#[derive(Debug, Default)]
pub struct PlainFramer {
    holdback: String,
    in_string: bool,
    escape: bool,
    done: bool,
}

/// Where the sentinel sits in a piece of plain text.
enum SentinelScan {
    Found(usize),
    Partial(usize),
    Absent,
}

impl PlainFramer {
    /// Creates a framer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the string state over `text`, stopping at a sentinel or at
    /// a suffix that may become one.
    fn scan(&mut self, text: &str) -> SentinelScan {
        for (i, c) in text.char_indices() {
            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if c == '\\' {
                    self.escape = true;
                } else if c == '"' {
                    self.in_string = false;
                }
                continue;
            }

            match c {
                '"' => self.in_string = true,
                '[' => {
                    let rest = &text[i..];
                    if rest.starts_with(DONE_SENTINEL) {
                        return SentinelScan::Found(i);
                    }
                    if DONE_SENTINEL.starts_with(rest) {
                        return SentinelScan::Partial(i);
                    }
                }
                _ => {}
            }
        }
        SentinelScan::Absent
    }
}

impl Framer for PlainFramer {
    fn push(&mut self, text: &str) -> Vec<Frame> {
        if self.done {
            return Vec::new();
        }

        let mut pending = std::mem::take(&mut self.holdback);
        pending.push_str(text);

        match self.scan(&pending) {
            SentinelScan::Found(pos) => {
                self.done = true;
                pending.truncate(pos);
                let mut frames = Vec::new();
                if !pending.is_empty() {
                    frames.push(Frame::Text(pending));
                }
                frames.push(Frame::Done);
                return frames;
            }
            SentinelScan::Partial(pos) => self.holdback = pending.split_off(pos),
            SentinelScan::Absent => {}
        }

        if pending.is_empty() {
            Vec::new()
        } else {
            vec![Frame::Text(pending)]
        }
    }

    fn finish(&mut self) -> Vec<Frame> {
        let rest = std::mem::take(&mut self.holdback);
        if rest.is_empty() || self.done {
            Vec::new()
        } else {
            vec![Frame::Text(rest)]
        }
    }

    fn malformed(&self) -> usize {
        0
    }
}

/// Byte-to-frame decoder for one session.
pub struct StreamDecoder {
    utf8: Utf8ChunkDecoder,
    framer: Box<dyn Framer>,
    done: bool,
}

impl StreamDecoder {
    /// Creates a decoder for the given framing.
    pub fn new(format: &FrameFormat) -> Self {
        let utf8 = if format.is_binary() {
            Utf8ChunkDecoder::lossy()
        } else {
            Utf8ChunkDecoder::strict()
        };
        let framer: Box<dyn Framer> = match format {
            FrameFormat::EventStream => Box::new(EventStreamFramer::new()),
            FrameFormat::EmbeddedEnvelope { marker } => {
                Box::new(EnvelopeFramer::new(marker.clone()))
            }
            FrameFormat::Plain => Box::new(PlainFramer::new()),
        };
        Self {
            utf8,
            framer,
            done: false,
        }
    }

    /// Decodes a raw chunk into frames.
    ///
    /// Nothing is produced once the sentinel has been seen.
    pub fn decode(&mut self, chunk: &[u8]) -> SlideStreamResult<Vec<Frame>> {
        if self.done {
            return Ok(Vec::new());
        }
        let text = self.utf8.decode(chunk)?;
        Ok(self.collect(text, false))
    }

    /// Flushes the decoder when the transport closes.
    pub fn finish(&mut self) -> SlideStreamResult<Vec<Frame>> {
        if self.done {
            return Ok(Vec::new());
        }
        let text = self.utf8.finish()?;
        Ok(self.collect(text, true))
    }

    fn collect(&mut self, text: String, last: bool) -> Vec<Frame> {
        let mut frames = if text.is_empty() {
            Vec::new()
        } else {
            self.framer.push(&text)
        };
        if last {
            frames.extend(self.framer.finish());
        }
        if let Some(pos) = frames.iter().position(|f| *f == Frame::Done) {
            frames.truncate(pos + 1);
            self.done = true;
        }
        frames
    }

    /// True once the sentinel has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Number of malformed frames skipped so far.
    pub fn malformed_frames(&self) -> usize {
        self.framer.malformed()
    }
}

impl std::fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("done", &self.done)
            .field("malformed", &self.framer.malformed())
            .finish()
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
