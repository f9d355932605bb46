//! Best-effort recovery of the whole document once the stream has ended.
//!
//! Finalization runs in three steps:
//!
//! 1. Balanced objects are extracted from the buffer in order; the first one
//!    that parses into a deck (theme and slides array) wins.
//! 2. Otherwise the [`RepairHeuristic`] pipeline runs. Heuristics are applied
//!    one after another, each to the output of the previous one, and the text
//!    is re-parsed after every change.
//! 3. If nothing parses into a deck the session fails with a parse error.
//!
//! Truncated documents are never closed automatically. A stream that stops
//! in the middle of a slide is a failed generation, not a shorter deck.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::extractor::extract_complete_object;
use crate::errors::{SlideStreamError, SlideStreamResult};
use crate::types::deck::{SLIDES_KEY, SUGGESTED_THEME_KEY, THEME_KEY};
use crate::types::DeckDocument;

/// Keys that are corrected by fuzzy matching when garbled.
const FUZZY_KEYS: [&str; 3] = [THEME_KEY, SLIDES_KEY, SUGGESTED_THEME_KEY];

/// Keys shorter than this are never fuzzily corrected.
const MIN_FUZZY_KEY_LEN: usize = 6;

/// Maximum edit distance for a fuzzy key correction.
const MAX_KEY_EDITS: usize = 2;

/// Literal rewrites for truncated or misspelled keys seen in model output.
const KEY_TYPO_RULES: [(&str, &str); 2] = [
    (r#""designTh\s+\{"#, r#""designTheme": {"#),
    (r#""(?:sug)?gestedThemeKey""#, r#""suggestedThemeKey""#),
];

static TYPO_RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    KEY_TYPO_RULES
        .iter()
        .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, *replacement)))
        .collect()
});

static QUOTED_KEY: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#""([^"\\]{4,40})"(\s*):"#).ok());

static CODE_FENCE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"```[A-Za-z]*").ok());

static HTML_COMMENT: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").ok());

/// A textual repair applied to the buffer when it does not parse.
pub trait RepairHeuristic: Send + Sync + std::fmt::Debug {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Returns the repaired text, or `None` when the heuristic changes nothing.
    fn repair(&self, text: &str) -> Option<String>;
}

/// Slices the buffer to the object that encloses the deck keys.
///
/// The start is the `{` enclosing the first theme or slides key. Closing
/// positions are tried from the last `}` backwards until a slice parses; if
/// none does, the widest slice is handed on to the next heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct BalancedSlice;

impl RepairHeuristic for BalancedSlice {
    fn name(&self) -> &'static str {
        "balanced_slice"
    }

    fn repair(&self, text: &str) -> Option<String> {
        let key_pos = [THEME_KEY, SLIDES_KEY]
            .iter()
            .filter_map(|key| text.find(&format!("\"{}\"", key)))
            .min()?;
        let start = enclosing_open_brace(text, key_pos)?;

        let ends: Vec<usize> = text[start..]
            .match_indices('}')
            .map(|(offset, _)| start + offset + 1)
            .collect();
        let widest = *ends.last()?;

        let slice = ends
            .iter()
            .rev()
            .map(|&end| &text[start..end])
            .find(|candidate| serde_json::from_str::<Value>(candidate).is_ok())
            .unwrap_or(&text[start..widest]);

        changed(text, slice)
    }
}

/// Offset of the `{` that opens the object containing `pos`.
///
/// Scans backwards counting braces; string literals are not tracked.
fn enclosing_open_brace(text: &str, pos: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, byte) in text.as_bytes()[..pos].iter().enumerate().rev() {
        match byte {
            b'}' => depth += 1,
            b'{' if depth == 0 => return Some(i),
            b'{' => depth -= 1,
            _ => {}
        }
    }
    None
}

/// Corrects truncated and garbled top-level keys.
///
/// `"desigTh eme"` becomes `"designTheme"`: whitespace is removed from a
/// quoted key and the result is matched against the known top-level keys
/// within a small edit distance. The fuzzy match only touches members of the
/// root object.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyTypo;

impl RepairHeuristic for KeyTypo {
    fn name(&self) -> &'static str {
        "key_typo"
    }

    fn repair(&self, text: &str) -> Option<String> {
        let mut fixed = text.to_string();
        for (re, replacement) in TYPO_RULES.iter() {
            fixed = re.replace_all(&fixed, *replacement).into_owned();
        }

        if let Some(re) = QUOTED_KEY.as_ref() {
            let mut out = String::with_capacity(fixed.len());
            let mut depth = NestingDepth::default();
            let mut last = 0;

            for caps in re.captures_iter(&fixed) {
                let (Some(whole), Some(key), Some(gap)) = (caps.get(0), caps.get(1), caps.get(2))
                else {
                    continue;
                };
                // Only members of the root object; slide fields keep their names.
                if depth.at(&fixed, whole.start()) != Some(1) {
                    continue;
                }
                let Some(known) = correct_key(key.as_str()) else {
                    continue;
                };
                out.push_str(&fixed[last..whole.start()]);
                out.push_str(&format!("\"{}\"{}:", known, gap.as_str()));
                last = whole.end();
            }

            out.push_str(&fixed[last..]);
            fixed = out;
        }

        changed(text, &fixed)
    }
}

/// Forward-only lexical scan reporting the bracket depth at an offset.
#[derive(Debug, Default)]
struct NestingDepth {
    pos: usize,
    depth: usize,
    in_string: bool,
    escape: bool,
}

impl NestingDepth {
    /// Depth at `target`, or `None` when `target` lies inside a string.
    ///
    /// Offsets must be passed in ascending order.
    fn at(&mut self, text: &str, target: usize) -> Option<usize> {
        for &byte in &text.as_bytes()[self.pos..target] {
            if self.in_string {
                if self.escape {
                    self.escape = false;
                } else if byte == b'\\' {
                    self.escape = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => self.depth = self.depth.saturating_sub(1),
                _ => {}
            }
        }
        self.pos = target;
        (!self.in_string).then_some(self.depth)
    }
}

fn correct_key(key: &str) -> Option<&'static str> {
    if FUZZY_KEYS.contains(&key) {
        return None;
    }
    let squashed: String = key.chars().filter(|c| !c.is_whitespace()).collect();
    if squashed.chars().count() < MIN_FUZZY_KEY_LEN {
        return None;
    }
    FUZZY_KEYS
        .iter()
        .copied()
        .find(|known| levenshtein(&squashed, known) <= MAX_KEY_EDITS)
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut row = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != *cb);
            row[j + 1] = substitution.min(prev[j + 1] + 1).min(row[j] + 1);
        }
        std::mem::swap(&mut prev, &mut row);
    }

    prev[b.len()]
}

/// Drops commas that are directly followed by `}`, `]` or another comma.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrayComma;

impl RepairHeuristic for StrayComma {
    fn name(&self) -> &'static str {
        "stray_comma"
    }

    fn repair(&self, text: &str) -> Option<String> {
        let mut out = String::with_capacity(text.len());
        let mut quote: Option<char> = None;
        let mut escape = false;

        for (i, c) in text.char_indices() {
            if let Some(delim) = quote {
                out.push(c);
                if escape {
                    escape = false;
                } else if c == '\\' {
                    escape = true;
                } else if c == delim {
                    quote = None;
                }
                continue;
            }

            match c {
                '"' | '\'' => {
                    quote = Some(c);
                    out.push(c);
                }
                ',' => {
                    let next = text[i + 1..].trim_start().chars().next();
                    if !matches!(next, Some('}' | ']' | ',')) {
                        out.push(c);
                    }
                }
                _ => out.push(c),
            }
        }

        changed(text, &out)
    }
}

/// Removes markdown fences, HTML comments and surrounding chatter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoiseTrim;

impl RepairHeuristic for NoiseTrim {
    fn name(&self) -> &'static str {
        "noise_trim"
    }

    fn repair(&self, text: &str) -> Option<String> {
        let mut cleaned = text.to_string();
        for re in [&*CODE_FENCE, &*HTML_COMMENT].into_iter().flatten() {
            cleaned = re.replace_all(&cleaned, "").into_owned();
        }

        let trimmed = match (cleaned.find('{'), cleaned.rfind('}')) {
            (Some(first), Some(last)) if first < last => &cleaned[first..=last],
            _ => cleaned.trim(),
        };

        changed(text, trimmed)
    }
}

fn changed(original: &str, candidate: &str) -> Option<String> {
    (candidate != original).then(|| candidate.to_string())
}

/// Outcome of a successful finalization.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciled {
    /// The finalized document; every slide in it is eligible for emission.
    pub document: DeckDocument,
    /// Heuristic whose output finally parsed, `None` if no repair was needed.
    pub heuristic: Option<&'static str>,
    /// Slides dropped because they had neither `title` nor `type`.
    pub dropped: usize,
}

/// Ordered heuristic pipeline used by finalization.
#[derive(Debug)]
pub struct Reconciler {
    heuristics: Vec<Box<dyn RepairHeuristic>>,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    /// Creates the standard pipeline: balanced slice, key typos, stray
    /// commas, then noise trimming.
    pub fn new() -> Self {
        Self::empty()
            .with_heuristic(BalancedSlice)
            .with_heuristic(KeyTypo)
            .with_heuristic(StrayComma)
            .with_heuristic(NoiseTrim)
    }

    /// Creates a pipeline with no heuristics.
    pub fn empty() -> Self {
        Self {
            heuristics: Vec::new(),
        }
    }

    /// Appends a heuristic to the pipeline.
    pub fn with_heuristic(mut self, heuristic: impl RepairHeuristic + 'static) -> Self {
        self.heuristics.push(Box::new(heuristic));
        self
    }

    /// Names of the heuristics, in order.
    pub fn heuristic_names(&self) -> Vec<&'static str> {
        self.heuristics.iter().map(|h| h.name()).collect()
    }

    /// Reconstructs the document from the full stream buffer.
    ///
    /// # Errors
    ///
    /// `Parse` when no repair yields JSON with a deck shape, and
    /// `InvalidDocument` when JSON was recovered but lacks a theme, lacks a
    /// slides array, or has no eligible slides.
    pub fn finalize(&self, buffer: &str) -> SlideStreamResult<Reconciled> {
        let mut parsed_without_shape: Option<String> = None;

        let mut offset = 0;
        while let Some(object) = extract_complete_object(buffer, offset) {
            match DeckDocument::parse(object.json) {
                Ok(doc) if doc.has_deck_shape() => return finish(doc, None),
                Ok(_) => {
                    parsed_without_shape.get_or_insert_with(|| object.json.to_string());
                }
                Err(_) => {}
            }
            offset = object.end_index;
        }

        let mut text = buffer.to_string();
        for heuristic in &self.heuristics {
            let Some(repaired) = heuristic.repair(&text) else {
                continue;
            };
            tracing::debug!(
                heuristic = heuristic.name(),
                before = text.len(),
                after = repaired.len(),
                "Applied repair heuristic"
            );
            text = repaired;

            match DeckDocument::parse(&text) {
                Ok(doc) if doc.has_deck_shape() => return finish(doc, Some(heuristic.name())),
                Ok(_) => {
                    parsed_without_shape.get_or_insert_with(|| text.clone());
                }
                Err(_) => {}
            }
        }

        match parsed_without_shape {
            Some(json) => Err(SlideStreamError::invalid_document(
                "parsed JSON has no designTheme object or no slides array",
                &json,
            )),
            None => Err(SlideStreamError::parse(
                format!(
                    "could not reconstruct JSON from {} buffered bytes",
                    buffer.len()
                ),
                buffer,
            )),
        }
    }
}

fn finish(mut doc: DeckDocument, heuristic: Option<&'static str>) -> SlideStreamResult<Reconciled> {
    let mut dropped = 0;
    if let Some(slides) = doc.slides.as_mut() {
        let before = slides.len();
        slides.retain(|slide| slide.is_eligible());
        dropped = before - slides.len();
    }

    if doc.slide_count() == 0 {
        let json = serde_json::to_string(&doc).unwrap_or_default();
        return Err(SlideStreamError::invalid_document("document has no slides", &json));
    }

    Ok(Reconciled {
        document: doc,
        heuristic,
        dropped,
    })
}

/// Finalizes a buffer with the standard pipeline.
pub fn finalize(buffer: &str) -> SlideStreamResult<DeckDocument> {
    Reconciler::new().finalize(buffer).map(|r| r.document)
}
