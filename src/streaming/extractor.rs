//! String-aware brace matching over a growing text buffer.
//!
//! The scan is lexical: it counts unescaped `{` and `}` outside string
//! literals and knows nothing else about JSON. A span it returns still has to
//! be parsed. Both `"` and `'` delimit strings because model output is not
//! always strict JSON; a string only closes on the delimiter that opened it.
//!
//! [`ObjectScanner`] keeps its lexer state between calls so that a buffer
//! which only ever grows is scanned once in total, not once per chunk.

/// A complete top-level object found in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractedObject<'a> {
    /// The object text, from its opening `{` through the matching `}`.
    pub json: &'a str,
    /// Byte offset of the opening brace.
    pub start: usize,
    /// Byte offset immediately after the closing brace.
    pub end_index: usize,
}

/// Byte range of a balanced object, `start..end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectSpan {
    /// Byte offset of the opening brace.
    pub start: usize,
    /// Byte offset immediately after the closing brace.
    pub end: usize,
}

impl ObjectSpan {
    /// Returns the span's text.
    ///
    /// `text` must be the buffer (or an extension of it) the span came from.
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }
}

/// Finds the first complete `{...}` object starting at or after `start_index`.
///
/// Returns `None` when there is no opening brace, or when the text ends
/// before the braces balance. Incomplete input is the normal case while a
/// stream is still arriving and is not an error.
pub fn extract_complete_object(text: &str, start_index: usize) -> Option<ExtractedObject<'_>> {
    let mut scanner = ObjectScanner::starting_at(start_index);
    scanner.scan(text).map(|span| ExtractedObject {
        json: span.slice(text),
        start: span.start,
        end_index: span.end,
    })
}

/// Position inside an open object where a whole member or array element has
/// just closed, with the closers needed to balance the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Checkpoint {
    end: usize,
    open: Vec<u8>,
}

/// Resumable brace-matching scanner.
///
/// Each call to [`scan`](Self::scan) must be given the same buffer, possibly
/// with more text appended. The scanner resumes where the previous call
/// stopped; after it reports a span it continues with the text that follows.
#[derive(Debug, Clone, Default)]
pub struct ObjectScanner {
    pos: usize,
    start: Option<usize>,
    depth: usize,
    quote: Option<u8>,
    escape: bool,
    open: Vec<u8>,
    checkpoint: Option<Checkpoint>,
}

impl ObjectScanner {
    /// Creates a scanner that starts at the beginning of the buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a scanner that ignores everything before `offset`.
    pub fn starting_at(offset: usize) -> Self {
        Self {
            pos: offset,
            ..Self::default()
        }
    }

    /// Offset of the next byte to be examined.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Offset of the opening brace of the object being scanned, if any.
    pub fn open_object_start(&self) -> Option<usize> {
        self.start
    }

    /// Scans newly appended text and returns the next balanced object.
    pub fn scan(&mut self, text: &str) -> Option<ObjectSpan> {
        let bytes = text.as_bytes();

        if self.start.is_none() {
            let from = self.pos.min(bytes.len());
            match bytes[from..].iter().position(|&b| b == b'{') {
                Some(offset) => {
                    let start = from + offset;
                    self.start = Some(start);
                    self.pos = start;
                }
                None => {
                    self.pos = self.pos.max(bytes.len());
                    return None;
                }
            }
        }

        while self.pos < bytes.len() {
            let i = self.pos;
            let byte = bytes[i];
            self.pos += 1;

            if self.escape {
                self.escape = false;
                continue;
            }

            if byte == b'\\' {
                self.escape = true;
                continue;
            }

            if byte == b'"' || byte == b'\'' {
                match self.quote {
                    None => self.quote = Some(byte),
                    Some(delim) if delim == byte => self.quote = None,
                    Some(_) => {}
                }
                continue;
            }

            if self.quote.is_some() {
                continue;
            }

            match byte {
                b'{' => {
                    self.depth += 1;
                    self.open.push(b'{');
                }
                b'[' => self.open.push(b'['),
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.open.last() == Some(&b'{') {
                        self.open.pop();
                    }
                    if self.depth == 0 {
                        let span = ObjectSpan {
                            start: self.start.unwrap_or(i),
                            end: i + 1,
                        };
                        self.reset_object();
                        return Some(span);
                    }
                    self.mark_checkpoint(i + 1);
                }
                b']' => {
                    if self.open.last() == Some(&b'[') {
                        self.open.pop();
                    }
                    self.mark_checkpoint(i + 1);
                }
                _ => {}
            }
        }

        None
    }

    /// Records a checkpoint when a member of the root object, or an element
    /// of an array held directly by the root object, has just closed.
    fn mark_checkpoint(&mut self, end: usize) {
        let at_member = self.open.len() == 1;
        let at_element = self.open.len() == 2 && self.open[1] == b'[';
        if at_member || at_element {
            self.checkpoint = Some(Checkpoint {
                end,
                open: self.open.clone(),
            });
        }
    }

    fn reset_object(&mut self) {
        self.start = None;
        self.depth = 0;
        self.quote = None;
        self.escape = false;
        self.open.clear();
        self.checkpoint = None;
    }

    /// End offset of the latest checkpoint inside the open object.
    pub fn checkpoint_end(&self) -> Option<usize> {
        self.checkpoint.as_ref().map(|c| c.end)
    }

    /// Builds a balanced document from the open object's text up to the
    /// latest checkpoint.
    ///
    /// The result contains only members and array elements that have fully
    /// arrived; anything still streaming after the checkpoint is left out.
    pub fn snapshot(&self, text: &str) -> Option<String> {
        let start = self.start?;
        let checkpoint = self.checkpoint.as_ref()?;
        let prefix = text.get(start..checkpoint.end)?;

        let mut doc = String::with_capacity(prefix.len() + checkpoint.open.len());
        doc.push_str(prefix);
        for &container in checkpoint.open.iter().rev() {
            doc.push(if container == b'{' { '}' } else { ']' });
        }
        Some(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn json_of(text: &str) -> Option<&str> {
        extract_complete_object(text, 0).map(|o| o.json)
    }

    #[test]
    fn test_extract_simple_object() {
        let text = r#"{"key": "value"}"#;
        let found = extract_complete_object(text, 0).unwrap();
        assert_eq!(found.json, text);
        assert_eq!(found.start, 0);
        assert_eq!(found.end_index, text.len());
    }

    #[test]
    fn test_extract_with_leading_noise() {
        let text = r#"Here you go: {"a": {"b": 1}} trailing"#;
        let found = extract_complete_object(text, 0).unwrap();
        assert_eq!(found.json, r#"{"a": {"b": 1}}"#);
        assert_eq!(&text[found.end_index..], " trailing");
    }

    #[test]
    fn test_empty_and_brace_free_text() {
        assert_eq!(json_of(""), None);
        assert_eq!(json_of("}"), None);
        assert_eq!(json_of("no json here"), None);
    }

    #[test]
    fn test_incomplete_object_returns_none() {
        assert_eq!(json_of(r#"{"designTheme":{"nam"#), None);
        assert_eq!(json_of(r#"{"slides":[{"title":"A"}"#), None);
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let text = r#"{"title": "Use {curly} braces", "x": "}"}"#;
        assert_eq!(json_of(text), Some(text));
    }

    #[test]
    fn test_escaped_quote_stays_inside_string() {
        let text = r#"{"quote": "She said \"hi\" }"}"#;
        assert_eq!(json_of(text), Some(text));
    }

    #[test]
    fn test_escaped_backslash_before_quote() {
        let text = r#"{"path": "C:\\", "b": "}"}"#;
        assert_eq!(json_of(text), Some(text));
    }

    #[test]
    fn test_single_quoted_strings() {
        let text = r#"{'title': 'brace } inside'}"#;
        assert_eq!(json_of(text), Some(text));
    }

    #[test]
    fn test_single_quote_does_not_close_double_quoted_string() {
        let text = r#"{"title": "it's } fine"}"#;
        assert_eq!(json_of(text), Some(text));
    }

    #[test]
    fn test_start_index_skips_earlier_objects() {
        let text = r#"{"first": 1} {"second": 2}"#;
        let first = extract_complete_object(text, 0).unwrap();
        let second = extract_complete_object(text, first.end_index).unwrap();
        assert_eq!(second.json, r#"{"second": 2}"#);
        assert_eq!(extract_complete_object(text, second.end_index), None);
        assert_eq!(extract_complete_object(text, text.len() + 10), None);
    }

    #[test]
    fn test_multibyte_text_is_sliced_on_boundaries() {
        let text = r#"→ {"title": "Ünïcödé ✓ {"}"#;
        assert_eq!(json_of(text), Some(r#"{"title": "Ünïcödé ✓ {"}"#));
    }

    #[test]
    fn test_growing_prefixes_are_consistent() {
        let doc = r#"pre {"designTheme":{"name":"Blue \"x\" {"},"slides":[{"title":"A"},{"title":"B"}]} post"#;
        let open = doc.find('{').unwrap();
        let close = doc.rfind('}').unwrap() + 1;

        for end in 0..=doc.len() {
            if !doc.is_char_boundary(end) {
                continue;
            }
            let found = extract_complete_object(&doc[..end], 0);
            if end < close {
                assert_eq!(found, None, "prefix of length {} must be incomplete", end);
            } else {
                let found = found.unwrap();
                assert_eq!((found.start, found.end_index), (open, close));
            }
        }
    }

    #[test]
    fn test_resumed_scan_matches_fresh_scan() {
        let doc = r#"{"a":"}{","b":[{"c":'d}'}]}{"next":true}"#;
        let mut scanner = ObjectScanner::new();
        let mut spans = Vec::new();

        for end in 1..=doc.len() {
            while let Some(span) = scanner.scan(&doc[..end]) {
                spans.push(span.slice(doc));
            }
        }

        assert_eq!(spans, vec![r#"{"a":"}{","b":[{"c":'d}'}]}"#, r#"{"next":true}"#]);
        assert_eq!(scanner.position(), doc.len());
    }

    #[test]
    fn test_snapshot_closes_completed_members_only() {
        let mut scanner = ObjectScanner::new();
        let text = r#"{"designTheme":{"name":"Blue"},"slides":[{"title":"A"},{"titl"#;
        assert_eq!(scanner.scan(text), None);

        assert_eq!(
            scanner.snapshot(text).as_deref(),
            Some(r#"{"designTheme":{"name":"Blue"},"slides":[{"title":"A"}]}"#)
        );
    }

    #[test]
    fn test_snapshot_ignores_nested_closers() {
        let mut scanner = ObjectScanner::new();
        let text = r#"{"designTheme":{"name":"Blue"},"slides":[{"title":"A","content":["x"]"#;
        assert_eq!(scanner.scan(text), None);

        assert_eq!(
            scanner.snapshot(text).as_deref(),
            Some(r#"{"designTheme":{"name":"Blue"}}"#)
        );
    }

    #[test]
    fn test_snapshot_none_before_any_member_closes() {
        let mut scanner = ObjectScanner::new();
        let text = r#"{"designTheme":{"na"#;
        assert_eq!(scanner.scan(text), None);
        assert_eq!(scanner.snapshot(text), None);
        assert_eq!(scanner.open_object_start(), Some(0));
    }
}
