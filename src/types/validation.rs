//! Deck sanitation applied to a finalized document before rendering.
//!
//! None of this runs inside a streaming session: slides that were already
//! delivered to a consumer are never rewritten. Callers run [`sanitize_deck`]
//! on the `complete` document when they are about to lay out the deck.

use serde_json::{Map, Value};

use super::deck::{DeckDocument, SlideRecord};
use crate::errors::{SlideStreamError, SlideStreamResult};

/// Maximum number of bullets rendered on a single slide.
pub const MAX_BULLETS: usize = 7;

/// Chart types the renderer understands.
pub const SUPPORTED_CHART_TYPES: [&str; 5] = ["bar", "column", "line", "pie", "area"];

/// Chart type used when the model asked for something unsupported.
pub const DEFAULT_CHART_TYPE: &str = "column";

/// Checks that a document has a theme and at least one slide.
pub fn validate_deck(doc: &DeckDocument) -> SlideStreamResult<()> {
    if doc.design_theme.is_none() {
        return Err(invalid(doc, "missing design theme"));
    }
    match &doc.slides {
        None => Err(invalid(doc, "missing slides array")),
        Some(slides) if slides.is_empty() => Err(invalid(doc, "no slides in document")),
        Some(_) => Ok(()),
    }
}

fn invalid(doc: &DeckDocument, message: &str) -> SlideStreamError {
    let text = serde_json::to_string(doc).unwrap_or_default();
    SlideStreamError::invalid_document(message, &text)
}

/// Validates, repairs chart slides, and splits oversized slides.
pub fn sanitize_deck(mut doc: DeckDocument) -> SlideStreamResult<DeckDocument> {
    validate_deck(&doc)?;

    if let Some(mut slides) = doc.slides.take() {
        let fixed = fix_chart_slides(&mut slides);
        if fixed > 0 {
            tracing::debug!(fixed, "Repaired chart slides");
        }
        doc.slides = Some(split_oversized_slides(slides));
    }

    Ok(doc)
}

/// Splits slides with more than [`MAX_BULLETS`] content bullets.
///
/// Title slides and chart slides are kept as they are. Each part keeps every
/// other field of the original slide.
pub fn split_oversized_slides(slides: Vec<SlideRecord>) -> Vec<SlideRecord> {
    let original_len = slides.len();
    let mut out = Vec::with_capacity(original_len);

    for slide in slides {
        if slide.slide_type() == Some("title") || is_chart_slide(&slide) {
            out.push(slide);
            continue;
        }

        let bullets = match slide.as_map().get("content").and_then(Value::as_array) {
            Some(items) if items.len() > MAX_BULLETS => items.clone(),
            _ => {
                out.push(slide);
                continue;
            }
        };

        let parts = bullets.chunks(MAX_BULLETS).count();
        let title = slide.title().map(str::to_owned);
        for (i, chunk) in bullets.chunks(MAX_BULLETS).enumerate() {
            let mut part = slide.clone();
            let part_title = match &title {
                Some(t) => format!("{} - Part {}", t, i + 1),
                None => format!("Part {}", i + 1),
            };
            let map = part.as_map_mut();
            map.insert("title".to_string(), Value::String(part_title));
            map.insert("content".to_string(), Value::Array(chunk.to_vec()));
            out.push(part);
        }
        tracing::debug!(title = ?title, parts, "Split oversized slide");
    }

    if out.len() > original_len {
        tracing::info!(before = original_len, after = out.len(), "Split oversized slides");
    }
    out
}

fn is_chart_slide(slide: &SlideRecord) -> bool {
    slide.layout() == Some("chart") && slide.as_map().contains_key("chart")
}

/// Normalizes chart slides in place and returns how many were changed.
///
/// - chart type is lower-cased, unknown types become [`DEFAULT_CHART_TYPE`]
/// - non-numeric values become `0`, numeric strings are parsed
/// - value series are padded with `0` or truncated to the label count
/// - a chart with no labels or no datasets turns into a `bullets` slide
pub fn fix_chart_slides(slides: &mut [SlideRecord]) -> usize {
    let mut changed = 0;
    for slide in slides.iter_mut().filter(|s| is_chart_slide(s)) {
        let before = slide.clone();
        fix_chart_slide(slide.as_map_mut());
        if *slide != before {
            changed += 1;
        }
    }
    changed
}

fn fix_chart_slide(map: &mut Map<String, Value>) {
    let usable = map
        .get("chart")
        .and_then(|chart| chart.get("data"))
        .is_some_and(|data| {
            let non_empty = |key: &str| {
                data.get(key)
                    .and_then(Value::as_array)
                    .is_some_and(|a| !a.is_empty())
            };
            non_empty("labels") && non_empty("datasets")
        });

    if !usable {
        map.remove("chart");
        map.insert("layout".to_string(), Value::String("bullets".to_string()));
        return;
    }

    let Some(Value::Object(chart)) = map.get_mut("chart") else {
        return;
    };

    let chart_type = chart
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .filter(|t| SUPPORTED_CHART_TYPES.contains(&t.as_str()))
        .unwrap_or_else(|| DEFAULT_CHART_TYPE.to_string());
    chart.insert("type".to_string(), Value::String(chart_type));

    let Some(Value::Object(data)) = chart.get_mut("data") else {
        return;
    };
    let label_count = data
        .get("labels")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);

    if let Some(Value::Array(datasets)) = data.get_mut("datasets") {
        for dataset in datasets.iter_mut() {
            let Value::Object(dataset) = dataset else {
                continue;
            };
            let mut values: Vec<Value> = dataset
                .get("values")
                .and_then(Value::as_array)
                .map(|vs| vs.iter().map(coerce_number).collect())
                .unwrap_or_default();
            values.resize(label_count, Value::from(0));
            dataset.insert("values".to_string(), Value::Array(values));
        }
    }
}

fn coerce_number(value: &Value) -> Value {
    match value {
        Value::Number(_) => value.clone(),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map_or_else(|| Value::from(0), Value::Number),
        _ => Value::from(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn chart_slide(chart: Value) -> SlideRecord {
        SlideRecord::from(json!({
            "type": "content",
            "layout": "chart",
            "title": "Data",
            "chart": chart,
            "content": ["Fallback content"]
        }))
    }

    fn values_of(slide: &SlideRecord) -> Value {
        slide.as_map()["chart"]["data"]["datasets"][0]["values"].clone()
    }

    #[test]
    fn test_validate_deck_requires_theme_and_slides() {
        let ok = DeckDocument::parse(r#"{"designTheme":{},"slides":[{"title":"A"}]}"#).unwrap();
        assert!(validate_deck(&ok).is_ok());

        let no_theme = DeckDocument::parse(r#"{"slides":[{"title":"A"}]}"#).unwrap();
        assert!(matches!(
            validate_deck(&no_theme),
            Err(SlideStreamError::InvalidDocument { .. })
        ));

        let empty = DeckDocument::parse(r#"{"designTheme":{},"slides":[]}"#).unwrap();
        assert!(validate_deck(&empty).is_err());
    }

    #[test]
    fn test_valid_chart_is_unchanged() {
        let mut slides = vec![chart_slide(json!({
            "type": "column",
            "title": "Quarterly Revenue",
            "data": {"labels": ["Q1", "Q2"], "datasets": [{"name": "Rev", "values": [45, 52]}]}
        }))];
        assert_eq!(fix_chart_slides(&mut slides), 0);
        assert_eq!(slides[0].layout(), Some("chart"));
    }

    #[test]
    fn test_non_numeric_values_become_zero() {
        let mut slides = vec![chart_slide(json!({
            "type": "pie",
            "data": {"labels": ["A", "B", "C"], "datasets": [{"values": [30, "N/A", "12.5"]}]}
        }))];
        fix_chart_slides(&mut slides);
        assert_eq!(values_of(&slides[0]), json!([30, 0, 12.5]));
    }

    #[test]
    fn test_values_padded_to_label_count() {
        let mut slides = vec![chart_slide(json!({
            "type": "bar",
            "data": {"labels": ["Jan", "Feb", "Mar", "Apr"], "datasets": [{"values": [10, 20]}]}
        }))];
        fix_chart_slides(&mut slides);
        assert_eq!(values_of(&slides[0]), json!([10, 20, 0, 0]));
    }

    #[test]
    fn test_chart_type_normalization() {
        let mut slides = vec![
            chart_slide(json!({
                "type": "INVALID_TYPE",
                "data": {"labels": ["A"], "datasets": [{"values": [1]}]}
            })),
            chart_slide(json!({
                "type": "LINE",
                "data": {"labels": ["A"], "datasets": [{"values": [1]}]}
            })),
        ];
        fix_chart_slides(&mut slides);
        assert_eq!(slides[0].chart().unwrap().chart_type, "column");
        assert_eq!(slides[1].chart().unwrap().chart_type, "line");
    }

    #[test]
    fn test_empty_chart_becomes_bullets() {
        let mut slides = vec![chart_slide(json!({
            "type": "pie",
            "data": {"labels": [], "datasets": []}
        }))];
        assert_eq!(fix_chart_slides(&mut slides), 1);
        assert_eq!(slides[0].layout(), Some("bullets"));
        assert!(slides[0].chart().is_none());
        assert_eq!(slides[0].content(), vec!["Fallback content"]);
    }

    #[test]
    fn test_split_oversized_slides() {
        let bullets: Vec<String> = (1..=16).map(|i| format!("point {}", i)).collect();
        let slides = vec![
            SlideRecord::from(json!({"type": "title", "title": "Deck", "content": bullets})),
            SlideRecord::from(json!({
                "type": "content",
                "title": "Long",
                "content": bullets,
                "layout": "bullets"
            })),
            SlideRecord::from(json!({"type": "content", "title": "Short", "content": ["one"]})),
        ];

        let out = split_oversized_slides(slides);

        assert_eq!(out.len(), 5);
        assert_eq!(out[0].title(), Some("Deck"));
        assert_eq!(out[1].title(), Some("Long - Part 1"));
        assert_eq!(out[1].content().len(), 7);
        assert_eq!(out[2].title(), Some("Long - Part 2"));
        assert_eq!(out[3].title(), Some("Long - Part 3"));
        assert_eq!(out[3].content(), vec!["point 15", "point 16"]);
        assert_eq!(out[3].layout(), Some("bullets"));
        assert_eq!(out[4].title(), Some("Short"));
    }

    #[test]
    fn test_sanitize_deck() {
        let doc = DeckDocument::parse(
            r#"{"designTheme":{"name":"Blue"},"slides":[
                {"type":"content","title":"T","content":["1","2","3","4","5","6","7","8"]},
                {"type":"content","layout":"chart","title":"C","chart":{"type":"Pie","data":{"labels":["a"],"datasets":[{"values":["x"]}]}}}
            ]}"#,
        )
        .unwrap();

        let clean = sanitize_deck(doc).unwrap();
        assert_eq!(clean.slide_count(), 3);
        assert_eq!(clean.slides()[2].chart().unwrap().chart_type, "pie");
    }
}
