//! Slide deck document types.
//!
//! The model output is not trusted to match a schema, so these types wrap
//! JSON maps and expose typed accessors instead of deserializing strictly.
//! Unknown fields survive a round trip untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Top-level key holding the theme object.
pub const THEME_KEY: &str = "designTheme";
/// Top-level key holding the slides array.
pub const SLIDES_KEY: &str = "slides";
/// Top-level key holding the suggested theme preset.
pub const SUGGESTED_THEME_KEY: &str = "suggestedThemeKey";

/// A parsed slide deck.
///
/// Produced every time a complete JSON span is parsed from the stream buffer;
/// each newer parse supersedes the previous one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value")]
pub struct DeckDocument {
    /// Name of a built-in theme preset the model suggested.
    #[serde(rename = "suggestedThemeKey", skip_serializing_if = "Option::is_none")]
    pub suggested_theme_key: Option<String>,
    /// Theme object, if present and an object.
    #[serde(rename = "designTheme", skip_serializing_if = "Option::is_none")]
    pub design_theme: Option<DesignTheme>,
    /// Slides array, if present and an array.
    #[serde(rename = "slides", skip_serializing_if = "Option::is_none")]
    pub slides: Option<Vec<SlideRecord>>,
    /// Any other top-level fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DeckDocument {
    /// Parses a JSON string into a document.
    ///
    /// Fails if the text is not JSON or the top-level value is not an object.
    pub fn parse(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Returns the slides, or an empty slice when the array is absent.
    pub fn slides(&self) -> &[SlideRecord] {
        self.slides.as_deref().unwrap_or_default()
    }

    /// Number of slides currently known.
    pub fn slide_count(&self) -> usize {
        self.slides().len()
    }

    /// True when both a theme object and a slides array are present.
    pub fn has_deck_shape(&self) -> bool {
        self.design_theme.is_some() && self.slides.is_some()
    }
}

impl TryFrom<Value> for DeckDocument {
    type Error = String;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        let Value::Object(mut map) = value else {
            return Err("deck document must be a JSON object".to_string());
        };

        let suggested_theme_key = match map.remove(SUGGESTED_THEME_KEY) {
            Some(Value::String(key)) => Some(key),
            Some(other) => {
                map.insert(SUGGESTED_THEME_KEY.to_string(), other);
                None
            }
            None => None,
        };

        let design_theme = match map.remove(THEME_KEY) {
            Some(Value::Object(theme)) => Some(DesignTheme(theme)),
            Some(other) => {
                map.insert(THEME_KEY.to_string(), other);
                None
            }
            None => None,
        };

        let slides = match map.remove(SLIDES_KEY) {
            Some(Value::Array(items)) => Some(items.into_iter().map(SlideRecord::from).collect()),
            Some(other) => {
                map.insert(SLIDES_KEY.to_string(), other);
                None
            }
            None => None,
        };

        Ok(Self {
            suggested_theme_key,
            design_theme,
            slides,
            extra: map,
        })
    }
}

/// Theme object: field name to color or string value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesignTheme(pub Map<String, Value>);

impl DesignTheme {
    /// Theme display name.
    pub fn name(&self) -> Option<&str> {
        self.get_str("name")
    }

    /// Theme description.
    pub fn description(&self) -> Option<&str> {
        self.get_str("description")
    }

    /// Primary color.
    pub fn color_primary(&self) -> Option<&str> {
        self.get_str("colorPrimary")
    }

    /// Looks up a string-valued field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// A single slide as produced by the model.
///
/// Wraps the raw JSON map. Non-object array entries become empty records,
/// which are never eligible for emission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlideRecord(pub Map<String, Value>);

impl From<Value> for SlideRecord {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => SlideRecord(map),
            _ => SlideRecord::default(),
        }
    }
}

impl From<Map<String, Value>> for SlideRecord {
    fn from(map: Map<String, Value>) -> Self {
        SlideRecord(map)
    }
}

impl SlideRecord {
    /// Slide title.
    pub fn title(&self) -> Option<&str> {
        self.get_str("title")
    }

    /// Slide type (`title`, `content`, ...).
    pub fn slide_type(&self) -> Option<&str> {
        self.get_str("type")
    }

    /// Slide subtitle.
    pub fn subtitle(&self) -> Option<&str> {
        self.get_str("subtitle")
    }

    /// Layout name (`bullets`, `chart`, `two-column`, ...).
    pub fn layout(&self) -> Option<&str> {
        self.get_str("layout")
    }

    /// Description of an image to generate for this slide.
    pub fn image_description(&self) -> Option<&str> {
        self.get_str("imageDescription")
    }

    /// Content bullets. Non-string entries are skipped.
    pub fn content(&self) -> Vec<&str> {
        self.0
            .get("content")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Typed chart descriptor, if present and well formed.
    pub fn chart(&self) -> Option<Chart> {
        self.0
            .get("chart")
            .and_then(|chart| serde_json::from_value(chart.clone()).ok())
    }

    /// True if the slide has a non-empty `title` or `type`.
    ///
    /// A slide that parses but carries neither is not considered complete.
    pub fn is_eligible(&self) -> bool {
        let non_empty = |v: Option<&str>| v.is_some_and(|s| !s.trim().is_empty());
        non_empty(self.title()) || non_empty(self.slide_type())
    }

    /// Looks up a string-valued field.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Returns the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Returns the underlying map mutably.
    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }
}

/// Chart descriptor attached to a chart slide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chart {
    /// Chart type (`bar`, `column`, `line`, `pie`, `area`).
    #[serde(rename = "type", default)]
    pub chart_type: String,
    /// Chart title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Chart data.
    pub data: ChartData,
}

/// Labels and datasets of a chart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    /// Category labels.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Data series.
    #[serde(default)]
    pub datasets: Vec<Dataset>,
}

/// One data series.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Series name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Series values, one per label.
    #[serde(default)]
    pub values: Vec<f64>,
}
