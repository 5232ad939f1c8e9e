//! Span model: the untrusted wire shape, the typed span, and the validated
//! span that the render layer consumes.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use smol_str::{SmolStr, ToSmolStr, format_smolstr};

/// Closed category taxonomy for labeled spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Subject,
    Appearance,
    Wardrobe,
    Action,
    Environment,
    Lighting,
    Camera,
    #[serde(alias = "motion")]
    CameraMotion,
    Style,
    Color,
    Time,
    Mood,
    Technical,
}

impl Category {
    pub const ALL: [Category; 13] = [
        Category::Subject,
        Category::Appearance,
        Category::Wardrobe,
        Category::Action,
        Category::Environment,
        Category::Lighting,
        Category::Camera,
        Category::CameraMotion,
        Category::Style,
        Category::Color,
        Category::Time,
        Category::Mood,
        Category::Technical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Subject => "subject",
            Category::Appearance => "appearance",
            Category::Wardrobe => "wardrobe",
            Category::Action => "action",
            Category::Environment => "environment",
            Category::Lighting => "lighting",
            Category::Camera => "camera",
            Category::CameraMotion => "camera-motion",
            Category::Style => "style",
            Category::Color => "color",
            Category::Time => "time",
            Category::Mood => "mood",
            Category::Technical => "technical",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown category label.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown span category {0:?}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    /// Case-insensitive; `_` and spaces are treated as `-`. Accepts the
    /// service's legacy aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let folded: String = s
            .trim()
            .chars()
            .map(|c| match c {
                '_' | ' ' => '-',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        let category = match folded.as_str() {
            "motion" | "camera-movement" => Category::CameraMotion,
            "shot" | "framing" => Category::Camera,
            "setting" | "location" => Category::Environment,
            "colour" => Category::Color,
            "time-of-day" => Category::Time,
            other => match Category::ALL.iter().find(|c| c.as_str() == other) {
                Some(c) => *c,
                None => return Err(UnknownCategory(s.to_string())),
            },
        };
        Ok(category)
    }
}

/// A span as it arrives from the labeling boundary. Nothing here is trusted:
/// offsets may be fractional or non-finite and the category is free text.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSpan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub start: f64,
    pub end: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_start: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_end: Option<f64>,
    #[serde(default, alias = "role")]
    pub category: String,
    #[serde(default, alias = "text", skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_ctx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_ctx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// Why a raw span could not become a [`Span`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawSpanError {
    InvalidOffsets,
    UnknownCategory(String),
}

/// A structurally valid span.
///
/// `start..end` addresses the logical (canonical) text; `display_*` address
/// the rendered surface text when it differs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<SmolStr>,
    pub start: usize,
    pub end: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_end: Option<usize>,
    pub category: Category,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_quote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_ctx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_ctx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl Span {
    /// Minimal span with no quote, context or identity.
    pub fn new(start: usize, end: usize, category: Category) -> Self {
        Self {
            id: None,
            start,
            end,
            display_start: None,
            display_end: None,
            category,
            quote: None,
            display_quote: None,
            left_ctx: None,
            right_ctx: None,
            confidence: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<SmolStr>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = Some(quote.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_context(mut self, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.left_ctx = Some(left.into());
        self.right_ctx = Some(right.into());
        self
    }

    /// Convert an untrusted wire span, checking offsets and taxonomy.
    ///
    /// Fractional offsets are widened (start floored, end ceiled); the range
    /// check against the text happens later in the sanitizer.
    pub fn from_raw(raw: &RawSpan) -> Result<Self, RawSpanError> {
        let (start, end) = offsets(raw.start, raw.end).ok_or(RawSpanError::InvalidOffsets)?;

        let display = match (raw.display_start, raw.display_end) {
            (Some(ds), Some(de)) => {
                Some(offsets(ds, de).ok_or(RawSpanError::InvalidOffsets)?)
            }
            _ => None,
        };

        let category = raw
            .category
            .parse::<Category>()
            .map_err(|e| RawSpanError::UnknownCategory(e.0))?;

        let confidence = raw
            .confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0) as f32);

        Ok(Self {
            id: raw
                .id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| id.to_smolstr()),
            start,
            end,
            display_start: display.map(|d| d.0),
            display_end: display.map(|d| d.1),
            category,
            quote: raw.quote.clone(),
            display_quote: raw.display_quote.clone(),
            left_ctx: raw.left_ctx.clone(),
            right_ctx: raw.right_ctx.clone(),
            confidence,
        })
    }

    /// Range used for rendering: display offsets when both are set,
    /// logical offsets otherwise.
    pub fn display_range(&self) -> Range<usize> {
        match (self.display_start, self.display_end) {
            (Some(s), Some(e)) => s..e,
            _ => self.start..self.end,
        }
    }

    /// Quote to validate against the rendered text.
    pub fn render_quote(&self) -> Option<&str> {
        self.display_quote.as_deref().or(self.quote.as_deref())
    }

    /// Confidence used for ranking; unknown confidence ranks lowest.
    pub fn rank(&self) -> f32 {
        self.confidence.unwrap_or(0.0)
    }
}

fn offsets(start: f64, end: f64) -> Option<(usize, usize)> {
    if !start.is_finite() || !end.is_finite() || start < 0.0 || end <= start {
        return None;
    }
    let start = start.floor();
    let end = end.ceil();
    if end > usize::MAX as f64 {
        return None;
    }
    Some((start as usize, end as usize))
}

/// Identity used for diffing spans between renders.
///
/// Spans without a service-issued id fall back to `start:end:category`,
/// which cannot follow a span that moves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanKey(SmolStr);

impl SpanKey {
    pub fn for_span(span: &Span) -> Self {
        match &span.id {
            Some(id) => SpanKey(id.clone()),
            None => SpanKey(format_smolstr!(
                "{}:{}:{}",
                span.start,
                span.end,
                span.category
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpanKey {
    fn from(value: &str) -> Self {
        SpanKey(value.to_smolstr())
    }
}

/// A span that passed validation, with its word-snapped highlight range in
/// display offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedSpan {
    pub key: SpanKey,
    pub span: Span,
    pub highlight: Range<usize>,
}

impl ValidatedSpan {
    pub fn new(span: Span, highlight: Range<usize>) -> Self {
        Self {
            key: SpanKey::for_span(&span),
            span,
            highlight,
        }
    }

    pub fn category(&self) -> Category {
        self.span.category
    }

    /// Whether rendering `other` in place of `self` would change the tree.
    pub fn renders_same(&self, other: &ValidatedSpan) -> bool {
        self.highlight == other.highlight
            && self.span.category == other.span.category
            && self.span.render_quote() == other.span.render_quote()
    }

    pub fn intersects(&self, other: &ValidatedSpan) -> bool {
        self.highlight.start < other.highlight.end && other.highlight.start < self.highlight.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_aliases() {
        assert_eq!("subject".parse::<Category>().unwrap(), Category::Subject);
        assert_eq!("Camera_Motion".parse::<Category>().unwrap(), Category::CameraMotion);
        assert_eq!("motion".parse::<Category>().unwrap(), Category::CameraMotion);
        assert_eq!("shot".parse::<Category>().unwrap(), Category::Camera);
        assert!("vibes".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde_kebab() {
        let json = serde_json::to_string(&Category::CameraMotion).unwrap();
        assert_eq!(json, "\"camera-motion\"");
        let back: Category = serde_json::from_str("\"motion\"").unwrap();
        assert_eq!(back, Category::CameraMotion);
    }

    #[test]
    fn test_from_raw_rejects_bad_offsets() {
        let base = RawSpan {
            start: 2.0,
            end: 14.0,
            category: "subject".into(),
            ..Default::default()
        };
        assert!(Span::from_raw(&base).is_ok());

        for (start, end) in [
            (f64::NAN, 4.0),
            (0.0, f64::INFINITY),
            (5.0, 5.0),
            (7.0, 3.0),
            (-1.0, 3.0),
        ] {
            let raw = RawSpan {
                start,
                end,
                ..base.clone()
            };
            assert_eq!(Span::from_raw(&raw), Err(RawSpanError::InvalidOffsets));
        }
    }

    #[test]
    fn test_from_raw_widens_fractional_offsets() {
        let raw = RawSpan {
            start: 2.6,
            end: 13.2,
            category: "subject".into(),
            confidence: Some(1.7),
            ..Default::default()
        };
        let span = Span::from_raw(&raw).unwrap();
        assert_eq!(span.start..span.end, 2..14);
        assert_eq!(span.confidence, Some(1.0));
    }

    #[test]
    fn test_from_raw_unknown_category() {
        let raw = RawSpan {
            start: 0.0,
            end: 3.0,
            category: "vibes".into(),
            ..Default::default()
        };
        assert_eq!(
            Span::from_raw(&raw),
            Err(RawSpanError::UnknownCategory("vibes".into()))
        );
    }

    #[test]
    fn test_raw_span_wire_shape() {
        let raw: RawSpan = serde_json::from_str(
            r#"{"id":"s1","start":2,"end":14,"category":"subject","quote":"lone cyclist","leftCtx":"A ","confidence":0.9}"#,
        )
        .unwrap();
        assert_eq!(raw.id.as_deref(), Some("s1"));
        assert_eq!(raw.left_ctx.as_deref(), Some("A "));
        assert_eq!(raw.confidence, Some(0.9));
    }

    #[test]
    fn test_span_key_composite() {
        let span = Span::new(2, 14, Category::Subject);
        assert_eq!(SpanKey::for_span(&span).as_str(), "2:14:subject");
        let span = span.with_id("abc");
        assert_eq!(SpanKey::for_span(&span).as_str(), "abc");
    }

    #[test]
    fn test_display_range_fallback() {
        let mut span = Span::new(3, 8, Category::Mood);
        assert_eq!(span.display_range(), 3..8);
        span.display_start = Some(4);
        assert_eq!(span.display_range(), 3..8);
        span.display_end = Some(9);
        assert_eq!(span.display_range(), 4..9);
    }

    #[test]
    fn test_renders_same_ignores_confidence() {
        let a = ValidatedSpan::new(Span::new(0, 4, Category::Mood).with_confidence(0.2), 0..4);
        let b = ValidatedSpan::new(Span::new(0, 4, Category::Mood).with_confidence(0.9), 0..4);
        assert!(a.renders_same(&b));
        let c = ValidatedSpan::new(Span::new(0, 4, Category::Style), 0..4);
        assert!(!a.renders_same(&c));
    }
}
