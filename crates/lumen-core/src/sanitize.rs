//! Span sanitizing and validation.
//!
//! Turns whatever the labeling service returned into a set of spans that are
//! safe to render: in range, word-aligned, matching the live text, within the
//! per-category caps, and pairwise disjoint. Bad spans are dropped one at a
//! time and recorded; nothing here fails the batch.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::snap::snap_to_word_boundaries;
use crate::span::{Category, RawSpan, RawSpanError, Span, SpanKey, ValidatedSpan};
use crate::text::slice_chars;

/// Which span wins when two snapped ranges intersect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// Walk spans by descending start; the first one accepted keeps its range.
    #[default]
    FirstAccepted,
    /// Walk spans by descending confidence; ties fall back to descending start.
    HighestConfidence,
}

/// Validation knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SanitizeOptions {
    /// Overall cap on accepted spans. `None` means unlimited.
    pub max_spans: Option<usize>,
    /// Cap per category; the lowest-confidence excess is dropped.
    pub max_per_category: usize,
    /// Spans below this confidence are dropped. Spans without a confidence
    /// are kept.
    pub min_confidence: f32,
    pub overlap: OverlapPolicy,
    /// Check asserted quotes against the live text.
    pub validate_quotes: bool,
    /// Try to relocate spans whose quote no longer matches at their offsets.
    pub reanchor: bool,
    /// How far (in chars) from the original start a re-anchored quote may be.
    pub reanchor_window: usize,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            max_spans: None,
            max_per_category: 8,
            min_confidence: 0.0,
            overlap: OverlapPolicy::FirstAccepted,
            validate_quotes: true,
            reanchor: true,
            reanchor_window: 160,
        }
    }
}

/// Why a span was dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum DropReason {
    InvalidOffsets,
    UnknownCategory { label: String },
    LowConfidence,
    QuoteMismatch { expected: String, found: String },
    CategoryCap,
    Overlap,
    SpanCap,
}

/// A dropped span, by its position in the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dropped {
    pub index: usize,
    pub reason: DropReason,
}

/// Output of a sanitize pass. `spans` is ordered by descending highlight
/// start, the order the range wrapper consumes them in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sanitized {
    pub spans: Vec<ValidatedSpan>,
    pub dropped: Vec<Dropped>,
}

impl Sanitized {
    pub fn dropped_count(&self) -> usize {
        self.dropped.len()
    }
}

/// Sanitize raw wire spans against `text`.
pub fn sanitize(raw: &[RawSpan], text: &str, options: &SanitizeOptions) -> Sanitized {
    let mut dropped = Vec::new();
    let mut typed = Vec::with_capacity(raw.len());
    let mut origin = Vec::with_capacity(raw.len());

    for (index, raw_span) in raw.iter().enumerate() {
        match Span::from_raw(raw_span) {
            Ok(span) => {
                typed.push(span);
                origin.push(index);
            }
            Err(err) => {
                let reason = match err {
                    RawSpanError::InvalidOffsets => DropReason::InvalidOffsets,
                    RawSpanError::UnknownCategory(label) => DropReason::UnknownCategory { label },
                };
                tracing::debug!(
                    target: "lumen::sanitize",
                    index,
                    ?reason,
                    "dropping malformed span"
                );
                dropped.push(Dropped { index, reason });
            }
        }
    }

    let mut result = sanitize_spans(typed, text, options);
    for d in &mut result.dropped {
        d.index = origin[d.index];
    }
    result.dropped.extend(dropped);
    result.dropped.sort_by_key(|d| d.index);
    result
}

struct Candidate {
    index: usize,
    span: Span,
    highlight: Range<usize>,
}

/// Sanitize typed spans against `text`, using each span's display range.
pub fn sanitize_spans(spans: Vec<Span>, text: &str, options: &SanitizeOptions) -> Sanitized {
    let chars: Vec<char> = text.chars().collect();
    let mut dropped = Vec::new();
    let mut candidates = Vec::with_capacity(spans.len());

    for (index, span) in spans.into_iter().enumerate() {
        match validate_one(span, &chars, options) {
            Ok((span, highlight)) => candidates.push(Candidate {
                index,
                span,
                highlight,
            }),
            Err(reason) => dropped.push(Dropped { index, reason }),
        }
    }

    let candidates = apply_category_cap(candidates, options.max_per_category, &mut dropped);
    let mut accepted = resolve_overlaps(candidates, options.overlap, &mut dropped);

    if let Some(max) = options.max_spans {
        if accepted.len() > max {
            accepted.sort_by(|a, b| {
                b.span
                    .rank()
                    .total_cmp(&a.span.rank())
                    .then(a.highlight.start.cmp(&b.highlight.start))
            });
            for c in accepted.drain(max..) {
                dropped.push(Dropped {
                    index: c.index,
                    reason: DropReason::SpanCap,
                });
            }
        }
    }

    accepted.sort_by(|a, b| {
        b.highlight
            .start
            .cmp(&a.highlight.start)
            .then(b.highlight.end.cmp(&a.highlight.end))
    });
    dropped.sort_by_key(|d| d.index);

    Sanitized {
        spans: accepted
            .into_iter()
            .map(|c| ValidatedSpan {
                key: SpanKey::for_span(&c.span),
                span: c.span,
                highlight: c.highlight,
            })
            .collect(),
        dropped,
    }
}

fn validate_one(
    mut span: Span,
    chars: &[char],
    options: &SanitizeOptions,
) -> Result<(Span, Range<usize>), DropReason> {
    let range = span.display_range();
    if range.start >= range.end || range.end > chars.len() {
        tracing::debug!(
            target: "lumen::sanitize",
            start = range.start,
            end = range.end,
            text_len = chars.len(),
            "dropping out-of-range span"
        );
        return Err(DropReason::InvalidOffsets);
    }

    if let Some(confidence) = span.confidence {
        if confidence < options.min_confidence {
            return Err(DropReason::LowConfidence);
        }
    }

    let mut highlight = snap_to_word_boundaries(chars, range.clone());

    if options.validate_quotes {
        if let Some(quote) = span.render_quote().map(str::to_owned) {
            let found = slice_chars(chars, highlight.clone()).unwrap_or_default();
            if !quote_matches(&quote, &found) {
                let relocated = options
                    .reanchor
                    .then(|| reanchor(&span, &quote, chars, options.reanchor_window))
                    .flatten();

                match relocated {
                    Some(moved) => {
                        tracing::debug!(
                            target: "lumen::sanitize",
                            quote = %quote,
                            from = range.start,
                            to = moved.start,
                            "re-anchored span"
                        );
                        span.display_start = Some(moved.start);
                        span.display_end = Some(moved.end);
                        highlight = snap_to_word_boundaries(chars, moved);
                    }
                    None => {
                        tracing::debug!(
                            target: "lumen::sanitize",
                            expected = %quote,
                            found = %found,
                            category = %span.category,
                            "dropping span with mismatched quote"
                        );
                        return Err(DropReason::QuoteMismatch {
                            expected: quote,
                            found,
                        });
                    }
                }
            }
        }
    }

    Ok((span, highlight))
}

/// Compose, fold case and drop whitespace for fuzzy comparison.
fn fold(s: &str) -> String {
    s.nfc()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Case- and whitespace-insensitive quote check: equal, or either one
/// contains the other. An empty quote asserts nothing and always matches.
pub fn quote_matches(quote: &str, actual: &str) -> bool {
    let q = fold(quote);
    if q.is_empty() {
        return true;
    }
    let a = fold(actual);
    if a.is_empty() {
        return false;
    }
    q == a || a.contains(&q) || q.contains(&a)
}

fn lower(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

/// Find the quote elsewhere in the text.
///
/// Candidates must lie within `window` chars of the span's original start.
/// Occurrences whose neighbors match the span's context snippets win;
/// otherwise the closest one does.
fn reanchor(span: &Span, quote: &str, chars: &[char], window: usize) -> Option<Range<usize>> {
    let needle: Vec<char> = quote.trim().chars().map(lower).collect();
    if needle.is_empty() || needle.len() > chars.len() {
        return None;
    }
    let hay: Vec<char> = chars.iter().copied().map(lower).collect();
    let origin = span.display_range().start;

    let left: Vec<char> = span
        .left_ctx
        .as_deref()
        .map(|s| s.trim_start().chars().map(lower).collect())
        .unwrap_or_default();
    let right: Vec<char> = span
        .right_ctx
        .as_deref()
        .map(|s| s.trim_end().chars().map(lower).collect())
        .unwrap_or_default();

    let mut best: Option<(usize, usize, usize)> = None;
    for pos in 0..=hay.len() - needle.len() {
        if hay[pos..pos + needle.len()] != needle[..] {
            continue;
        }
        let distance = pos.abs_diff(origin);
        if distance > window {
            continue;
        }
        let end = pos + needle.len();
        let mut context = 0;
        if !left.is_empty() && hay[..pos].ends_with(&left) {
            context += 1;
        }
        if !right.is_empty() && hay[end..].starts_with(&right) {
            context += 1;
        }
        let better = match best {
            None => true,
            Some((_, best_context, best_distance)) => {
                context > best_context || (context == best_context && distance < best_distance)
            }
        };
        if better {
            best = Some((pos, context, distance));
        }
    }

    best.map(|(pos, _, _)| pos..pos + needle.len())
}

fn apply_category_cap(
    candidates: Vec<Candidate>,
    cap: usize,
    dropped: &mut Vec<Dropped>,
) -> Vec<Candidate> {
    let mut by_category: HashMap<Category, Vec<Candidate>> = HashMap::new();
    for c in candidates {
        by_category.entry(c.span.category).or_default().push(c);
    }

    let mut kept = Vec::new();
    for (category, mut group) in by_category {
        if group.len() > cap {
            group.sort_by(|a, b| {
                b.span
                    .rank()
                    .total_cmp(&a.span.rank())
                    .then(a.highlight.start.cmp(&b.highlight.start))
            });
            for c in group.drain(cap..) {
                tracing::debug!(
                    target: "lumen::sanitize",
                    %category,
                    cap,
                    start = c.highlight.start,
                    "dropping span over category cap"
                );
                dropped.push(Dropped {
                    index: c.index,
                    reason: DropReason::CategoryCap,
                });
            }
        }
        kept.extend(group);
    }
    kept
}

fn resolve_overlaps(
    mut candidates: Vec<Candidate>,
    policy: OverlapPolicy,
    dropped: &mut Vec<Dropped>,
) -> Vec<Candidate> {
    let by_position = |a: &Candidate, b: &Candidate| {
        b.highlight
            .start
            .cmp(&a.highlight.start)
            .then(b.highlight.end.cmp(&a.highlight.end))
            .then(a.index.cmp(&b.index))
    };
    match policy {
        OverlapPolicy::FirstAccepted => candidates.sort_by(by_position),
        OverlapPolicy::HighestConfidence => candidates.sort_by(|a, b| {
            b.span
                .rank()
                .total_cmp(&a.span.rank())
                .then_with(|| by_position(a, b))
        }),
    }

    // Accepted ranges keyed by start. They are disjoint, so the only one
    // that can intersect `r` is the last one starting before `r.end`.
    let mut taken: BTreeMap<usize, usize> = BTreeMap::new();
    let mut accepted = Vec::with_capacity(candidates.len());
    for c in candidates {
        let r = &c.highlight;
        let clash = taken
            .range(..r.end)
            .next_back()
            .is_some_and(|(_, &end)| end > r.start);
        if clash {
            tracing::debug!(
                target: "lumen::sanitize",
                start = r.start,
                end = r.end,
                category = %c.span.category,
                "dropping overlapping span"
            );
            dropped.push(Dropped {
                index: c.index,
                reason: DropReason::Overlap,
            });
            continue;
        }
        taken.insert(r.start, r.end);
        accepted.push(c);
    }
    accepted
}
