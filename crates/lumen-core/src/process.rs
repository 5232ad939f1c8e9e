//! Pure span processing, shared by the offload worker and its fallback.

use serde::{Deserialize, Serialize};

use lumen_common::perf::now;

use crate::sanitize::{SanitizeOptions, sanitize_spans};
use crate::span::{Span, ValidatedSpan};

/// Summary of one processing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMeta {
    pub input_count: usize,
    pub accepted_count: usize,
    pub dropped_count: usize,
    pub elapsed_ms: f64,
    /// Set by the offloader when the work ran on the worker thread.
    #[serde(default)]
    pub offloaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutput {
    pub processed_spans: Vec<ValidatedSpan>,
    pub meta: ProcessMeta,
}

/// Validate, sort and resolve overlaps for `spans` against `text`.
///
/// Deterministic for a given input, wherever it runs.
pub fn process_spans(spans: Vec<Span>, text: &str, options: &SanitizeOptions) -> ProcessOutput {
    let started = now();
    let input_count = spans.len();
    let sanitized = sanitize_spans(spans, text, options);
    ProcessOutput {
        meta: ProcessMeta {
            input_count,
            accepted_count: sanitized.spans.len(),
            dropped_count: sanitized.dropped_count(),
            elapsed_ms: now() - started,
            offloaded: false,
        },
        processed_spans: sanitized.spans,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Category;

    #[test]
    fn test_counts_and_order() {
        let text = "A lone cyclist crosses a foggy bridge at dawn";
        let spans = vec![
            Span::new(2, 14, Category::Subject),
            Span::new(41, 45, Category::Time),
            Span::new(7, 22, Category::Action),
            Span::new(40, 90, Category::Time),
        ];
        let out = process_spans(spans, text, &SanitizeOptions::default());
        assert_eq!(out.meta.input_count, 4);
        assert_eq!(out.meta.accepted_count, 2);
        assert_eq!(out.meta.dropped_count, 2);
        let starts: Vec<_> = out.processed_spans.iter().map(|s| s.highlight.start).collect();
        assert_eq!(starts, vec![41, 7]);
    }

    #[test]
    fn test_meta_wire_shape() {
        let meta = ProcessMeta {
            input_count: 3,
            accepted_count: 2,
            dropped_count: 1,
            elapsed_ms: 0.5,
            offloaded: true,
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["inputCount"], 3);
        assert_eq!(json["droppedCount"], 1);
        assert_eq!(json["offloaded"], true);
    }
}
