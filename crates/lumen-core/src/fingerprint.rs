//! Composite signature of (text, spans) used to skip reconcile passes.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::span::ValidatedSpan;
use crate::text::hash_source;

/// In-process fingerprint of a render input. Order of spans does not matter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    pub fn compute(text: &str, spans: &[ValidatedSpan]) -> Self {
        let mut span_hashes: Vec<u64> = spans.iter().map(span_hash).collect();
        span_hashes.sort_unstable();

        let mut hasher = DefaultHasher::new();
        hash_source(text).hash(&mut hasher);
        span_hashes.hash(&mut hasher);
        Fingerprint(hasher.finish())
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

fn span_hash(span: &ValidatedSpan) -> u64 {
    let mut hasher = DefaultHasher::new();
    span.key.hash(&mut hasher);
    span.highlight.hash(&mut hasher);
    span.span.category.hash(&mut hasher);
    span.span.render_quote().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Category, Span};

    fn spans() -> Vec<ValidatedSpan> {
        vec![
            ValidatedSpan::new(Span::new(2, 14, Category::Subject), 2..14),
            ValidatedSpan::new(Span::new(25, 30, Category::Mood), 25..30),
        ]
    }

    #[test]
    fn test_order_insensitive() {
        let a = spans();
        let mut b = spans();
        b.reverse();
        assert_eq!(Fingerprint::compute("t", &a), Fingerprint::compute("t", &b));
    }

    #[test]
    fn test_sensitive_to_text_and_spans() {
        let base = Fingerprint::compute("t", &spans());
        assert_ne!(base, Fingerprint::compute("u", &spans()));

        let mut moved = spans();
        moved[1].highlight = 25..31;
        assert_ne!(base, Fingerprint::compute("t", &moved));

        let mut recategorized = spans();
        recategorized[1].span.category = Category::Lighting;
        assert_ne!(base, Fingerprint::compute("t", &recategorized));

        assert_ne!(base, Fingerprint::compute("t", &[]));
    }
}
