//! Text normalization and signatures.
//!
//! Canonical form is NFC applied per extended grapheme cluster, so the
//! offset map in `display` can translate positions cluster by cluster.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// Canonicalize text before hashing or sending it to the labeling service.
///
/// Line endings are folded to `\n` and each grapheme cluster is NFC-composed.
pub fn normalize_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for cluster in text.graphemes(true) {
        push_canonical_cluster(&mut out, cluster);
    }
    out
}

/// Append the canonical form of one grapheme cluster.
pub(crate) fn push_canonical_cluster(out: &mut String, cluster: &str) {
    if cluster == "\r\n" || cluster == "\r" {
        out.push('\n');
    } else {
        out.extend(cluster.nfc());
    }
}

/// Stable content signature of a text (blake3, hex).
///
/// Used as the validity check for cached and persisted highlight snapshots,
/// so it must not change across builds or platforms.
pub fn text_signature(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Cheap in-process hash for change detection.
///
/// Not stable across builds; never persist it.
pub fn hash_source(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

/// Number of chars (Unicode scalar values) in `text`.
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Slice `chars` by a char range, returning `None` when out of bounds.
pub fn slice_chars(chars: &[char], range: std::ops::Range<usize>) -> Option<String> {
    if range.start > range.end || range.end > chars.len() {
        return None;
    }
    Some(chars[range].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_composes() {
        // "e" + combining acute -> single precomposed char
        let decomposed = "cafe\u{0301}";
        let normalized = normalize_text(decomposed);
        assert_eq!(normalized, "caf\u{e9}");
        assert_eq!(char_len(&normalized), 4);
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_text("a\r\nb\rc"), "a\nb\nc");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let once = normalize_text("Cafe\u{0301} at dawn\r\n");
        assert_eq!(normalize_text(&once), once);
    }

    #[test]
    fn test_signature_stable_and_distinct() {
        let a = text_signature("A lone cyclist");
        assert_eq!(a, text_signature("A lone cyclist"));
        assert_ne!(a, text_signature("A lone cyclist."));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_source() {
        assert_eq!(hash_source("fog"), hash_source("fog"));
        assert_ne!(hash_source("fog"), hash_source("smog"));
    }

    #[test]
    fn test_slice_chars_bounds() {
        let chars: Vec<char> = "héllo".chars().collect();
        assert_eq!(slice_chars(&chars, 1..3).as_deref(), Some("él"));
        assert_eq!(slice_chars(&chars, 3..9), None);
    }
}
