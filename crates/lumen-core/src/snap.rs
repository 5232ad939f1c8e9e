//! Token-boundary snapping.
//!
//! Labeling offsets are often a character or two off. Snapping widens a
//! range outward until neither edge sits inside a word.

use std::ops::Range;

/// Word characters for boundary purposes.
pub fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `pos` is a token boundary in `chars`.
///
/// `0` and `chars.len()` are boundaries; otherwise a boundary is any
/// position where the chars on either side differ in word class.
pub fn is_token_boundary(chars: &[char], pos: usize) -> bool {
    if pos == 0 || pos >= chars.len() {
        return true;
    }
    is_word_char(chars[pos - 1]) != is_word_char(chars[pos])
}

/// Snap `range` outward to the nearest token boundaries.
///
/// Only splits between two word characters are widened; a range that starts
/// or ends next to punctuation or whitespace is left alone. The result never
/// shrinks and is clamped to the text.
pub fn snap_to_word_boundaries(chars: &[char], range: Range<usize>) -> Range<usize> {
    let len = chars.len();
    let mut start = range.start.min(len);
    let mut end = range.end.min(len).max(start);

    while start > 0 && start < len && is_word_char(chars[start - 1]) && is_word_char(chars[start])
    {
        start -= 1;
    }

    while end > 0 && end < len && is_word_char(chars[end - 1]) && is_word_char(chars[end]) {
        end += 1;
    }

    start..end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    #[test]
    fn test_aligned_range_unchanged() {
        let text = chars("A lone cyclist crosses a foggy bridge at dawn");
        assert_eq!(snap_to_word_boundaries(&text, 2..14), 2..14);
    }

    #[test]
    fn test_snaps_outward_both_edges() {
        let text = chars("A lone cyclist crosses");
        // "one cycli" -> "lone cyclist"
        assert_eq!(snap_to_word_boundaries(&text, 3..12), 2..14);
    }

    #[test]
    fn test_never_snaps_inward() {
        let text = chars("foggy bridge");
        // Range starting on the space stays put.
        assert_eq!(snap_to_word_boundaries(&text, 5..12), 5..12);
    }

    #[test]
    fn test_punctuation_is_boundary() {
        let text = chars("Close-up of a face");
        assert!(is_token_boundary(&text, 5));
        assert!(is_token_boundary(&text, 6));
        assert_eq!(snap_to_word_boundaries(&text, 1..7), 0..8);
    }

    #[test]
    fn test_clamps_to_text() {
        let text = chars("dawn");
        assert_eq!(snap_to_word_boundaries(&text, 2..10), 0..4);
    }

    #[test]
    fn test_boundary_invariant_holds_for_every_range() {
        let text = chars("wide shot, golden-hour light_rays over 3 hills");
        for start in 0..text.len() {
            for end in start + 1..=text.len() {
                let snapped = snap_to_word_boundaries(&text, start..end);
                assert!(snapped.start <= start && snapped.end >= end);
                assert!(is_token_boundary(&text, snapped.start));
                assert!(is_token_boundary(&text, snapped.end));
            }
        }
    }
}
