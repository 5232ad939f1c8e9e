//! Global char offset <-> (fragment, local offset) mapping.
//!
//! Built from a [`FragmentTree`] by walking its text fragments in document
//! order. Non-text nodes contribute nothing, however deeply they nest.

use std::collections::HashMap;
use std::ops::Range;

use crate::tree::{FragmentTree, NodeId};

/// A position inside a text fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextPoint {
    pub node: NodeId,
    /// Char offset within the fragment.
    pub offset: usize,
}

/// Which fragment wins when an offset sits exactly between two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Affinity {
    /// End of the preceding fragment.
    Before,
    /// Start of the following fragment.
    #[default]
    After,
}

/// The part of a global range that falls in one fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub node: NodeId,
    pub local: Range<usize>,
    pub global: Range<usize>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    node: NodeId,
    start: usize,
    len: usize,
}

impl Entry {
    fn end(&self) -> usize {
        self.start + self.len
    }
}

/// Snapshot of the text layout of a tree at one version.
#[derive(Debug, Clone)]
pub struct OffsetIndex {
    entries: Vec<Entry>,
    positions: HashMap<NodeId, usize>,
    total_len: usize,
    valid_len: usize,
    version: u64,
}

impl OffsetIndex {
    pub fn build(tree: &FragmentTree) -> Self {
        let mut entries = Vec::new();
        let mut positions = HashMap::new();
        let mut start = 0;
        for node in tree.text_nodes() {
            let len = tree.text_len(node).unwrap_or(0);
            positions.insert(node, entries.len());
            entries.push(Entry { node, start, len });
            start += len;
        }
        Self {
            entries,
            positions,
            total_len: start,
            valid_len: start,
            version: tree.version(),
        }
    }

    /// Build and compare against the text the caller believes the surface
    /// holds. Offsets past the first disagreement are treated as unresolvable.
    pub fn build_checked(tree: &FragmentTree, expected: &str) -> Self {
        let mut index = Self::build(tree);
        let mut expected_chars = expected.chars();
        let mut agreed = 0;
        'outer: for entry in &index.entries {
            let Some(text) = tree.text(entry.node) else {
                break;
            };
            for c in text.chars() {
                if expected_chars.next() != Some(c) {
                    break 'outer;
                }
                agreed += 1;
            }
        }
        if agreed != index.total_len || expected_chars.next().is_some() {
            tracing::debug!(
                target: "lumen::reconcile",
                agreed,
                tree_len = index.total_len,
                "surface text differs from expected text"
            );
        }
        index.valid_len = agreed;
        index
    }

    /// Total chars across all fragments.
    pub fn len(&self) -> usize {
        self.total_len
    }

    pub fn is_empty(&self) -> bool {
        self.total_len == 0
    }

    /// Length of the prefix that can be resolved.
    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Whether `tree` has changed since this index was built.
    pub fn is_stale(&self, tree: &FragmentTree) -> bool {
        self.version != tree.version()
    }

    pub fn fragment_count(&self) -> usize {
        self.entries.len()
    }

    pub fn locate(&self, offset: usize) -> Option<TextPoint> {
        self.locate_with_affinity(offset, Affinity::After)
    }

    pub fn locate_with_affinity(&self, offset: usize, affinity: Affinity) -> Option<TextPoint> {
        if offset > self.valid_len {
            return None;
        }
        let entry = match affinity {
            Affinity::After => {
                let idx = self.entries.partition_point(|e| e.end() <= offset);
                match self.entries.get(idx) {
                    Some(e) => e,
                    None => self.entries.last()?,
                }
            }
            Affinity::Before => {
                let idx = self.entries.partition_point(|e| e.start < offset);
                match idx.checked_sub(1) {
                    Some(i) => &self.entries[i],
                    None => self.entries.first()?,
                }
            }
        };
        Some(TextPoint {
            node: entry.node,
            offset: offset.saturating_sub(entry.start).min(entry.len),
        })
    }

    /// Global offset of a point, if the fragment is indexed.
    pub fn position_of(&self, node: NodeId, local: usize) -> Option<usize> {
        let entry = self.entries.get(*self.positions.get(&node)?)?;
        (local <= entry.len).then_some(entry.start + local)
    }

    /// Split a global range into per-fragment segments.
    ///
    /// Returns `None` when the range is inverted or reaches past the
    /// resolvable prefix.
    pub fn segments(&self, range: Range<usize>) -> Option<Vec<Segment>> {
        if range.start > range.end || range.end > self.valid_len {
            return None;
        }
        let first = self.entries.partition_point(|e| e.end() <= range.start);
        let segments = self.entries[first..]
            .iter()
            .take_while(|e| e.start < range.end)
            .filter_map(|e| {
                let from = range.start.max(e.start);
                let to = range.end.min(e.end());
                (from < to).then(|| Segment {
                    node: e.node,
                    local: from - e.start..to - e.start,
                    global: from..to,
                })
            })
            .collect();
        Some(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::NodeKind;

    /// "ab" <em>"cd" <strong>"ef"</strong></em> <br> "gh"
    fn nested() -> (FragmentTree, Vec<NodeId>) {
        let mut tree = FragmentTree::new();
        let root = tree.root();
        let ab = tree.append_text(root, "ab").unwrap();
        let em = tree
            .append_element(root, NodeKind::Inline { tag: "em".into() })
            .unwrap();
        let cd = tree.append_text(em, "cd").unwrap();
        let strong = tree
            .append_element(em, NodeKind::Inline { tag: "strong".into() })
            .unwrap();
        let ef = tree.append_text(strong, "ef").unwrap();
        tree.append_element(root, NodeKind::Opaque { tag: "br".into() });
        let gh = tree.append_text(root, "gh").unwrap();
        (tree, vec![ab, cd, ef, gh])
    }

    #[test]
    fn test_locate_across_nesting() {
        let (tree, n) = nested();
        let index = OffsetIndex::build(&tree);
        assert_eq!(index.len(), 8);
        assert_eq!(index.fragment_count(), 4);
        assert_eq!(index.locate(0), Some(TextPoint { node: n[0], offset: 0 }));
        assert_eq!(index.locate(5), Some(TextPoint { node: n[2], offset: 1 }));
        assert_eq!(index.locate(8), Some(TextPoint { node: n[3], offset: 2 }));
        assert_eq!(index.locate(9), None);
    }

    #[test]
    fn test_boundary_affinity() {
        let (tree, n) = nested();
        let index = OffsetIndex::build(&tree);
        assert_eq!(
            index.locate_with_affinity(2, Affinity::After),
            Some(TextPoint { node: n[1], offset: 0 })
        );
        assert_eq!(
            index.locate_with_affinity(2, Affinity::Before),
            Some(TextPoint { node: n[0], offset: 2 })
        );
        assert_eq!(
            index.locate_with_affinity(0, Affinity::Before),
            Some(TextPoint { node: n[0], offset: 0 })
        );
    }

    #[test]
    fn test_position_of_round_trips() {
        let (tree, _) = nested();
        let index = OffsetIndex::build(&tree);
        for offset in 0..=index.len() {
            let point = index.locate(offset).unwrap();
            assert_eq!(index.position_of(point.node, point.offset), Some(offset));
        }
    }

    #[test]
    fn test_segments() {
        let (tree, n) = nested();
        let index = OffsetIndex::build(&tree);
        let segs = index.segments(1..7).unwrap();
        assert_eq!(
            segs,
            vec![
                Segment { node: n[0], local: 1..2, global: 1..2 },
                Segment { node: n[1], local: 0..2, global: 2..4 },
                Segment { node: n[2], local: 0..2, global: 4..6 },
                Segment { node: n[3], local: 0..1, global: 6..7 },
            ]
        );
        assert_eq!(index.segments(3..3), Some(vec![]));
        assert_eq!(index.segments(5..99), None);
    }

    #[test]
    fn test_build_checked_limits_to_agreeing_prefix() {
        let (tree, _) = nested();
        let index = OffsetIndex::build_checked(&tree, "abcdXfgh");
        assert_eq!(index.valid_len(), 4);
        assert!(index.locate(4).is_some());
        assert!(index.locate(5).is_none());
        assert!(index.segments(2..4).is_some());
        assert!(index.segments(2..5).is_none());

        let exact = OffsetIndex::build_checked(&tree, "abcdefgh");
        assert_eq!(exact.valid_len(), 8);
    }

    #[test]
    fn test_staleness() {
        let (mut tree, n) = nested();
        let index = OffsetIndex::build(&tree);
        assert!(!index.is_stale(&tree));
        tree.insert_in_text(n[0], 1, "z");
        assert!(index.is_stale(&tree));
    }

    #[test]
    fn test_empty_tree() {
        let tree = FragmentTree::new();
        let index = OffsetIndex::build(&tree);
        assert!(index.is_empty());
        assert_eq!(index.locate(0), None);
        assert_eq!(index.segments(0..0), Some(vec![]));
    }
}
