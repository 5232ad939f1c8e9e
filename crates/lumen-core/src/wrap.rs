//! Wrapping global ranges in annotation fragments.

use std::ops::Range;

use crate::offset_index::OffsetIndex;
use crate::tree::{Annotation, FragmentTree, NodeId, NodeKind};

/// One piece of a range being wrapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapSegment {
    pub part: usize,
    pub parts: usize,
    pub range: Range<usize>,
}

/// Wrap `range` with one annotation per fragment it touches.
///
/// Each covered fragment is split at the range edges and its middle piece
/// is wrapped in place; fragments are never merged. Returns the wrappers in
/// document order, or an empty list if the range cannot be resolved against
/// `index` or the tree no longer matches it. In that case the tree is left
/// untouched.
pub fn wrap_range(
    tree: &mut FragmentTree,
    range: Range<usize>,
    index: &OffsetIndex,
    mut make: impl FnMut(&WrapSegment) -> Annotation,
) -> Vec<NodeId> {
    let Some(segments) = index.segments(range.clone()) else {
        tracing::debug!(
            target: "lumen::reconcile",
            start = range.start,
            end = range.end,
            valid_len = index.valid_len(),
            "range not resolvable"
        );
        return Vec::new();
    };

    // Check everything before mutating so a failure cannot leave a partial wrap.
    for seg in &segments {
        match tree.text_len(seg.node) {
            Some(len) if seg.local.end <= len => {}
            _ => {
                tracing::debug!(
                    target: "lumen::reconcile",
                    start = range.start,
                    end = range.end,
                    "fragment changed under the index"
                );
                return Vec::new();
            }
        }
    }

    let parts = segments.len();
    let mut wrappers = Vec::with_capacity(parts);
    // Back to front, so splitting one fragment never shifts another's offsets.
    for (part, seg) in segments.into_iter().enumerate().rev() {
        let mut target = seg.node;
        if let Some(len) = tree.text_len(target) {
            if seg.local.end < len {
                tree.split_text(target, seg.local.end);
            }
        }
        if seg.local.start > 0 {
            match tree.split_text(target, seg.local.start) {
                Some(tail) => target = tail,
                None => continue,
            }
        }
        let annotation = make(&WrapSegment {
            part,
            parts,
            range: seg.global.clone(),
        });
        if let Some(wrapper) = tree.wrap_node(target, NodeKind::Annotation(annotation)) {
            wrappers.push(wrapper);
        }
    }
    wrappers.reverse();
    wrappers
}

/// Remove an annotation wrapper, restoring its children in place.
/// Anything other than a live annotation is left alone.
pub fn unwrap_annotation(tree: &mut FragmentTree, id: NodeId) -> bool {
    match tree.kind(id) {
        Some(NodeKind::Annotation(_)) => tree.unwrap_node(id),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::{Category, SpanKey};

    fn make(key: &str) -> impl FnMut(&WrapSegment) -> Annotation + '_ {
        move |seg| Annotation {
            key: SpanKey::from(key),
            category: Category::Mood,
            part: seg.part,
        }
    }

    #[test]
    fn test_wrap_inside_single_fragment() {
        let mut tree = FragmentTree::from_text("a foggy bridge");
        let index = OffsetIndex::build(&tree);
        let wrappers = wrap_range(&mut tree, 2..7, &index, make("k"));
        assert_eq!(wrappers.len(), 1);
        assert_eq!(tree.subtree_text(wrappers[0]), "foggy");
        assert_eq!(tree.document_text(), "a foggy bridge");
        insta::assert_snapshot!(tree.to_html(), @r#"a <span class="hl hl-mood" data-category="mood" data-span-key="k">foggy</span> bridge"#);
    }

    #[test]
    fn test_wrap_across_fragments() {
        let mut tree = FragmentTree::new();
        let root = tree.root();
        tree.append_text(root, "ab");
        let em = tree
            .append_element(root, NodeKind::Inline { tag: "em".into() })
            .unwrap();
        tree.append_text(em, "cd");
        tree.append_text(root, "ef");
        let index = OffsetIndex::build(&tree);

        let wrappers = wrap_range(&mut tree, 1..5, &index, make("k"));
        assert_eq!(wrappers.len(), 3);
        let texts: Vec<_> = wrappers.iter().map(|w| tree.subtree_text(*w)).collect();
        assert_eq!(texts, vec!["b", "cd", "e"]);
        let parts: Vec<_> = tree.annotations().iter().map(|(_, a)| a.part).collect();
        assert_eq!(parts, vec![0, 1, 2]);
        assert_eq!(tree.document_text(), "abcdef");
    }

    #[test]
    fn test_wrap_whole_fragment_does_not_split() {
        let mut tree = FragmentTree::from_text("fog");
        let index = OffsetIndex::build(&tree);
        let wrappers = wrap_range(&mut tree, 0..3, &index, make("k"));
        assert_eq!(wrappers.len(), 1);
        assert_eq!(tree.text_nodes().len(), 1);
    }

    #[test]
    fn test_out_of_bounds_is_empty_and_untouched() {
        let mut tree = FragmentTree::from_text("fog");
        let index = OffsetIndex::build(&tree);
        let version = tree.version();
        assert!(wrap_range(&mut tree, 1..9, &index, make("k")).is_empty());
        assert!(wrap_range(&mut tree, 2..1, &index, make("k")).is_empty());
        assert_eq!(tree.version(), version);
    }

    #[test]
    fn test_stale_index_is_rejected() {
        let mut tree = FragmentTree::from_text("foggy bridge");
        let index = OffsetIndex::build(&tree);
        let first = tree.text_nodes()[0];
        tree.delete_in_text(first, 0..6);
        let version = tree.version();
        assert!(wrap_range(&mut tree, 6..12, &index, make("k")).is_empty());
        assert_eq!(tree.version(), version);
    }

    #[test]
    fn test_unwrap_restores_original_structure() {
        let mut tree = FragmentTree::from_text("a foggy bridge");
        let index = OffsetIndex::build(&tree);
        let wrappers = wrap_range(&mut tree, 2..7, &index, make("k"));
        assert!(unwrap_annotation(&mut tree, wrappers[0]));
        assert!(!unwrap_annotation(&mut tree, wrappers[0]));
        assert_eq!(tree.text_nodes().len(), 1);
        assert_eq!(tree.to_html(), "a foggy bridge");

        let root = tree.root();
        assert!(!unwrap_annotation(&mut tree, root));
    }
}
