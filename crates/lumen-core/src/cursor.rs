//! Selection capture and restore across tree mutations.
//!
//! Tree points go stale when the fragments they reference are split or
//! merged, so the surface lowers its selection to global offsets before a
//! reconcile and resolves them again afterwards.

use crate::offset_index::{Affinity, OffsetIndex, TextPoint};
use crate::tree::FragmentTree;

/// Selection as global char offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Selection {
    /// Where selection started
    pub anchor: usize,
    /// Where cursor is now
    pub head: usize,
}

impl Selection {
    pub fn new(anchor: usize, head: usize) -> Self {
        Self { anchor, head }
    }

    /// Cursor position with nothing selected.
    pub fn collapsed(offset: usize) -> Self {
        Self {
            anchor: offset,
            head: offset,
        }
    }

    pub fn start(&self) -> usize {
        self.anchor.min(self.head)
    }

    pub fn end(&self) -> usize {
        self.anchor.max(self.head)
    }

    pub fn is_collapsed(&self) -> bool {
        self.anchor == self.head
    }

    pub fn contains(&self, offset: usize) -> bool {
        offset >= self.start() && offset < self.end()
    }

    /// Clamp both ends to `len`.
    pub fn clamped(self, len: usize) -> Self {
        Self {
            anchor: self.anchor.min(len),
            head: self.head.min(len),
        }
    }
}

/// Selection as points inside text fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointSelection {
    pub anchor: TextPoint,
    pub head: TextPoint,
}

impl PointSelection {
    pub fn collapsed(point: TextPoint) -> Self {
        Self {
            anchor: point,
            head: point,
        }
    }
}

/// Lower a point selection to global offsets. `None` if either point no
/// longer names an indexed fragment.
pub fn capture_selection(tree: &FragmentTree, points: &PointSelection) -> Option<Selection> {
    let index = OffsetIndex::build(tree);
    Some(Selection {
        anchor: index.position_of(points.anchor.node, points.anchor.offset)?,
        head: index.position_of(points.head.node, points.head.offset)?,
    })
}

/// Resolve a global selection against the current tree.
///
/// Offsets on a fragment boundary stick to the end of the preceding
/// fragment, so a caret after a highlighted word stays inside its wrapper.
pub fn restore_selection(tree: &FragmentTree, selection: Selection) -> Option<PointSelection> {
    let index = OffsetIndex::build(tree);
    let selection = selection.clamped(index.len());
    Some(PointSelection {
        anchor: index.locate_with_affinity(selection.anchor, Affinity::Before)?,
        head: index.locate_with_affinity(selection.head, Affinity::Before)?,
    })
}
