//! A live, editable text surface with a highlight layer on top.

use std::ops::Range;

use lumen_common::perf::measure;

use crate::cursor::{PointSelection, Selection, capture_selection, restore_selection};
use crate::display::DisplayMap;
use crate::offset_index::{Affinity, OffsetIndex};
use crate::reconcile::{HighlightLayer, ReconcileStats};
use crate::sanitize::{Dropped, SanitizeOptions, sanitize_spans};
use crate::span::{Span, ValidatedSpan};
use crate::tree::FragmentTree;

/// Outcome of [`Surface::apply`].
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    pub accepted: usize,
    pub dropped: Vec<Dropped>,
    pub stats: ReconcileStats,
}

#[derive(Debug, Clone)]
pub struct Surface {
    tree: FragmentTree,
    layer: HighlightLayer,
    selection: Option<PointSelection>,
    pub options: SanitizeOptions,
}

impl Surface {
    pub fn new(text: &str) -> Self {
        Self::from_tree(FragmentTree::from_text(text))
    }

    /// Wrap an existing tree, e.g. one carrying foreign inline markup.
    pub fn from_tree(tree: FragmentTree) -> Self {
        Self {
            tree,
            layer: HighlightLayer::new(),
            selection: None,
            options: SanitizeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SanitizeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn tree(&self) -> &FragmentTree {
        &self.tree
    }

    pub fn layer(&self) -> &HighlightLayer {
        &self.layer
    }

    /// Current surface (display) text.
    pub fn text(&self) -> String {
        self.tree.document_text()
    }

    pub fn to_html(&self) -> String {
        self.tree.to_html()
    }

    pub fn set_selection(&mut self, selection: Selection) {
        self.selection = restore_selection(&self.tree, selection);
    }

    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Selection as global offsets.
    pub fn selection(&self) -> Option<Selection> {
        capture_selection(&self.tree, self.selection.as_ref()?)
    }

    pub fn selection_points(&self) -> Option<PointSelection> {
        self.selection
    }

    /// Insert text at a global offset. Text typed at the edge of a wrapper
    /// joins the fragment before it.
    pub fn insert_text(&mut self, offset: usize, text: &str) -> bool {
        if text.is_empty() {
            return true;
        }
        let before = self.selection();
        let index = OffsetIndex::build(&self.tree);
        let inserted = match index.locate_with_affinity(offset, Affinity::Before) {
            Some(point) => self.tree.insert_in_text(point.node, point.offset, text),
            None if offset == 0 && index.is_empty() => {
                let root = self.tree.root();
                self.tree.append_text(root, text).is_some()
            }
            None => false,
        };
        if inserted {
            let added = text.chars().count();
            let shift = |o: usize| if o >= offset { o + added } else { o };
            self.restore(before.map(|s| Selection::new(shift(s.anchor), shift(s.head))));
        }
        inserted
    }

    /// Delete a global char range. Wrappers emptied by the delete stay in
    /// place until the next reconcile.
    pub fn delete_range(&mut self, range: Range<usize>) -> bool {
        let before = self.selection();
        let index = OffsetIndex::build(&self.tree);
        let Some(segments) = index.segments(range.clone()) else {
            return false;
        };
        for seg in segments.iter().rev() {
            self.tree.delete_in_text(seg.node, seg.local.clone());
        }
        let removed = range.end - range.start;
        let shift = |o: usize| {
            if o >= range.end {
                o - removed
            } else {
                o.min(range.start)
            }
        };
        self.restore(before.map(|s| Selection::new(shift(s.anchor), shift(s.head))));
        true
    }

    /// Validate logical spans against the surface and reconcile them.
    pub fn apply(&mut self, spans: &[Span]) -> ApplyReport {
        let text = self.text();
        let map = DisplayMap::new(&text);
        let projected = map.project_all(spans.to_vec());
        let sanitized = measure("sanitize", || sanitize_spans(projected, &text, &self.options));
        let stats = self.reconcile(&text, &sanitized.spans);
        ApplyReport {
            accepted: sanitized.spans.len(),
            dropped: sanitized.dropped,
            stats,
        }
    }

    /// Reconcile spans that were already validated against this text.
    pub fn apply_validated(&mut self, spans: &[ValidatedSpan]) -> ReconcileStats {
        let text = self.text();
        self.reconcile(&text, spans)
    }

    pub fn set_highlighting(&mut self, enabled: bool) {
        let before = self.selection();
        self.layer.set_enabled(&mut self.tree, enabled);
        self.restore(before);
    }

    fn reconcile(&mut self, text: &str, spans: &[ValidatedSpan]) -> ReconcileStats {
        let before = self.selection();
        let stats = self.layer.reconcile(&mut self.tree, text, spans);
        if stats.mutated() {
            self.restore(before);
        }
        stats
    }

    fn restore(&mut self, selection: Option<Selection>) {
        self.selection = selection.and_then(|s| restore_selection(&self.tree, s));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Category;

    const TEXT: &str = "A lone cyclist crosses a foggy bridge at dawn";

    fn spans() -> Vec<Span> {
        vec![
            Span::new(2, 14, Category::Subject).with_id("subject"),
            Span::new(25, 30, Category::Mood).with_quote("foggy").with_id("mood"),
        ]
    }

    #[test]
    fn test_apply_renders_and_keeps_selection() {
        let mut surface = Surface::new(TEXT);
        surface.set_selection(Selection::new(10, 27));
        let report = surface.apply(&spans());
        assert_eq!(report.accepted, 2);
        assert!(report.dropped.is_empty());
        assert_eq!(surface.selection(), Some(Selection::new(10, 27)));
        assert_eq!(surface.text(), TEXT);
        insta::assert_snapshot!(surface.to_html(), @r#"A <span class="hl hl-subject" data-category="subject" data-span-key="subject">lone cyclist</span> crosses a <span class="hl hl-mood" data-category="mood" data-span-key="mood">foggy</span> bridge at dawn"#);
    }

    #[test]
    fn test_second_apply_is_idempotent() {
        let mut surface = Surface::new(TEXT);
        surface.apply(&spans());
        let html = surface.to_html();
        let version = surface.tree().version();
        let report = surface.apply(&spans());
        assert!(report.stats.fingerprint_hit);
        assert_eq!(surface.tree().version(), version);
        assert_eq!(surface.to_html(), html);
    }

    #[test]
    fn test_edits_keep_wrappers_until_next_apply() {
        let mut surface = Surface::new(TEXT);
        surface.apply(&spans());
        surface.set_selection(Selection::collapsed(30));

        assert!(surface.insert_text(0, "So "));
        assert_eq!(surface.selection(), Some(Selection::collapsed(33)));
        assert_eq!(surface.tree().annotations().len(), 2);

        // Spans come back shifted for the new text.
        let shifted: Vec<Span> = spans()
            .into_iter()
            .map(|mut s| {
                s.start += 3;
                s.end += 3;
                s
            })
            .collect();
        let report = surface.apply(&shifted);
        assert_eq!(report.stats.wrapped, 2);
        assert_eq!(report.stats.unwrapped, 2);
        assert_eq!(surface.selection(), Some(Selection::collapsed(33)));
        assert_eq!(surface.text(), format!("So {TEXT}"));
    }

    #[test]
    fn test_delete_across_wrapper() {
        let mut surface = Surface::new(TEXT);
        surface.apply(&spans());
        surface.set_selection(Selection::collapsed(40));
        assert!(surface.delete_range(10..27));
        assert_eq!(surface.text(), "A lone cycggy bridge at dawn");
        assert_eq!(surface.selection(), Some(Selection::collapsed(23)));
        assert!(!surface.delete_range(20..99));
    }

    #[test]
    fn test_decomposed_surface_text() {
        let text = "cafe\u{301} noir";
        let mut surface = Surface::new(text);
        let report = surface.apply(&[
            Span::new(0, 4, Category::Subject).with_quote("caf\u{e9}"),
            Span::new(5, 9, Category::Color),
        ]);
        assert_eq!(report.accepted, 2);
        let covered: Vec<String> = surface
            .tree()
            .annotations()
            .iter()
            .map(|(id, _)| surface.tree().subtree_text(*id))
            .collect();
        assert_eq!(covered, vec!["cafe\u{301}".to_string(), "noir".to_string()]);
    }

    #[test]
    fn test_disable_highlighting() {
        let mut surface = Surface::new(TEXT);
        surface.apply(&spans());
        surface.set_selection(Selection::new(3, 5));
        surface.set_highlighting(false);
        assert_eq!(surface.to_html(), TEXT);
        assert_eq!(surface.selection(), Some(Selection::new(3, 5)));
        assert_eq!(surface.apply(&spans()).stats.wrapped, 0);
    }

    #[test]
    fn test_empty_surface_accepts_typing() {
        let mut surface = Surface::new("");
        assert!(surface.insert_text(0, "fog"));
        assert_eq!(surface.text(), "fog");
        assert!(!surface.insert_text(9, "x"));
    }

    #[test]
    fn test_repeated_word_follows_the_span_after_an_edit() {
        let mut surface = Surface::new("fog fog");
        let span = [Span::new(4, 7, Category::Mood).with_id("s")];
        surface.apply(&span);

        assert!(surface.insert_text(0, "fog "));
        let report = surface.apply(&span);
        assert_eq!(report.stats.unchanged, 0);
        assert_eq!(report.stats.unwrapped, 1);
        assert_eq!(report.stats.wrapped, 1);
        insta::assert_snapshot!(surface.to_html(), @r#"fog <span class="hl hl-mood" data-category="mood" data-span-key="s">fog</span> fog"#);
    }
}
