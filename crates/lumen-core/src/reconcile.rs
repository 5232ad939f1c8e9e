//! Diff-based reconciliation of highlight wrappers against the live tree.
//!
//! The layer remembers which wrappers it created for which span. Each pass
//! only touches spans that were removed, changed, or lost their wrappers to
//! an edit; everything else is left exactly as it is.

use std::collections::{HashMap, HashSet};

use lumen_common::perf::TimingGuard;

use crate::fingerprint::Fingerprint;
use crate::offset_index::OffsetIndex;
use crate::span::{SpanKey, ValidatedSpan};
use crate::tree::{Annotation, FragmentTree, NodeId, NodeKind};
use crate::wrap::{unwrap_annotation, wrap_range};

/// A span currently rendered, and the wrappers that render it.
#[derive(Debug, Clone)]
pub struct TrackedSpan {
    pub span: ValidatedSpan,
    pub wrappers: Vec<NodeId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Idle,
    Rendered(usize),
}

/// What a reconcile pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    /// The input matched the previous pass; nothing was examined.
    pub fingerprint_hit: bool,
    pub wrapped: usize,
    pub unwrapped: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub index_builds: usize,
}

impl ReconcileStats {
    /// Whether the pass mutated the tree.
    pub fn mutated(&self) -> bool {
        self.wrapped > 0 || self.unwrapped > 0
    }
}

/// Render state for one surface.
#[derive(Debug, Clone)]
pub struct HighlightLayer {
    tracked: HashMap<SpanKey, TrackedSpan>,
    last_fingerprint: Option<Fingerprint>,
    enabled: bool,
}

impl Default for HighlightLayer {
    fn default() -> Self {
        Self::new()
    }
}

impl HighlightLayer {
    pub fn new() -> Self {
        Self {
            tracked: HashMap::new(),
            last_fingerprint: None,
            enabled: true,
        }
    }

    pub fn state(&self) -> LayerState {
        match self.tracked.len() {
            0 => LayerState::Idle,
            n => LayerState::Rendered(n),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn tracked(&self, key: &SpanKey) -> Option<&TrackedSpan> {
        self.tracked.get(key)
    }

    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Bring the tree's wrappers in line with `spans`.
    ///
    /// `text` is the surface text the spans were validated against. Spans
    /// must be pairwise disjoint, as the sanitizer guarantees.
    pub fn reconcile(
        &mut self,
        tree: &mut FragmentTree,
        text: &str,
        spans: &[ValidatedSpan],
    ) -> ReconcileStats {
        let mut stats = ReconcileStats::default();
        if !self.enabled {
            return stats;
        }

        let fingerprint = Fingerprint::compute(text, spans);
        if self.last_fingerprint == Some(fingerprint) {
            stats.fingerprint_hit = true;
            return stats;
        }

        let _timer = TimingGuard::new("reconcile");

        let mut incoming: HashMap<&SpanKey, &ValidatedSpan> = HashMap::with_capacity(spans.len());
        for span in spans {
            if incoming.insert(&span.key, span).is_some() {
                tracing::debug!(
                    target: "lumen::reconcile",
                    key = %span.key,
                    "duplicate span key, keeping the last"
                );
            }
        }

        // Tracked wrappers are checked against an index of the tree as it
        // stands, before anything is unwrapped.
        let mut index = None;
        if !self.tracked.is_empty() {
            index = Some(OffsetIndex::build_checked(tree, text));
            stats.index_builds += 1;
        }

        let mut stale: Vec<SpanKey> = self
            .tracked
            .keys()
            .filter(|k| !incoming.contains_key(k))
            .cloned()
            .collect();

        let mut pending: Vec<&ValidatedSpan> = Vec::new();
        for (&key, &span) in &incoming {
            let same = match (self.tracked.get(key), &index) {
                (Some(old), Some(index)) => {
                    Some(old.span.renders_same(span) && is_intact(tree, old, index))
                }
                _ => None,
            };
            match same {
                Some(true) => stats.unchanged += 1,
                Some(false) => {
                    stale.push(key.clone());
                    pending.push(span);
                }
                None => pending.push(span),
            }
        }

        for key in &stale {
            if let Some(old) = self.tracked.remove(key) {
                unwrap_all(tree, &old.wrappers);
                stats.unwrapped += 1;
            }
        }

        // Back to front: wrapping a later span only splits fragments after
        // every earlier one, so the index stays valid for the rest.
        pending.sort_by(|a, b| b.highlight.start.cmp(&a.highlight.start));
        if pending.is_empty() {
            return self.finish(fingerprint, stats);
        }

        let mut index = match index {
            Some(index) if !index.is_stale(tree) => index,
            _ => {
                stats.index_builds += 1;
                OffsetIndex::build_checked(tree, text)
            }
        };

        for span in pending {
            let mut wrappers = wrap_span(tree, span, &index);
            if wrappers.is_empty() && index.is_stale(tree) {
                index = OffsetIndex::build_checked(tree, text);
                stats.index_builds += 1;
                wrappers = wrap_span(tree, span, &index);
            }
            if wrappers.is_empty() {
                tracing::debug!(
                    target: "lumen::reconcile",
                    key = %span.key,
                    start = span.highlight.start,
                    end = span.highlight.end,
                    "could not wrap span, skipping"
                );
                stats.failed += 1;
                continue;
            }
            stats.wrapped += 1;
            self.tracked.insert(
                span.key.clone(),
                TrackedSpan {
                    span: span.clone(),
                    wrappers,
                },
            );
        }

        self.finish(fingerprint, stats)
    }

    fn finish(&mut self, fingerprint: Fingerprint, stats: ReconcileStats) -> ReconcileStats {
        // Leave the gate open when something failed so the next pass retries.
        self.last_fingerprint = (stats.failed == 0).then_some(fingerprint);

        tracing::debug!(
            target: "lumen::reconcile",
            wrapped = stats.wrapped,
            unwrapped = stats.unwrapped,
            unchanged = stats.unchanged,
            failed = stats.failed,
            "reconciled"
        );
        stats
    }

    /// Remove every wrapper this layer created, last span first.
    pub fn teardown(&mut self, tree: &mut FragmentTree) -> usize {
        let mut all: Vec<TrackedSpan> = self.tracked.drain().map(|(_, t)| t).collect();
        all.sort_by(|a, b| b.span.highlight.start.cmp(&a.span.highlight.start));
        for tracked in &all {
            unwrap_all(tree, &tracked.wrappers);
        }
        self.last_fingerprint = None;
        if !all.is_empty() {
            tracing::debug!(target: "lumen::reconcile", count = all.len(), "tore down highlights");
        }
        all.len()
    }

    /// Turning highlighting off tears the layer down; while off, reconcile
    /// calls are ignored.
    pub fn set_enabled(&mut self, tree: &mut FragmentTree, enabled: bool) {
        if self.enabled && !enabled {
            self.teardown(tree);
        }
        self.enabled = enabled;
    }
}

fn wrap_span(tree: &mut FragmentTree, span: &ValidatedSpan, index: &OffsetIndex) -> Vec<NodeId> {
    wrap_range(tree, span.highlight.clone(), index, |seg| Annotation {
        key: span.key.clone(),
        category: span.category(),
        part: seg.part,
    })
}

fn unwrap_all(tree: &mut FragmentTree, wrappers: &[NodeId]) {
    for wrapper in wrappers.iter().rev() {
        unwrap_annotation(tree, *wrapper);
    }
}

/// Whether the wrappers of `tracked` still exist and cover exactly its
/// highlight range, at that position, in text that agrees with the surface.
fn is_intact(tree: &FragmentTree, tracked: &TrackedSpan, index: &OffsetIndex) -> bool {
    let range = &tracked.span.highlight;
    if range.end > index.valid_len() {
        return false;
    }
    let mut seen = HashSet::new();
    let mut cursor = range.start;
    for wrapper in &tracked.wrappers {
        match tree.kind(*wrapper) {
            Some(NodeKind::Annotation(a)) if a.key == tracked.span.key => {}
            _ => return false,
        }
        if !seen.insert(*wrapper) {
            return false;
        }
        for node in tree.text_nodes_under(*wrapper) {
            if index.position_of(node, 0) != Some(cursor) {
                return false;
            }
            cursor += tree.text_len(node).unwrap_or(0);
        }
    }
    cursor == range.end
}
