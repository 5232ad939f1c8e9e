//! Translation between logical (canonical) and display (surface) offsets.
//!
//! The labeling service sees canonical text; the surface shows whatever the
//! user typed. The two differ only inside grapheme clusters that change under
//! normalization, so the map stores one checkpoint per cluster.

use unicode_segmentation::UnicodeSegmentation;

use crate::span::Span;
use crate::text::push_canonical_cluster;

/// Which way to round an offset that lands inside a cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bias {
    /// Round toward the cluster start (use for range starts).
    Start,
    /// Round toward the cluster end (use for range ends).
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Checkpoint {
    display: usize,
    canonical: usize,
}

/// Offset map between a surface text and its canonical form.
#[derive(Debug, Clone)]
pub struct DisplayMap {
    canonical: String,
    checkpoints: Vec<Checkpoint>,
    display_len: usize,
    canonical_len: usize,
    identity: bool,
}

impl DisplayMap {
    /// Build the map for `display_text`.
    pub fn new(display_text: &str) -> Self {
        let mut canonical = String::with_capacity(display_text.len());
        let mut checkpoints = Vec::new();
        let mut display = 0usize;
        let mut canon = 0usize;
        let mut identity = true;

        for cluster in display_text.graphemes(true) {
            checkpoints.push(Checkpoint {
                display,
                canonical: canon,
            });
            let before = canonical.len();
            push_canonical_cluster(&mut canonical, cluster);
            let produced = &canonical[before..];
            if produced != cluster {
                identity = false;
            }
            display += cluster.chars().count();
            canon += produced.chars().count();
        }

        Self {
            canonical,
            checkpoints,
            display_len: display,
            canonical_len: canon,
            identity,
        }
    }

    /// The canonical form of the surface text.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// Whether canonical and display offsets coincide everywhere.
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn display_len(&self) -> usize {
        self.display_len
    }

    pub fn canonical_len(&self) -> usize {
        self.canonical_len
    }

    /// Map a canonical offset to a display offset.
    pub fn to_display(&self, canonical: usize, bias: Bias) -> usize {
        if self.identity {
            return canonical.min(self.display_len);
        }
        self.translate(
            canonical,
            bias,
            |c| c.canonical,
            |c| c.display,
            (self.canonical_len, self.display_len),
        )
    }

    /// Map a display offset to a canonical offset.
    pub fn to_canonical(&self, display: usize, bias: Bias) -> usize {
        if self.identity {
            return display.min(self.canonical_len);
        }
        self.translate(
            display,
            bias,
            |c| c.display,
            |c| c.canonical,
            (self.display_len, self.canonical_len),
        )
    }

    fn translate(
        &self,
        offset: usize,
        bias: Bias,
        from: impl Fn(&Checkpoint) -> usize,
        to: impl Fn(&Checkpoint) -> usize,
        (from_len, to_len): (usize, usize),
    ) -> usize {
        if offset >= from_len {
            return to_len;
        }
        // Index of the first checkpoint strictly past `offset`.
        let next = self.checkpoints.partition_point(|c| from(c) <= offset);
        if next == 0 {
            return 0;
        }
        let cluster = &self.checkpoints[next - 1];
        if from(cluster) == offset {
            return to(cluster);
        }
        match bias {
            Bias::Start => to(cluster),
            Bias::End => self.checkpoints.get(next).map(&to).unwrap_or(to_len),
        }
    }

    /// Fill `display_start`/`display_end` on a span carrying logical offsets.
    ///
    /// Spans that already carry display offsets are left alone.
    pub fn project(&self, mut span: Span) -> Span {
        if span.display_start.is_none() || span.display_end.is_none() {
            span.display_start = Some(self.to_display(span.start, Bias::Start));
            span.display_end = Some(self.to_display(span.end, Bias::End));
        }
        span
    }

    /// Project every span in place.
    pub fn project_all(&self, spans: Vec<Span>) -> Vec<Span> {
        spans.into_iter().map(|s| self.project(s)).collect()
    }
}
