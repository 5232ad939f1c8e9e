//! lumen-core: the synchronous half of the span highlighting engine.
//!
//! Given text and a set of labeled spans, this crate validates the spans,
//! snaps them to word boundaries, and overlays them as annotation fragments
//! on a [`FragmentTree`] while touching only the spans that changed.
//!
//! - `text`, `display`: normalization, signatures and offset translation
//! - `span`, `snap`, `sanitize`, `process`: the span model and validation
//! - `tree`, `offset_index`, `wrap`: the fragment tree and range operations
//! - `fingerprint`, `reconcile`, `cursor`, `surface`: the render layer

pub mod cursor;
pub mod display;
pub mod fingerprint;
pub mod offset_index;
pub mod process;
pub mod reconcile;
pub mod sanitize;
pub mod snap;
pub mod span;
pub mod surface;
pub mod text;
pub mod tree;
pub mod wrap;

pub use cursor::{PointSelection, Selection, capture_selection, restore_selection};
pub use display::{Bias, DisplayMap};
pub use fingerprint::Fingerprint;
pub use offset_index::{Affinity, OffsetIndex, Segment, TextPoint};
pub use process::{ProcessMeta, ProcessOutput, process_spans};
pub use reconcile::{HighlightLayer, LayerState, ReconcileStats, TrackedSpan};
pub use sanitize::{
    DropReason, Dropped, OverlapPolicy, SanitizeOptions, Sanitized, quote_matches, sanitize,
    sanitize_spans,
};
pub use smol_str::SmolStr;
pub use snap::{is_token_boundary, is_word_char, snap_to_word_boundaries};
pub use span::{Category, RawSpan, Span, SpanKey, ValidatedSpan};
pub use surface::{ApplyReport, Surface};
pub use text::{hash_source, normalize_text, text_signature};
pub use tree::{Annotation, FragmentTree, Node, NodeId, NodeKind};
pub use wrap::{WrapSegment, unwrap_annotation, wrap_range};
