//! Per-surface span retrieval: debounce, cache, cancellation, fallback.
//!
//! Each surface owns one [`SpanRetrieval`]. At most one labeling task is
//! alive per surface; starting a new request aborts the previous one, and a
//! request whose id is no longer the latest resolves to `None` instead of
//! overwriting newer spans.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use lumen_core::{
    RawSpan, SanitizeOptions, Span, ValidatedSpan, normalize_text, sanitize, text_signature,
};
use serde::{Deserialize, Serialize};
use tokio::task::AbortHandle;

use crate::cache::{CacheKey, CacheRecord, HighlightCache, now_millis};
use crate::config::RetrievalConfig;
use crate::error::RetrievalError;
use crate::labeler::{LabelRequest, LabelResponse, SpanLabeler};
use crate::snapshot::HighlightSnapshot;

/// Where a set of spans came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpanSource {
    Network,
    Cache,
    CacheFallback,
    Initial,
}

/// Options for one request. All but `immediate` and `force_refresh` are part
/// of the cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RequestOptions {
    pub max_spans: Option<usize>,
    pub min_confidence: f32,
    pub policy: serde_json::Value,
    /// Scopes cache entries, e.g. to one document.
    pub cache_id: Option<String>,
    /// Skip the debounce.
    pub immediate: bool,
    /// Skip the cache lookup and always ask the labeler.
    pub force_refresh: bool,
}

/// Spans for a text, in logical offsets of its canonical form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanResult {
    pub spans: Vec<Span>,
    pub signature: String,
    pub source: SpanSource,
    #[serde(default)]
    pub meta: serde_json::Value,
    /// The canonical text the spans were validated against.
    pub text: String,
}

impl SpanResult {
    fn from_record(record: CacheRecord, source: SpanSource) -> Self {
        Self {
            spans: record.spans,
            signature: record.signature,
            source,
            meta: record.meta,
            text: record.text,
        }
    }
}

pub struct SpanRetrieval<L> {
    labeler: Arc<L>,
    cache: Arc<HighlightCache>,
    config: RetrievalConfig,
    sanitize: SanitizeOptions,
    latest: AtomicU64,
    inflight: Mutex<Option<AbortHandle>>,
}

impl<L> SpanRetrieval<L>
where
    L: SpanLabeler + Send + Sync + 'static,
{
    pub fn new(labeler: Arc<L>, cache: Arc<HighlightCache>, config: RetrievalConfig) -> Self {
        Self {
            labeler,
            cache,
            config,
            sanitize: SanitizeOptions::default(),
            latest: AtomicU64::new(0),
            inflight: Mutex::new(None),
        }
    }

    pub fn with_sanitize_options(mut self, options: SanitizeOptions) -> Self {
        self.sanitize = options;
        self
    }

    pub fn cache(&self) -> &Arc<HighlightCache> {
        &self.cache
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Spans for `text`.
    ///
    /// Returns `Ok(None)` when a newer request on this surface superseded
    /// this one. On labeling failure, falls back to a cached result for the
    /// same text before giving up.
    pub async fn request(
        &self,
        text: &str,
        options: RequestOptions,
    ) -> Result<Option<SpanResult>, RetrievalError> {
        let canonical = normalize_text(text);
        let signature = text_signature(&canonical);
        let key = CacheKey::new(&signature, &options, &self.config.template_version);

        let id = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.abort_inflight();

        if !options.force_refresh {
            if let Some(record) = self.cache.get(&key) {
                tracing::debug!(target: "lumen::retrieval", request = id, "cache hit");
                return Ok(Some(SpanResult::from_record(record, SpanSource::Cache)));
            }
        }

        let request = LabelRequest {
            text: canonical.clone(),
            max_spans: options.max_spans,
            min_confidence: options.min_confidence,
            policy: options.policy.clone(),
            template_version: self.config.template_version.clone(),
        };
        let labeler = Arc::clone(&self.labeler);
        let debounce = (!options.immediate).then_some(self.config.debounce);

        let task = tokio::spawn(async move {
            if let Some(delay) = debounce {
                tokio::time::sleep(delay).await;
            }
            labeler.label(&request).await
        });
        *self.inflight.lock().unwrap_or_else(PoisonError::into_inner) = Some(task.abort_handle());

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => {
                tracing::debug!(
                    target: "lumen::retrieval",
                    request = id,
                    "superseded before completion"
                );
                return Ok(None);
            }
            Err(e) => return Err(RetrievalError::Task(e.to_string())),
        };

        if self.latest.load(Ordering::SeqCst) != id {
            tracing::debug!(target: "lumen::retrieval", request = id, "dropping stale response");
            return Ok(None);
        }

        match outcome {
            Ok(response) => Ok(Some(self.accept(response, canonical, signature, key, &options))),
            Err(err) => {
                let fallback = self
                    .cache
                    .peek(&key)
                    .or_else(|| self.cache.latest_for_signature(&signature));
                match fallback {
                    Some(record) => {
                        tracing::warn!(
                            target: "lumen::retrieval",
                            error = %err,
                            "labeling failed, serving cached spans"
                        );
                        Ok(Some(SpanResult::from_record(record, SpanSource::CacheFallback)))
                    }
                    None => {
                        tracing::warn!(target: "lumen::retrieval", error = %err, "labeling failed");
                        Err(err.into())
                    }
                }
            }
        }
    }

    /// Abandon whatever this surface has in flight.
    pub fn cancel(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
        self.abort_inflight();
    }

    /// Serve a saved snapshot as the initial spans, if it matches `text`.
    pub fn restore_snapshot(&self, snapshot: &HighlightSnapshot, text: &str) -> Option<SpanResult> {
        snapshot.restore(text)
    }

    fn abort_inflight(&self) {
        if let Some(handle) = self
            .inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }

    fn accept(
        &self,
        response: LabelResponse,
        canonical: String,
        signature: String,
        key: CacheKey,
        options: &RequestOptions,
    ) -> SpanResult {
        let mut sanitize_options = self.sanitize.clone();
        if options.max_spans.is_some() {
            sanitize_options.max_spans = options.max_spans;
        }
        sanitize_options.min_confidence =
            sanitize_options.min_confidence.max(options.min_confidence);

        let logical: Vec<RawSpan> = response.spans.iter().map(logical).collect();
        let sanitized = sanitize(&logical, &canonical, &sanitize_options);
        if !sanitized.dropped.is_empty() {
            tracing::debug!(
                target: "lumen::retrieval",
                received = response.spans.len(),
                dropped = sanitized.dropped.len(),
                "sanitized labeling response"
            );
        }
        let spans: Vec<Span> = sanitized.spans.into_iter().map(settle).collect();

        self.cache.insert(
            key,
            CacheRecord {
                spans: spans.clone(),
                meta: response.meta.clone(),
                timestamp: now_millis(),
                text: canonical.clone(),
                cache_id: options.cache_id.clone(),
                signature: signature.clone(),
            },
        );

        SpanResult {
            spans,
            signature,
            source: SpanSource::Network,
            meta: response.meta,
            text: canonical,
        }
    }
}

impl<L> Drop for SpanRetrieval<L> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .inflight
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Bake the snapped range back into the span's logical offsets.
/// The labeler saw only the canonical text, so display fields are moved
/// aside and the logical quote takes precedence.
fn logical(raw: &RawSpan) -> RawSpan {
    RawSpan {
        display_start: None,
        display_end: None,
        quote: raw.quote.clone().or_else(|| raw.display_quote.clone()),
        display_quote: None,
        ..raw.clone()
    }
}

fn settle(validated: ValidatedSpan) -> Span {
    let mut span = validated.span;
    span.start = validated.highlight.start;
    span.end = validated.highlight.end;
    span.display_start = None;
    span.display_end = None;
    span
}
