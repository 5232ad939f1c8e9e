//! Highlight snapshots: the last good result for a document, saved so a
//! reopened surface can show highlights before any network round-trip.

use lumen_core::{Span, normalize_text, text_signature};
use serde::{Deserialize, Serialize};

use crate::cache::now_millis;
use crate::error::StorageError;
use crate::retrieval::{SpanResult, SpanSource};
use crate::storage::Storage;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HighlightSnapshot {
    pub spans: Vec<Span>,
    #[serde(default)]
    pub meta: serde_json::Value,
    /// Signature of the canonical text the spans belong to.
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

impl HighlightSnapshot {
    pub fn from_result(result: &SpanResult, cache_id: Option<String>) -> Self {
        Self {
            spans: result.spans.clone(),
            meta: result.meta.clone(),
            signature: result.signature.clone(),
            cache_id,
            updated_at: now_millis(),
        }
    }

    /// Whether the snapshot still describes `text`.
    pub fn is_valid_for(&self, text: &str) -> bool {
        self.signature == text_signature(&normalize_text(text))
    }

    /// The snapshot as an `initial` result, if it still matches `text`.
    pub fn restore(&self, text: &str) -> Option<SpanResult> {
        if !self.is_valid_for(text) {
            tracing::debug!(target: "lumen::retrieval", "snapshot is stale for current text");
            return None;
        }
        Some(SpanResult {
            spans: self.spans.clone(),
            signature: self.signature.clone(),
            source: SpanSource::Initial,
            meta: self.meta.clone(),
            text: normalize_text(text),
        })
    }

    pub fn save(&self, storage: &dyn Storage) -> Result<(), StorageError> {
        storage.save(&serde_json::to_string(self)?)
    }

    /// Load a saved snapshot. Unreadable snapshots are discarded.
    pub fn load(storage: &dyn Storage) -> Result<Option<Self>, StorageError> {
        let Some(data) = storage.load()? else {
            return Ok(None);
        };
        match serde_json::from_str(&data) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                tracing::warn!(
                    target: "lumen::retrieval",
                    error = %e,
                    "discarding corrupt snapshot"
                );
                storage.clear()?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use lumen_core::Category;

    const TEXT: &str = "A lone cyclist crosses a foggy bridge at dawn";

    fn result() -> SpanResult {
        let canonical = normalize_text(TEXT);
        SpanResult {
            spans: vec![
                Span::new(25, 30, Category::Mood).with_quote("foggy"),
                Span::new(2, 14, Category::Subject).with_id("s1"),
            ],
            signature: text_signature(&canonical),
            source: SpanSource::Network,
            meta: serde_json::json!({ "model": "test" }),
            text: canonical,
        }
    }

    #[test]
    fn test_snapshot_round_trip_restores_same_spans() {
        let storage = MemoryStorage::new();
        let snapshot = HighlightSnapshot::from_result(&result(), Some("doc-1".into()));
        snapshot.save(&storage).unwrap();

        let loaded = HighlightSnapshot::load(&storage).unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        let restored = loaded.restore(TEXT).unwrap();
        assert_eq!(restored.source, SpanSource::Initial);
        assert_eq!(restored.spans, result().spans);
    }

    #[test]
    fn test_snapshot_invalid_for_other_text() {
        let snapshot = HighlightSnapshot::from_result(&result(), None);
        assert!(snapshot.is_valid_for(TEXT));
        assert!(!snapshot.is_valid_for("A lone cyclist crosses a foggy bridge at dusk"));
        assert!(snapshot.restore("something else").is_none());
    }

    #[test]
    fn test_wire_shape() {
        let mut snapshot = HighlightSnapshot::from_result(&result(), Some("doc-1".into()));
        snapshot.updated_at = 1_700_000_000_000;
        snapshot.spans.truncate(1);
        snapshot.signature = "abc".into();
        insta::assert_json_snapshot!(snapshot, @r#"
        {
          "spans": [
            {
              "start": 25,
              "end": 30,
              "category": "mood",
              "quote": "foggy"
            }
          ],
          "meta": {
            "model": "test"
          },
          "signature": "abc",
          "cacheId": "doc-1",
          "updatedAt": 1700000000000
        }
        "#);
    }

    #[test]
    fn test_corrupt_snapshot_is_discarded() {
        let storage = MemoryStorage::with_contents("[not a snapshot");
        assert_eq!(HighlightSnapshot::load(&storage).unwrap(), None);
        assert_eq!(storage.contents(), None);
    }
}
