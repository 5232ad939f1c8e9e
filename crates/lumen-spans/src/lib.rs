//! lumen-spans: the asynchronous half of the span highlighting engine.
//!
//! Fetches spans for text from a labeling service, caches results across
//! surfaces, and offloads heavy span processing to a worker thread.

pub mod cache;
pub mod config;
pub mod error;
pub mod labeler;
pub mod offload;
pub mod retrieval;
pub mod snapshot;
pub mod storage;

pub use cache::{CacheKey, CacheRecord, HighlightCache};
pub use config::{LabelerConfig, OffloadConfig, RetrievalConfig};
pub use error::{LabelError, OffloadError, RetrievalError, StorageError};
pub use labeler::{HttpLabeler, LabelRequest, LabelResponse, LocalSpanLabeler, SpanLabeler};
pub use offload::{OffloadWorker, Offloader, WorkerInput, WorkerOutput};
pub use retrieval::{RequestOptions, SpanResult, SpanRetrieval, SpanSource};
pub use snapshot::HighlightSnapshot;
pub use storage::{FileStorage, MemoryStorage, Storage};
