//! Background span processing on a dedicated worker thread.
//!
//! The worker is an accelerator only: every path that cannot reach it, or
//! that hears nothing back in time, runs [`process_spans`] inline instead.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use lumen_core::{ProcessMeta, ProcessOutput, SanitizeOptions, Span, ValidatedSpan, process_spans};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::config::OffloadConfig;
use crate::error::OffloadError;

/// Messages to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerInput {
    Process {
        spans: Vec<Span>,
        text: String,
        options: SanitizeOptions,
    },
}

/// Messages from the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerOutput {
    Ready,
    #[serde(rename_all = "camelCase")]
    Result {
        processed_spans: Vec<ValidatedSpan>,
        meta: ProcessMeta,
    },
    Error {
        error: String,
    },
}

type Handler = Box<dyn Fn(WorkerInput) -> WorkerOutput + Send>;

struct Job {
    input: WorkerInput,
    reply: oneshot::Sender<WorkerOutput>,
}

/// Handle to the worker thread. Dropping it stops the thread once its
/// current job is done.
#[derive(Debug)]
pub struct OffloadWorker {
    jobs: mpsc::UnboundedSender<Job>,
}

fn handle(input: WorkerInput) -> WorkerOutput {
    match input {
        WorkerInput::Process {
            spans,
            text,
            options,
        } => {
            let output = process_spans(spans, &text, &options);
            WorkerOutput::Result {
                processed_spans: output.processed_spans,
                meta: output.meta,
            }
        }
    }
}

impl OffloadWorker {
    /// Start the worker and wait for it to report ready.
    pub async fn spawn(ready_timeout: Duration) -> Result<Self, OffloadError> {
        Self::spawn_with(Box::new(handle), ready_timeout).await
    }

    async fn spawn_with(handler: Handler, ready_timeout: Duration) -> Result<Self, OffloadError> {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = oneshot::channel();

        std::thread::Builder::new()
            .name("lumen-offload".into())
            .spawn(move || {
                let _ = ready_tx.send(WorkerOutput::Ready);
                while let Some(job) = rx.blocking_recv() {
                    let output = catch_unwind(AssertUnwindSafe(|| handler(job.input)))
                        .unwrap_or_else(|_| WorkerOutput::Error {
                            error: "span processing panicked".into(),
                        });
                    let _ = job.reply.send(output);
                }
                tracing::debug!(target: "lumen::offload", "offload worker stopped");
            })
            .map_err(|e| OffloadError::Unavailable(e.to_string()))?;

        match tokio::time::timeout(ready_timeout, ready_rx).await {
            Ok(Ok(WorkerOutput::Ready)) => Ok(Self { jobs }),
            Ok(Ok(other)) => Err(OffloadError::Unavailable(format!(
                "unexpected startup message {other:?}"
            ))),
            Ok(Err(_)) => Err(OffloadError::Closed),
            Err(_) => Err(OffloadError::Timeout(ready_timeout)),
        }
    }

    /// Send one job and wait at most `timeout` for its answer.
    pub async fn submit(
        &self,
        input: WorkerInput,
        timeout: Duration,
    ) -> Result<ProcessOutput, OffloadError> {
        let (reply, answer) = oneshot::channel();
        self.jobs
            .send(Job { input, reply })
            .map_err(|_| OffloadError::Closed)?;

        match tokio::time::timeout(timeout, answer).await {
            Err(_) => Err(OffloadError::Timeout(timeout)),
            Ok(Err(_)) => Err(OffloadError::Closed),
            Ok(Ok(WorkerOutput::Result {
                processed_spans,
                meta,
            })) => Ok(ProcessOutput {
                processed_spans,
                meta,
            }),
            Ok(Ok(WorkerOutput::Error { error })) => Err(OffloadError::Worker(error)),
            Ok(Ok(WorkerOutput::Ready)) => {
                Err(OffloadError::Worker("worker answered a job with ready".into()))
            }
        }
    }
}

/// Routes span batches to the worker when it is worth it.
#[derive(Debug)]
pub struct Offloader {
    worker: Option<OffloadWorker>,
    config: OffloadConfig,
}

impl Offloader {
    /// Start a worker. If it cannot start, the offloader still works and
    /// processes everything inline.
    pub async fn new(config: OffloadConfig) -> Self {
        if !config.enabled {
            return Self::inline(config);
        }
        let worker = match OffloadWorker::spawn(config.timeout).await {
            Ok(worker) => Some(worker),
            Err(e) => {
                tracing::warn!(
                    target: "lumen::offload",
                    error = %e,
                    "offload worker unavailable, processing inline"
                );
                None
            }
        };
        Self { worker, config }
    }

    /// An offloader that never uses a worker.
    pub fn inline(config: OffloadConfig) -> Self {
        Self {
            worker: None,
            config,
        }
    }

    pub fn with_worker(worker: OffloadWorker, config: OffloadConfig) -> Self {
        Self {
            worker: Some(worker),
            config,
        }
    }

    pub fn is_available(&self) -> bool {
        self.worker.is_some()
    }

    /// Process `spans` against `text`, on the worker when the batch is large
    /// enough and the worker answers in time.
    pub async fn process(
        &self,
        spans: Vec<Span>,
        text: &str,
        options: &SanitizeOptions,
    ) -> ProcessOutput {
        let worker = match &self.worker {
            Some(worker) if spans.len() >= self.config.threshold => worker,
            _ => return process_spans(spans, text, options),
        };

        let input = WorkerInput::Process {
            spans: spans.clone(),
            text: text.to_owned(),
            options: options.clone(),
        };
        match worker.submit(input, self.config.timeout).await {
            Ok(mut output) => {
                output.meta.offloaded = true;
                output
            }
            Err(e) => {
                tracing::warn!(
                    target: "lumen::offload",
                    error = %e,
                    spans = spans.len(),
                    "offload failed, processing inline"
                );
                process_spans(spans, text, options)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::Category;

    const TEXT: &str = "A lone cyclist crosses a foggy bridge at dawn";

    fn spans() -> Vec<Span> {
        vec![
            Span::new(2, 14, Category::Subject),
            Span::new(7, 22, Category::Action),
            Span::new(25, 30, Category::Mood),
        ]
    }

    fn eager() -> OffloadConfig {
        OffloadConfig {
            threshold: 0,
            ..OffloadConfig::default()
        }
    }

    #[test]
    fn test_protocol_wire_shape() {
        let input = WorkerInput::Process {
            spans: vec![Span::new(0, 1, Category::Style)],
            text: "x".into(),
            options: SanitizeOptions::default(),
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["type"], "process");
        assert_eq!(json["spans"][0]["category"], "style");

        let ready = serde_json::to_value(WorkerOutput::Ready).unwrap();
        assert_eq!(ready, serde_json::json!({ "type": "ready" }));

        let error = serde_json::to_value(WorkerOutput::Error {
            error: "boom".into(),
        })
        .unwrap();
        assert_eq!(error, serde_json::json!({ "type": "error", "error": "boom" }));

        let result = serde_json::to_value(WorkerOutput::Result {
            processed_spans: vec![],
            meta: process_spans(vec![], "", &SanitizeOptions::default()).meta,
        })
        .unwrap();
        assert_eq!(result["type"], "result");
        assert!(result["processedSpans"].is_array());
    }

    #[tokio::test]
    async fn test_worker_matches_inline() {
        let offloader = Offloader::new(eager()).await;
        assert!(offloader.is_available());
        let options = SanitizeOptions::default();
        let offloaded = offloader.process(spans(), TEXT, &options).await;
        let inline = process_spans(spans(), TEXT, &options);
        assert!(offloaded.meta.offloaded);
        assert_eq!(offloaded.processed_spans, inline.processed_spans);
    }

    #[tokio::test]
    async fn test_small_batches_stay_inline() {
        let offloader = Offloader::new(OffloadConfig::default()).await;
        let out = offloader
            .process(spans(), TEXT, &SanitizeOptions::default())
            .await;
        assert!(!out.meta.offloaded);
        assert_eq!(out.processed_spans.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_inline() {
        let slow: Handler = Box::new(|input| {
            std::thread::sleep(Duration::from_millis(300));
            handle(input)
        });
        let worker = OffloadWorker::spawn_with(slow, Duration::from_secs(1))
            .await
            .unwrap();
        let offloader = Offloader::with_worker(
            worker,
            OffloadConfig {
                timeout: Duration::from_millis(20),
                threshold: 0,
                ..OffloadConfig::default()
            },
        );
        let out = offloader
            .process(spans(), TEXT, &SanitizeOptions::default())
            .await;
        assert!(!out.meta.offloaded);
        assert_eq!(out.processed_spans.len(), 2);
    }

    #[tokio::test]
    async fn test_worker_error_falls_back_inline() {
        let failing: Handler = Box::new(|_| WorkerOutput::Error {
            error: "no".into(),
        });
        let worker = OffloadWorker::spawn_with(failing, Duration::from_secs(1))
            .await
            .unwrap();
        let err = worker
            .submit(
                WorkerInput::Process {
                    spans: spans(),
                    text: TEXT.into(),
                    options: SanitizeOptions::default(),
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, OffloadError::Worker(_)));

        let offloader = Offloader::with_worker(worker, eager());
        let out = offloader
            .process(spans(), TEXT, &SanitizeOptions::default())
            .await;
        assert!(!out.meta.offloaded);
        assert_eq!(out.processed_spans.len(), 2);
    }

    #[tokio::test]
    async fn test_inline_offloader() {
        let offloader = Offloader::inline(eager());
        assert!(!offloader.is_available());
        let out = offloader
            .process(spans(), TEXT, &SanitizeOptions::default())
            .await;
        assert_eq!(out.meta.input_count, 3);
    }

    #[tokio::test]
    async fn test_disabled_never_starts_a_worker() {
        let config = OffloadConfig {
            enabled: false,
            ..eager()
        };
        let offloader = Offloader::new(config).await;
        assert!(!offloader.is_available());
        let out = offloader
            .process(spans(), TEXT, &SanitizeOptions::default())
            .await;
        assert!(!out.meta.offloaded);
    }
}
