//! The labeling boundary: text in, raw spans out.

use lumen_core::RawSpan;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::config::LabelerConfig;
use crate::error::LabelError;

/// Body of a labeling request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabelRequest {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_spans: Option<usize>,
    pub min_confidence: f32,
    /// Opaque labeling policy, forwarded as-is.
    #[serde(default)]
    pub policy: serde_json::Value,
    pub template_version: SmolStr,
}

/// Body of a labeling response. Spans are untrusted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabelResponse {
    #[serde(default)]
    pub spans: Vec<RawSpan>,
    #[serde(default)]
    pub meta: serde_json::Value,
}

/// Something that labels text with spans.
///
/// Implement [`SpanLabeler`]; the local variant exists for single-threaded
/// callers that cannot promise `Send` futures.
#[trait_variant::make(SpanLabeler: Send)]
pub trait LocalSpanLabeler {
    async fn label(&self, request: &LabelRequest) -> Result<LabelResponse, LabelError>;
}

/// Labeler backed by an HTTP JSON endpoint.
#[derive(Debug, Clone)]
pub struct HttpLabeler {
    client: reqwest::Client,
    config: LabelerConfig,
}

impl HttpLabeler {
    pub fn new(config: LabelerConfig) -> Result<Self, LabelError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("lumen/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LabelerConfig {
        &self.config
    }
}

impl SpanLabeler for HttpLabeler {
    async fn label(&self, request: &LabelRequest) -> Result<LabelResponse, LabelError> {
        let mut builder = self.client.post(self.config.endpoint.clone()).json(request);
        if let Some(token) = &self.config.token {
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(
            target: "lumen::retrieval",
            endpoint = %self.config.endpoint,
            chars = request.text.chars().count(),
            "sending labeling request"
        );

        let response = builder.send().await?.error_for_status()?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| LabelError::Decode(e.to_string()))
    }
}
