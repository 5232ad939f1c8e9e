use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use lumen_common::telemetry::{self, TelemetryConfig};
use lumen_core::{DisplayMap, SanitizeOptions, Surface};
use lumen_spans::{
    FileStorage, HighlightCache, HighlightSnapshot, HttpLabeler, LabelError, LabelRequest,
    LabelResponse, LabelerConfig, OffloadConfig, Offloader, RequestOptions, RetrievalConfig,
    SpanLabeler, SpanResult, SpanRetrieval,
};
use miette::{IntoDiagnostic, Result, WrapErr};
use serde::Serialize;
use url::Url;

#[derive(Parser)]
#[command(version, about = "Lumen - highlight labeled spans in prompt text", long_about = None)]
struct Cli {
    /// Text file to highlight
    input: PathBuf,

    /// Labeling endpoint
    #[arg(long, env = "LUMEN_LABELER_URL")]
    labeler_url: Option<Url>,

    /// Bearer token for the labeling endpoint
    #[arg(long, env = "LUMEN_LABELER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Read spans from a JSON labeling response instead of calling the service
    #[arg(long, conflicts_with = "labeler_url")]
    spans: Option<PathBuf>,

    /// Cache file
    #[arg(long, env = "LUMEN_CACHE_PATH")]
    cache: Option<PathBuf>,

    /// Snapshot file; restored when it matches the input, saved afterwards
    #[arg(long)]
    snapshot: Option<PathBuf>,

    #[arg(long)]
    max_spans: Option<usize>,

    #[arg(long, default_value_t = 0.0)]
    min_confidence: f32,

    /// Ignore the cache and snapshot and label again
    #[arg(long)]
    refresh: bool,

    #[arg(long, value_enum, default_value_t = Format::Html)]
    format: Format,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Html,
    Json,
}

/// Serves a fixed labeling response from disk.
struct FileLabeler {
    response: LabelResponse,
}

impl SpanLabeler for FileLabeler {
    async fn label(&self, _request: &LabelRequest) -> Result<LabelResponse, LabelError> {
        Ok(self.response.clone())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonReport<'a> {
    source: lumen_spans::SpanSource,
    signature: &'a str,
    spans: &'a [lumen_core::ValidatedSpan],
    dropped: usize,
    offloaded: bool,
    html: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_miette();
    telemetry::init(TelemetryConfig::from_env("lumen"));

    let cli = Cli::parse();

    let mut config = RetrievalConfig::from_env()?;
    if let Some(path) = &cli.cache {
        config.cache_path = Some(path.clone());
    }

    match &cli.spans {
        Some(path) => {
            let data = std::fs::read_to_string(path)
                .into_diagnostic()
                .wrap_err_with(|| format!("reading spans from {}", path.display()))?;
            let response: LabelResponse = serde_json::from_str(&data).into_diagnostic()?;
            run(FileLabeler { response }, config, &cli).await
        }
        None => {
            let labeler_config = match &cli.labeler_url {
                Some(url) => LabelerConfig {
                    token: cli.token.clone(),
                    ..LabelerConfig::from_lookup(|var| match var {
                        "LUMEN_LABELER_URL" => Some(url.to_string()),
                        _ => std::env::var(var).ok(),
                    })?
                },
                None => LabelerConfig::from_env()?,
            };
            let labeler = HttpLabeler::new(labeler_config).map_err(lumen_common::LumenError::from)?;
            run(labeler, config, &cli).await
        }
    }
}

async fn run<L>(labeler: L, config: RetrievalConfig, cli: &Cli) -> Result<()>
where
    L: SpanLabeler + Send + Sync + 'static,
{
    let text = std::fs::read_to_string(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("reading {}", cli.input.display()))?;

    let cache = Arc::new(HighlightCache::for_config(&config));
    let retrieval = SpanRetrieval::new(Arc::new(labeler), cache, config);

    let restored = match (&cli.snapshot, cli.refresh) {
        (Some(path), false) => {
            load_snapshot(path)?.and_then(|s| retrieval.restore_snapshot(&s, &text))
        }
        _ => None,
    };

    let result = match restored {
        Some(result) => result,
        None => {
            let options = RequestOptions {
                max_spans: cli.max_spans,
                min_confidence: cli.min_confidence,
                immediate: true,
                force_refresh: cli.refresh,
                ..RequestOptions::default()
            };
            retrieval
                .request(&text, options)
                .await
                .map_err(lumen_common::LumenError::from)?
                .ok_or_else(|| miette::miette!("request was superseded"))?
        }
    };
    tracing::info!(source = ?result.source, spans = result.spans.len(), "labeled input");

    if let Some(path) = &cli.snapshot {
        save_snapshot(path, &result)?;
    }

    // Validate against the surface text as displayed, off-thread when large.
    let options = SanitizeOptions {
        max_spans: cli.max_spans,
        min_confidence: cli.min_confidence,
        ..SanitizeOptions::default()
    };
    let map = DisplayMap::new(&text);
    let offloader = Offloader::new(OffloadConfig::from_env()?).await;
    let output = offloader
        .process(map.project_all(result.spans.clone()), &text, &options)
        .await;

    let mut surface = Surface::new(&text).with_options(options);
    surface.apply_validated(&output.processed_spans);

    match cli.format {
        Format::Html => println!("{}", surface.to_html()),
        Format::Json => {
            let report = JsonReport {
                source: result.source,
                signature: &result.signature,
                spans: &output.processed_spans,
                dropped: output.meta.dropped_count,
                offloaded: output.meta.offloaded,
                html: surface.to_html(),
            };
            println!("{}", serde_json::to_string_pretty(&report).into_diagnostic()?);
        }
    }
    Ok(())
}

fn load_snapshot(path: &Path) -> Result<Option<HighlightSnapshot>> {
    HighlightSnapshot::load(&FileStorage::new(path))
        .map_err(lumen_common::LumenError::from)
        .wrap_err("loading snapshot")
}

fn save_snapshot(path: &Path, result: &SpanResult) -> Result<()> {
    HighlightSnapshot::from_result(result, None)
        .save(&FileStorage::new(path))
        .map_err(lumen_common::LumenError::from)
        .wrap_err("saving snapshot")
}

fn init_miette() {
    let _ = miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }));
    miette::set_panic_hook();
}
