//! Environment-driven configuration for the labeler and retrieval service.

use std::path::PathBuf;
use std::time::Duration;

use lumen_common::{ConfigError, env_flag, env_opt, env_parse, env_url};
use smol_str::SmolStr;
use url::Url;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_CACHE_CAPACITY: usize = 20;
pub const DEFAULT_LABELER_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_OFFLOAD_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_OFFLOAD_THRESHOLD: usize = 64;
pub const DEFAULT_TEMPLATE_VERSION: &str = "v1";

/// Where and how to reach the labeling service.
#[derive(Debug, Clone)]
pub struct LabelerConfig {
    pub endpoint: Url,
    pub token: Option<String>,
    pub timeout: Duration,
}

impl LabelerConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            token: None,
            timeout: DEFAULT_LABELER_TIMEOUT,
        }
    }

    /// Load from environment variables.
    ///
    /// Required: `LUMEN_LABELER_URL`. Optional: `LUMEN_LABELER_TOKEN`,
    /// `LUMEN_LABELER_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let endpoint = env_url(&lookup, "LUMEN_LABELER_URL")?;
        let timeout = env_parse::<_, u64>(&lookup, "LUMEN_LABELER_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_LABELER_TIMEOUT);
        Ok(Self {
            endpoint,
            token: env_opt(&lookup, "LUMEN_LABELER_TOKEN"),
            timeout,
        })
    }
}

/// Per-surface retrieval behaviour and the shared cache's shape.
#[derive(Debug, Clone)]
pub struct RetrievalConfig {
    pub debounce: Duration,
    pub cache_capacity: usize,
    /// File backing the cache; in-memory only when unset.
    pub cache_path: Option<PathBuf>,
    /// Prompt template version, part of every cache key.
    pub template_version: SmolStr,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            cache_path: None,
            template_version: SmolStr::new_static(DEFAULT_TEMPLATE_VERSION),
        }
    }
}

impl RetrievalConfig {
    /// Load from environment variables, all optional:
    /// `LUMEN_DEBOUNCE_MS`, `LUMEN_CACHE_CAPACITY`, `LUMEN_CACHE_PATH`,
    /// `LUMEN_TEMPLATE_VERSION`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let cache_capacity = match env_parse::<_, usize>(&lookup, "LUMEN_CACHE_CAPACITY")? {
            Some(0) => {
                return Err(ConfigError::InvalidEnv {
                    var: "LUMEN_CACHE_CAPACITY",
                    value: "0".into(),
                    message: "capacity must be at least 1".into(),
                });
            }
            Some(n) => n,
            None => defaults.cache_capacity,
        };
        Ok(Self {
            debounce: env_parse::<_, u64>(&lookup, "LUMEN_DEBOUNCE_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
            cache_capacity,
            cache_path: env_opt(&lookup, "LUMEN_CACHE_PATH").map(PathBuf::from),
            template_version: env_opt(&lookup, "LUMEN_TEMPLATE_VERSION")
                .map(SmolStr::from)
                .unwrap_or(defaults.template_version),
        })
    }
}

/// When and how long to use the background worker.
#[derive(Debug, Clone, Copy)]
pub struct OffloadConfig {
    /// Whether to start a worker at all.
    pub enabled: bool,
    pub timeout: Duration,
    /// Batches smaller than this are processed inline.
    pub threshold: usize,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: DEFAULT_OFFLOAD_TIMEOUT,
            threshold: DEFAULT_OFFLOAD_THRESHOLD,
        }
    }
}

impl OffloadConfig {
    /// Load from environment variables, all optional:
    /// `LUMEN_OFFLOAD`, `LUMEN_OFFLOAD_TIMEOUT_MS`, `LUMEN_OFFLOAD_THRESHOLD`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        Ok(Self {
            enabled: env_flag(&lookup, "LUMEN_OFFLOAD")?.unwrap_or(defaults.enabled),
            timeout: env_parse::<_, u64>(&lookup, "LUMEN_OFFLOAD_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
            threshold: env_parse::<_, usize>(&lookup, "LUMEN_OFFLOAD_THRESHOLD")?
                .unwrap_or(defaults.threshold),
        })
    }
}
