//! Error types shared across lumen crates.
//!
//! Library crates keep their own narrow `thiserror` enums and convert into
//! [`LumenError`] at the application boundary, where `miette` renders them.

use miette::Diagnostic;

/// Top-level error for lumen operations.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum LumenError {
    /// Invalid or missing configuration
    #[error(transparent)]
    #[diagnostic_source]
    Config(#[from] ConfigError),

    /// The span-labeling boundary failed and no cached result could stand in
    #[error("labeling failed: {0}")]
    #[diagnostic(
        code(lumen::labeling),
        help("check that the labeling endpoint is reachable and LUMEN_LABELER_URL is correct")
    )]
    Labeling(String),

    /// Durable cache storage could not be read or written
    #[error("storage error: {0}")]
    #[diagnostic(code(lumen::storage))]
    Storage(String),

    /// Background offload failed
    #[error("offload error: {0}")]
    #[diagnostic(code(lumen::offload))]
    Offload(String),

    /// IO error
    #[error(transparent)]
    #[diagnostic(code(lumen::io))]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error(transparent)]
    #[diagnostic_source]
    Serde(#[from] SerDeError),
}

/// Serialization/deserialization errors
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum SerDeError {
    #[error(transparent)]
    #[diagnostic(code(lumen::serde::json))]
    Json(#[from] serde_json::Error),
}

impl From<serde_json::Error> for LumenError {
    fn from(err: serde_json::Error) -> Self {
        LumenError::Serde(SerDeError::Json(err))
    }
}

/// Configuration loading errors.
#[derive(thiserror::Error, Debug, Diagnostic)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("missing environment variable {var}")]
    #[diagnostic(code(lumen::config::missing_env))]
    MissingEnv { var: &'static str },

    #[error("invalid value {value:?} for {var}: {message}")]
    #[diagnostic(code(lumen::config::invalid_env))]
    InvalidEnv {
        var: &'static str,
        value: String,
        message: String,
    },

    #[error("invalid URL {url:?}: {message}")]
    #[diagnostic(code(lumen::config::url))]
    UrlParse { url: String, message: String },
}
