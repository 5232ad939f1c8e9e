//! lumen-common: pieces shared by every lumen crate.
//!
//! - `error`: the umbrella [`LumenError`] diagnostic and config errors
//! - `config`: environment-variable helpers used by the `from_env` loaders
//! - `perf`: timing helpers for instrumenting hot paths
//! - `telemetry`: tracing subscriber setup (behind the `telemetry` feature)

pub mod config;
pub mod error;
pub mod perf;
#[cfg(feature = "telemetry")]
pub mod telemetry;

pub use config::{env_flag, env_opt, env_parse, env_required, env_url};
pub use error::{ConfigError, LumenError, SerDeError};

/// Crate-wide result alias.
pub type Result<T, E = LumenError> = std::result::Result<T, E>;
