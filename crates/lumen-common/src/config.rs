//! Environment-variable helpers for configuration loaders.
//!
//! Loaders take a lookup function rather than reading `std::env` directly, so
//! `from_env()` is a thin wrapper over a testable `from_lookup()`.

use std::str::FromStr;

use url::Url;

use crate::error::ConfigError;

/// Read a required variable.
pub fn env_required<F>(lookup: &F, var: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::MissingEnv { var })
}

/// Read an optional variable, treating blank values as unset.
pub fn env_opt<F>(lookup: &F, var: &'static str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var).filter(|v| !v.trim().is_empty())
}

/// Parse an optional variable with `FromStr`.
pub fn env_parse<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(lookup, var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidEnv {
                var,
                message: e.to_string(),
                value,
            }),
    }
}

/// Parse a boolean flag. Accepts `1/0`, `true/false`, `yes/no`, `on/off`.
pub fn env_flag<F>(lookup: &F, var: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = env_opt(lookup, var) else {
        return Ok(None);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value,
            message: "expected a boolean".into(),
        }),
    }
}

/// Read and parse a required URL.
pub fn env_url<F>(lookup: &F, var: &'static str) -> Result<Url, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = env_required(lookup, var)?;
    Url::parse(raw.trim()).map_err(|e| ConfigError::UrlParse {
        url: raw,
        message: e.to_string(),
    })
}
