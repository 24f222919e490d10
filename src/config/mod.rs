//! Configuration layer: typed settings with layered precedence (files → environment).

use std::{num::NonZeroU64, path::Path, str::FromStr};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::keys::SEPARATOR;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "unikey";
const ENV_PREFIX: &str = "UNIKEY";
const DEFAULT_PREFIX: &str = "unikey";
const DEFAULT_EXPIRATION_MINUTES: u64 = 60;
const DEFAULT_REGISTRY_EXPIRATION_MINUTES: u64 = 60 * 24 * 365;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub query_log: QueryLogSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub prefix: String,
    pub enabled: bool,
    pub default_expiration_minutes: NonZeroU64,
    pub registry_expiration_minutes: NonZeroU64,
}

#[derive(Debug, Clone, Copy)]
pub struct QueryLogSettings {
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence.
///
/// Sources, lowest first: `config/default.*`, `unikey.*`, the explicit
/// `config_file` (required when given), then `UNIKEY__SECTION__KEY`
/// environment variables.
pub fn load(config_file: Option<&Path>) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = config_file {
        builder = builder.add_source(File::from(path).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let raw: RawSettings = builder.build()?.try_deserialize()?;
    Settings::from_raw(raw)
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            cache,
            query_log,
            logging,
        } = raw;

        let cache = build_cache_settings(cache)?;
        let query_log = QueryLogSettings {
            enabled: query_log.enabled.unwrap_or(false),
        };
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            cache,
            query_log,
            logging,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let prefix = match cache.prefix {
        Some(prefix) => prefix.trim().to_string(),
        None => DEFAULT_PREFIX.to_string(),
    };
    if prefix.is_empty() {
        return Err(LoadError::invalid("cache.prefix", "must not be empty"));
    }
    if prefix.contains(SEPARATOR) {
        return Err(LoadError::invalid(
            "cache.prefix",
            format!("must not contain `{SEPARATOR}`"),
        ));
    }

    let default_expiration_minutes = non_zero_minutes(
        cache
            .default_expiration_minutes
            .unwrap_or(DEFAULT_EXPIRATION_MINUTES),
        "cache.default_expiration_minutes",
    )?;
    let registry_expiration_minutes = non_zero_minutes(
        cache
            .registry_expiration_minutes
            .unwrap_or(DEFAULT_REGISTRY_EXPIRATION_MINUTES),
        "cache.registry_expiration_minutes",
    )?;

    Ok(CacheSettings {
        prefix,
        enabled: cache.enabled.unwrap_or(true),
        default_expiration_minutes,
        registry_expiration_minutes,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn non_zero_minutes(value: u64, key: &'static str) -> Result<NonZeroU64, LoadError> {
    NonZeroU64::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    query_log: RawQueryLogSettings,
    logging: RawLoggingSettings,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    prefix: Option<String>,
    enabled: Option<bool>,
    default_expiration_minutes: Option<u64>,
    registry_expiration_minutes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawQueryLogSettings {
    enabled: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}
