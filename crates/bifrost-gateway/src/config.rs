//! Gateway configuration with layered loading and environment variable interpolation.
//!
//! Sources, lowest precedence first: built-in defaults, `bifrost.toml` (if
//! present, with `${VAR}` interpolation), then `BIFROST_`-prefixed environment
//! variables using `__` as the section separator, e.g.
//! `BIFROST_SERVER__BIND_ADDRESS=0.0.0.0:8080`.

use bifrost_store::CorruptPolicy;
use figment::{
    providers::{Env, Format, Toml},
    value::{Dict, Map, Value},
    Error as FigmentError, Figment, Metadata, Profile, Provider,
};
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::dispatch::DEFAULT_MAX_CONCURRENT_TARGETS;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "bifrost.toml";

const ENV_PREFIX: &str = "BIFROST_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(Box<FigmentError>),

    #[error("Cannot read configuration file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
}

impl From<FigmentError> for ConfigError {
    fn from(err: FigmentError) -> Self {
        Self::Figment(Box::new(err))
    }
}

/// Top-level gateway configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub limits: LimitsConfig,
}

impl GatewayConfig {
    /// Loads configuration from [`DEFAULT_CONFIG_PATH`].
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Loads configuration from `path`, falling back to defaults when the
    /// file does not exist. Environment variables override file settings.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let mut figment = Figment::new();
        if path.exists() {
            figment = figment.merge(InterpolatingToml::file(path)?);
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
        }

        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract::<Self>()
            .map_err(ConfigError::from)
    }

    /// Parses configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Figment::new()
            .merge(InterpolatingToml::string(content))
            .extract::<Self>()
            .map_err(ConfigError::from)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Time to wait for in-flight requests during shutdown.
    #[serde(
        default = "default_shutdown_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            shutdown_timeout: default_shutdown_timeout(),
        }
    }
}

const fn default_bind_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 3000)
}

const fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Where the route registry is persisted.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding `routes.json`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// What to do with a snapshot that cannot be parsed at startup.
    #[serde(default)]
    pub on_corrupt: CorruptPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            on_corrupt: CorruptPolicy::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

/// Outbound request settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on a single target call, connect through body.
    #[serde(
        default = "default_target_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub target_timeout: Duration,

    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub connect_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            target_timeout: default_target_timeout(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

const fn default_target_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum inbound request body size in bytes.
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Maximum target calls in flight for a single fan-out.
    #[serde(default = "default_max_concurrent_targets")]
    pub max_concurrent_targets: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            max_concurrent_targets: default_max_concurrent_targets(),
        }
    }
}

const fn default_max_concurrent_targets() -> usize {
    DEFAULT_MAX_CONCURRENT_TARGETS
}

const fn default_max_body_size() -> usize {
    10 * 1024 * 1024 // 10MB
}

/// Accepts `"250ms"`, `"30s"`, `"5m"`, or a bare number of seconds, either
/// as a string or an integer.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Secs(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(s) => parse_duration(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("Invalid duration: {s}");

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse().map(Duration::from_millis).map_err(|_| invalid())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse().map(Duration::from_secs).map_err(|_| invalid())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| invalid())
    } else {
        s.parse().map(Duration::from_secs).map_err(|_| invalid())
    }
}

/// Replaces `${NAME}` with the value of environment variable `NAME`.
/// Unset variables expand to nothing.
fn interpolate(value: Value) -> Value {
    match value {
        Value::String(_, s) => Value::from(interpolate_str(&s)),
        Value::Dict(tag, dict) => Value::Dict(
            tag,
            dict.into_iter().map(|(k, v)| (k, interpolate(v))).collect(),
        ),
        Value::Array(tag, items) => {
            Value::Array(tag, items.into_iter().map(interpolate).collect())
        }
        other => other,
    }
}

fn interpolate_str(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                if let Ok(val) = std::env::var(&after[..end]) {
                    result.push_str(&val);
                }
                rest = &after[end + 1..];
            }
            None => {
                // Unterminated reference is kept literally.
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}

/// TOML provider that expands `${VAR}` references in string values.
pub struct InterpolatingToml {
    content: String,
}

impl InterpolatingToml {
    pub fn file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self { content })
    }

    pub fn string(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

impl Provider for InterpolatingToml {
    fn metadata(&self) -> Metadata {
        Metadata::named("Interpolating TOML")
    }

    fn data(&self) -> Result<Map<Profile, Dict>, FigmentError> {
        let data = Toml::string(&self.content).data()?;

        Ok(data
            .into_iter()
            .map(|(profile, dict)| {
                let dict = dict.into_iter().map(|(k, v)| (k, interpolate(v))).collect();
                (profile, dict)
            })
            .collect())
    }
}
