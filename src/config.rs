//! Configuration management for carreviews using the prefer crate.
//!
//! Two layers are kept apart: [`CrawlInput`] says *what* to crawl and is read
//! once per run (actor-style JSON plus CLI flags), while [`Config`] holds the
//! runtime knobs (pacing, retries, concurrency) discovered from the usual
//! config locations.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::models::FingerprintMode;

/// Default number of reviews to collect.
pub const DEFAULT_RESULTS_WANTED: u32 = 20;

/// Errors that abort a run before any page is fetched.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("either startUrl or make + model + year must be provided")]
    MissingTarget,

    #[error("invalid year: {0}")]
    InvalidYear(String),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {0}")]
    Parse(String),

    #[error("invalid proxy URL {url}: {reason}")]
    InvalidProxy { url: String, reason: String },

    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

/// What to crawl, in the actor input format (`startUrl`, `proxyConfiguration`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlInput {
    #[serde(rename = "startUrl", default, skip_serializing_if = "Option::is_none")]
    pub start_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub make: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Model year; accepts a number or a numeric string.
    #[serde(
        default,
        deserialize_with = "deserialize_year",
        skip_serializing_if = "Option::is_none"
    )]
    pub year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results_wanted: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    /// Passed through to the network layer untouched.
    #[serde(
        rename = "proxyConfiguration",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub proxy_configuration: Option<serde_json::Value>,
}

impl CrawlInput {
    /// Read actor-style input from a JSON file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigurationError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents)
            .map_err(|e| ConfigurationError::Parse(format!("{}: {}", path.display(), e)))
    }

    /// Requested review count, clamped to at least one.
    pub fn results_wanted(&self) -> u32 {
        self.results_wanted.unwrap_or(DEFAULT_RESULTS_WANTED).max(1)
    }

    /// First proxy URL from `proxyConfiguration.proxyUrls`, if any.
    ///
    /// Other proxy settings (groups, countries, rotation) belong to the
    /// external network layer and are ignored here.
    pub fn proxy_url(&self) -> Option<String> {
        self.proxy_configuration
            .as_ref()?
            .get("proxyUrls")?
            .as_array()?
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
    }
}

/// Parse a model year given as free text.
pub fn parse_year(raw: &str) -> Result<u32, ConfigurationError> {
    let trimmed = raw.trim();
    if let Ok(year) = trimmed.parse::<u32>() {
        return Ok(year);
    }
    // Accept "2022.0" the way a loose numeric coercion would.
    match trimmed.parse::<f64>() {
        Ok(f) if f.fract() == 0.0 && f >= 0.0 && f <= u32::MAX as f64 => Ok(f as u32),
        _ => Err(ConfigurationError::InvalidYear(raw.to_string())),
    }
}

fn deserialize_year<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => parse_year(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(serde_json::Value::Number(n)) => parse_year(&n.to_string())
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => Err(serde::de::Error::custom(format!("invalid year: {}", other))),
    }
}

/// Runtime settings for the crawler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// User agent configuration.
    /// - None: Use the default carreviews user agent
    /// - "impersonate": Randomly select from real browser user agents
    /// - Any other string: Use as custom user agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Wall-clock limit for a single page fetch, in seconds.
    pub request_timeout: u64,
    /// Lower bound of the randomized pre-fetch delay.
    pub delay_min_ms: u64,
    /// Upper bound of the randomized pre-fetch delay.
    pub delay_max_ms: u64,
    /// Number of pages fetched in parallel.
    pub concurrency: usize,
    /// Retries per page after the first failed attempt.
    pub max_request_retries: u32,
    pub fingerprint: FingerprintMode,
    /// JSON Lines output file; stdout when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
    /// Path of the file this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user_agent: None,
            request_timeout: 60,
            delay_min_ms: 300,
            delay_max_ms: 700,
            concurrency: 8,
            max_request_retries: 3,
            fingerprint: FingerprintMode::default(),
            output: None,
            source_path: None,
        }
    }
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers carreviews config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("carreviews").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("Ignoring unreadable config: {}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            // No config file found
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigurationError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigurationError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, ConfigurationError> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

        match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| ConfigurationError::Parse(format!("TOML config: {}", e))),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| ConfigurationError::Parse(format!("YAML config: {}", e))),
            _ => serde_json::from_str(contents)
                .map_err(|e| ConfigurationError::Parse(format!("JSON config: {}", e))),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    /// Pacing range as (min, max); a reversed range is normalized.
    pub fn delay_range(&self) -> (Duration, Duration) {
        let lo = self.delay_min_ms.min(self.delay_max_ms);
        let hi = self.delay_min_ms.max(self.delay_max_ms);
        (Duration::from_millis(lo), Duration::from_millis(hi))
    }
}
