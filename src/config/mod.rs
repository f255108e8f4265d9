//! # Configuration
//!
//! Process configuration: one YAML file (queues, tuning, scan template
//! catalog) plus a handful of environment overrides for deployment-specific
//! values.
//!
//! ## Environment Variables
//!
//! - `DISCOVERY_NAMESPACE` - Namespace ScheduledScans are written to (overrides `namespace`)
//! - `METRICS_PORT` - Port of the metrics/health server (default 8080)
//! - `LOG_LEVEL` - Default log filter when `RUST_LOG` is unset
//! - `LOG_FORMAT` - `json` (default) or `text`
//!
//! The whole file is validated before anything connects to AWS or the
//! cluster; a broken catalog fails startup.
//!
//! ## Example
//!
//! ```yaml
//! namespace: scans
//! queues:
//!   - url: https://sqs.eu-west-1.amazonaws.com/123456789012/ecs-task-events
//!     region: eu-west-1
//!     deadLetterUrl: https://sqs.eu-west-1.amazonaws.com/123456789012/ecs-task-events-poison
//! receiveWaitSeconds: 20
//! scanTemplates:
//!   - name: trivy-sbom
//!     targetKind: image
//!     scanType: trivy-sbom-image
//!     repeatInterval: 1h
//!     parameters: ["{{ .ImageID }}"]
//! ```

use crate::catalog::{Catalog, CatalogError, ScanTemplateConfig};
use crate::constants;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no namespace configured (set `namespace` or DISCOVERY_NAMESPACE)")]
    MissingNamespace,
    #[error("at least one queue must be configured")]
    NoQueues,
    #[error("queue #{index} is invalid: {reason}")]
    InvalidQueue { index: usize, reason: String },
    #[error("invalid value for {key}: {reason}")]
    InvalidEnv { key: &'static str, reason: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// One queue to consume
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueueConfig {
    pub url: String,
    pub region: String,
    /// Poison messages are forwarded here before being dropped
    #[serde(default)]
    pub dead_letter_url: Option<String>,
}

/// File schema, before defaults and validation are applied
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    namespace: Option<String>,
    #[serde(default)]
    queues: Vec<QueueConfig>,
    #[serde(default = "default_receive_wait_seconds")]
    receive_wait_seconds: u64,
    #[serde(default = "default_max_messages")]
    max_messages: i32,
    #[serde(default = "default_api_timeout_seconds")]
    api_timeout_seconds: u64,
    #[serde(default = "default_receive_error_delay_seconds")]
    receive_error_delay_seconds: u64,
    #[serde(default)]
    scan_templates: Vec<ScanTemplateConfig>,
}

fn default_receive_wait_seconds() -> u64 {
    constants::DEFAULT_RECEIVE_WAIT_SECS
}

fn default_max_messages() -> i32 {
    constants::DEFAULT_MAX_MESSAGES
}

fn default_api_timeout_seconds() -> u64 {
    constants::DEFAULT_API_TIMEOUT_SECS
}

fn default_receive_error_delay_seconds() -> u64 {
    constants::DEFAULT_RECEIVE_ERROR_DELAY_SECS
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "text" | "pretty" => Ok(LogFormat::Text),
            other => Err(format!("unknown log format '{other}' (expected json or text)")),
        }
    }
}

/// Logging settings, read before the config file so load errors are logged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl LogConfig {
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(&|key| std::env::var(key).ok())
    }

    fn from_lookup(env: &dyn Fn(&str) -> Option<String>) -> Self {
        Self {
            level: env_var_or_default(env, constants::ENV_LOG_LEVEL, constants::DEFAULT_LOG_FILTER),
            format: env(constants::ENV_LOG_FORMAT)
                .and_then(|value| value.parse().ok())
                .unwrap_or_default(),
        }
    }
}

/// Fully validated runtime configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub namespace: String,
    pub queues: Vec<QueueConfig>,
    /// Clamped to 1..=20s
    pub receive_wait: Duration,
    /// Clamped to 1..=10
    pub max_messages: i32,
    pub api_timeout: Duration,
    pub receive_error_delay: Duration,
    pub metrics_port: u16,
    pub catalog: Catalog,
}

impl DiscoveryConfig {
    /// Read and validate `path`, applying process environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents, &|key| std::env::var(key).ok())
    }

    /// Parse and validate a YAML document; `env` resolves overrides
    pub fn from_yaml(
        contents: &str,
        env: &dyn Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(contents)?;

        let namespace = env(constants::ENV_NAMESPACE)
            .or(file.namespace)
            .map(|ns| ns.trim().to_string())
            .filter(|ns| !ns.is_empty())
            .ok_or(ConfigError::MissingNamespace)?;

        if file.queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }
        for (index, queue) in file.queues.iter().enumerate() {
            validate_queue(index, queue)?;
        }

        let metrics_port = match env(constants::ENV_METRICS_PORT) {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidEnv {
                    key: constants::ENV_METRICS_PORT,
                    reason: e.to_string(),
                })?,
            None => constants::DEFAULT_METRICS_PORT,
        };

        let catalog = Catalog::load(file.scan_templates)?;

        Ok(Self {
            namespace,
            queues: file.queues,
            receive_wait: Duration::from_secs(
                file.receive_wait_seconds
                    .clamp(1, constants::MAX_RECEIVE_WAIT_SECS),
            ),
            max_messages: file.max_messages.clamp(1, constants::MAX_MESSAGES_PER_RECEIVE),
            api_timeout: Duration::from_secs(file.api_timeout_seconds.max(1)),
            receive_error_delay: Duration::from_secs(file.receive_error_delay_seconds),
            metrics_port,
            catalog,
        })
    }
}

fn validate_queue(index: usize, queue: &QueueConfig) -> Result<(), ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidQueue {
        index,
        reason: reason.to_string(),
    };
    if !queue.url.starts_with("https://") && !queue.url.starts_with("http://") {
        return Err(invalid("url must be an http(s) queue URL"));
    }
    if queue.region.trim().is_empty() {
        return Err(invalid("region must not be empty"));
    }
    if queue
        .dead_letter_url
        .as_deref()
        .is_some_and(|url| url == queue.url)
    {
        return Err(invalid("deadLetterUrl must differ from url"));
    }
    Ok(())
}

fn env_var_or_default(env: &dyn Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    env(key)
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
