//! # Constants
//!
//! Shared constants used throughout the discovery process.
//!
//! These values represent reasonable defaults and can be overridden via
//! the config file or environment variables where applicable.

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cloud-scan-discovery/config.yaml";

/// Environment variable naming the config file
pub const ENV_CONFIG_PATH: &str = "DISCOVERY_CONFIG";

/// Environment override for the target namespace
pub const ENV_NAMESPACE: &str = "DISCOVERY_NAMESPACE";

pub const ENV_METRICS_PORT: &str = "METRICS_PORT";

pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

pub const ENV_LOG_FORMAT: &str = "LOG_FORMAT";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Default tracing filter when neither `RUST_LOG` nor `LOG_LEVEL` is set
pub const DEFAULT_LOG_FILTER: &str = "cloud_scan_discovery=info";

/// Default long-poll duration of a queue receive (seconds)
pub const DEFAULT_RECEIVE_WAIT_SECS: u64 = 20;

/// SQS maximum long-poll duration (seconds)
pub const MAX_RECEIVE_WAIT_SECS: u64 = 20;

/// Default batch size of a queue receive
pub const DEFAULT_MAX_MESSAGES: i32 = 10;

/// SQS maximum batch size
pub const MAX_MESSAGES_PER_RECEIVE: i32 = 10;

/// Default deadline for a single cluster API call (seconds)
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Default pause after a failed receive before polling again (seconds)
pub const DEFAULT_RECEIVE_ERROR_DELAY_SECS: u64 = 5;
