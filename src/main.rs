//! # Cloud Scan Discovery
//!
//! Consumes cloud change events from SQS and keeps `ScheduledScan`
//! resources in one namespace in sync with the running workloads.
//!
//! ## Usage
//!
//! ```bash
//! cloud-scan-discovery --config /etc/cloud-scan-discovery/config.yaml
//! cloud-scan-discovery --config ./config.yaml --check
//! ```

use anyhow::Result;
use clap::Parser;
use cloud_scan_discovery::config::LogConfig;
use cloud_scan_discovery::{constants, runtime};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cloud-scan-discovery")]
#[command(about = "Auto-discover cloud workloads and schedule security scans for them")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, env = constants::ENV_CONFIG_PATH, default_value = constants::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Must run before any TLS client (kube, AWS) is built
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_existing| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let cli = Cli::parse();
    runtime::init_tracing(&LogConfig::from_env());

    if cli.check {
        runtime::check_config(&cli.config)?;
        return Ok(());
    }

    runtime::run(&cli.config).await
}
