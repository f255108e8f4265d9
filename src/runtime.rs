//! # Runtime
//!
//! Process startup and shutdown.
//!
//! Startup order: tracing, config (fail fast), metrics, HTTP server, cluster
//! client, one SQS consumer per configured queue. Shutdown on SIGINT or
//! SIGTERM: readiness drops, the shared cancellation token fires, monitors
//! finish their in-flight message and return.

use crate::cluster::KubeScanClient;
use crate::config::{DiscoveryConfig, LogConfig, LogFormat};
use crate::monitor::{DiscoveryMonitor, MonitorSettings};
use crate::observability;
use crate::reconciler::Reconciler;
use crate::server::{start_server, ServerState};
use crate::source::{sdk_config_for_region, SqsDeadLetterSink, SqsEventSource};
use anyhow::{Context, Result};
use aws_config::SdkConfig;
use kube::Client;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Install the global tracing subscriber
///
/// `RUST_LOG` wins over `LOG_LEVEL` when both are set.
pub fn init_tracing(log: &LogConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log.level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match log.format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("Tracing subscriber already initialized: {e}");
    }
}

/// Validate the config file and print a summary, without connecting anywhere
pub fn check_config(path: &Path) -> Result<DiscoveryConfig> {
    let config = DiscoveryConfig::load(path)
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;
    info!(
        namespace = %config.namespace,
        queues = config.queues.len(),
        templates = config.catalog.len(),
        "Configuration is valid"
    );
    Ok(config)
}

/// Run until a shutdown signal arrives
pub async fn run(config_path: &Path) -> Result<()> {
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    let config = check_config(config_path)?;

    observability::metrics::register_metrics()?;

    let token = CancellationToken::new();
    let server_state = Arc::new(ServerState::default());

    let server_handle = {
        let state = Arc::clone(&server_state);
        let shutdown = token.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = start_server(port, state, shutdown).await {
                error!("HTTP server error: {}", e);
            }
        })
    };

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let scan_client = Arc::new(KubeScanClient::new(
        client,
        &config.namespace,
        config.api_timeout,
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(config.catalog.clone()),
        scan_client,
    ));

    let settings = MonitorSettings {
        receive_wait: config.receive_wait,
        receive_error_delay: config.receive_error_delay,
    };

    let mut sdk_configs: HashMap<String, SdkConfig> = HashMap::new();
    let mut monitors = Vec::with_capacity(config.queues.len());
    for queue in &config.queues {
        if !sdk_configs.contains_key(&queue.region) {
            let sdk_config = sdk_config_for_region(&queue.region).await;
            sdk_configs.insert(queue.region.clone(), sdk_config);
        }
        let Some(sdk_config) = sdk_configs.get(&queue.region) else {
            continue;
        };

        let source = Arc::new(SqsEventSource::new(
            sdk_config,
            &queue.url,
            config.max_messages,
        ));
        let mut monitor = DiscoveryMonitor::new(source, Arc::clone(&reconciler), settings);
        if let Some(dead_letter_url) = &queue.dead_letter_url {
            monitor = monitor.with_dead_letter(Arc::new(SqsDeadLetterSink::new(
                sdk_config,
                dead_letter_url,
            )));
        } else {
            warn!(queue = %queue.url, "No deadLetterUrl configured, poison messages will be dropped");
        }

        let monitor_token = token.clone();
        monitors.push(tokio::spawn(async move {
            monitor.run(monitor_token).await;
        }));
    }

    server_state.set_ready(true);
    info!(
        namespace = %config.namespace,
        queues = monitors.len(),
        templates = config.catalog.len(),
        "Cloud scan discovery running"
    );

    {
        let state = Arc::clone(&server_state);
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown_signal().await {
                error!("Failed to listen for shutdown signals: {}", e);
            }
            state.set_ready(false);
            token.cancel();
        });
    }

    for handle in monitors {
        if let Err(e) = handle.await {
            error!("Discovery monitor task failed: {}", e);
        }
    }
    // All monitors are done; stop the HTTP server
    token.cancel();
    server_state.set_ready(false);

    if let Err(e) = server_handle.await {
        error!("HTTP server task failed: {}", e);
    }

    info!("Cloud scan discovery stopped");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                result?;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, initiating graceful shutdown");
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating graceful shutdown");
    }
    Ok(())
}
