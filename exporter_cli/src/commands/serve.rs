use crate::server::{self, AppState};
use crate::ui::{self, Status};
use anyhow::{Context, Result};
use exporter_collectors::{
    read_config_from_file, spawn_runners, CollectorContext, ExporterConfig, UpdaterRegistry,
};
use exporter_core::api::ArmClient;
use exporter_core::{CancellationToken, EnvAuthorizer, TtlCache};
use exporter_metrics::MetricsRegistry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Command line values that take precedence over the configuration file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub address: Option<String>,
    pub port: Option<u16>,
    pub interval: Option<u64>,
    pub subscription: Option<String>,
}

impl Overrides {
    fn apply(self, config: &mut ExporterConfig) {
        if let Some(address) = self.address {
            config.listen.address = address;
        }
        if let Some(port) = self.port {
            config.listen.port = port;
        }
        if let Some(secs) = self.interval {
            config.update_interval = Duration::from_secs(secs);
        }
        if let Some(subscription) = self.subscription {
            config.subscription_id = subscription;
        }
    }
}

pub async fn execute(config_file: Option<PathBuf>, overrides: Overrides) -> Result<()> {
    let mut config = match &config_file {
        Some(path) => read_config_from_file(path)
            .await
            .with_context(|| format!("failed to read configuration from {}", path.display()))?,
        None => ExporterConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate().context("invalid configuration")?;

    ui::section("serve");
    ui::print_config(&config);

    let authorizer = Arc::new(EnvAuthorizer::from_env());
    if !authorizer.has_management_token() {
        ui::status(
            Status::Warn,
            "AZURE_MANAGEMENT_TOKEN is not set, remote calls will be rejected",
        );
    }

    let api = Arc::new(
        ArmClient::new(authorizer)
            .context("failed to build the resource API client")?
            .with_management_endpoint(config.management_endpoint.as_str()),
    );
    let cache = Arc::new(TtlCache::new(config.cache_ttl));
    let metrics = Arc::new(MetricsRegistry::new().context("failed to create metrics registry")?);
    let context = Arc::new(CollectorContext::new(
        &config,
        api,
        cache.clone(),
        metrics.clone(),
    ));
    let updaters = Arc::new(
        UpdaterRegistry::from_names(&config.updaters, context)
            .context("failed to build updaters")?,
    );

    let address = config.listen.socket_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;

    let root = CancellationToken::new();
    let runners = spawn_runners(
        &updaters,
        metrics.clone(),
        cache,
        config.update_interval,
        &root,
    );

    info!("Serving metrics on http://{}/metrics", address);
    info!("Endpoints:");
    info!("  GET /metrics  - Text exposition of the published snapshots");
    info!("  GET /healthz  - Liveness and per-updater generations");

    let shutdown = root.clone();
    let served = axum::serve(listener, server::router(AppState::new(metrics, updaters)))
        .with_graceful_shutdown(async move {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        error!("Failed to listen for Ctrl-C: {}", e);
                    }
                    info!("Shutdown requested, cancelling in-flight cycles");
                }
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
        .await;

    root.cancel();
    for joined in futures::future::join_all(runners).await {
        if let Err(e) = joined {
            warn!("Updater task ended abnormally: {}", e);
        }
    }

    served.context("metrics server failed")?;
    info!("Exporter stopped");

    Ok(())
}
