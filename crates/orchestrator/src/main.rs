//! Collector orchestrator
//!
//! Runs in the collectors' namespace, keeping one collector workload per
//! fully configured inventory source and scaling those workloads on their
//! own usage metrics.

use anyhow::{Context, Result};
use collector_orchestrator::{api, config::OrchestratorConfig};
use orchestrator_lib::{
    cluster::{ObjectManager, OpenShiftConnector},
    collector::CollectorDefinitions,
    health::{components, HealthRegistry},
    inventory::{InventoryClient, InventoryClientConfig},
    observability::{OrchestratorMetrics, StructuredLogger},
    scaler::{MetricScaler, PrometheusMetricsSource},
    worker::{Worker, WorkerSettings},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ORCHESTRATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting collector-orchestrator");

    let config = OrchestratorConfig::load()?;
    info!(
        namespace = %config.namespace(),
        image_namespace = %config.image_namespace,
        "Orchestrator configured"
    );

    let health = HealthRegistry::new();
    health.register_all().await;

    let metrics = OrchestratorMetrics::new();
    let logger = StructuredLogger::new(config.namespace());

    let app_state = Arc::new(api::AppState::new(health.clone(), metrics.clone()));
    let (shutdown_tx, _) = broadcast::channel(1);

    // Probes answer while the cluster connection is being detected
    let api_handle = tokio::spawn(api::serve(
        config.api_port,
        app_state,
        shutdown_tx.subscribe(),
    ));

    let objects = match connect(&config, metrics.clone()).await {
        Ok(objects) => Arc::new(objects),
        Err(e) => {
            health
                .set_unhealthy(components::CLUSTER, format!("{:#}", e))
                .await;
            return Err(e);
        }
    };
    logger.log_startup(
        ORCHESTRATOR_VERSION,
        objects.surface().deployment_config_api_version(),
    );

    let inventory = InventoryClient::new(InventoryClientConfig {
        sources_api: config.sources_api().to_string(),
        topology_api: config.topology_api().to_string(),
        request_timeout: config.request_timeout(),
    })
    .context("failed to build inventory client")?;

    let worker = Arc::new(Worker::new(
        Arc::new(inventory),
        objects.clone(),
        CollectorDefinitions::new(&config.collector_image_tag),
        WorkerSettings {
            image_namespace: config.image_namespace.clone(),
            ingress_api: config.ingress_api(),
            interval: config.reconcile_interval(),
        },
        metrics.clone(),
        logger.clone(),
        health.clone(),
    ));

    let metrics_source = PrometheusMetricsSource::new(&config.metrics_url, config.request_timeout())
        .context("failed to build metrics source")?;
    let scaler = Arc::new(MetricScaler::new(
        objects,
        Arc::new(metrics_source),
        config.scaler_interval(),
        metrics,
        logger.clone(),
        health.clone(),
    ));

    health.set_ready(true).await;

    let worker_handle = {
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { worker.run(shutdown).await })
    };
    let scaler_handle = {
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move { scaler.run(shutdown).await })
    };

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health.set_ready(false).await;
    let _ = shutdown_tx.send(());

    for (name, handle) in [("worker", worker_handle), ("metric scaler", scaler_handle)] {
        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Task ended abnormally");
        }
    }
    match api_handle.await {
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task ended abnormally"),
        Ok(Ok(())) => {}
    }

    info!("Shut down");
    Ok(())
}

/// Detect the served OpenShift API and wrap it in an object manager
async fn connect(config: &OrchestratorConfig, metrics: OrchestratorMetrics) -> Result<ObjectManager> {
    let connector = OpenShiftConnector::try_default(config.namespace())
        .await
        .context("failed to build cluster client")?;

    ObjectManager::connect(&connector, config.object_manager_settings(), metrics)
        .await
        .context("failed to detect the OpenShift API")
}
