//! Metric-driven horizontal scaling of collector workloads
//!
//! The [`MetricScaler`] keeps one [`Watcher`] task per collector
//! DeploymentConfig that carries scaling annotations. Watchers re-read their
//! configuration every poll and exit on their own when it goes missing or the
//! workload is deleted. The scaler prunes finished tasks and starts a new one
//! once the workload is annotated again.

mod config;
mod metrics_source;
mod watcher;

#[cfg(test)]
mod tests;

pub use config::{
    ScalingConfig, CURRENT_METRIC_ANNOTATION, INTERVAL_ANNOTATION, MAX_METRIC_ANNOTATION,
    MAX_REPLICAS_ANNOTATION, MIN_REPLICAS_ANNOTATION, SCALE_DOWN_THRESHOLD_ANNOTATION,
    SCALE_UP_THRESHOLD_ANNOTATION, WINDOW_SIZE_ANNOTATION,
};
pub use metrics_source::{MetricsSource, MetricsSourceError, PrometheusMetricsSource};
pub use watcher::{target_replicas, RollingWindow, Watcher, WatcherExit};

use crate::cluster::{ClusterError, ObjectManager};
use crate::collector::collector_selector;
use crate::health::{components, HealthRegistry};
use crate::observability::{OrchestratorMetrics, StructuredLogger};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Supervisor of the per-workload watchers
pub struct MetricScaler {
    objects: Arc<ObjectManager>,
    source: Arc<dyn MetricsSource>,
    interval: Duration,
    /// Watcher tasks by DeploymentConfig name
    watchers: DashMap<String, JoinHandle<WatcherExit>>,
    metrics: OrchestratorMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl MetricScaler {
    pub fn new(
        objects: Arc<ObjectManager>,
        source: Arc<dyn MetricsSource>,
        interval: Duration,
        metrics: OrchestratorMetrics,
        logger: StructuredLogger,
        health: HealthRegistry,
    ) -> Self {
        Self {
            objects,
            source,
            interval,
            watchers: DashMap::new(),
            metrics,
            logger,
            health,
        }
    }

    /// Number of tracked watcher tasks, finished or not
    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }

    pub fn is_watching(&self, deployment_config: &str) -> bool {
        self.watchers
            .get(deployment_config)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Bring the watcher set in line with the collector workloads
    ///
    /// Returns how many watchers were started.
    pub async fn run_once(&self) -> Result<usize, ClusterError> {
        // Workload name to whether it carries a usable scaling configuration
        let live: HashMap<String, bool> = self
            .objects
            .get_deployment_configs(&collector_selector())
            .await?
            .iter()
            .filter(|dc| !dc.name().is_empty())
            .map(|dc| {
                let configured = ScalingConfig::from_annotations(&dc.annotations()).is_some();
                (dc.name().to_string(), configured)
            })
            .collect();

        self.watchers.retain(|name, handle| {
            if !live.contains_key(name) {
                debug!(deployment_config = %name, "Stopping watcher of removed workload");
                handle.abort();
                false
            } else {
                !handle.is_finished()
            }
        });

        let mut started = 0;
        for (name, configured) in live {
            if !configured || self.watchers.contains_key(&name) {
                continue;
            }
            let watcher = Watcher::new(
                name.clone(),
                self.objects.clone(),
                self.source.clone(),
                self.metrics.clone(),
                self.logger.clone(),
            );
            self.watchers.insert(name, tokio::spawn(watcher.run()));
            started += 1;
        }

        self.metrics.set_watchers_active(self.watchers.len());
        Ok(started)
    }

    /// Abort every watcher task
    pub fn stop_all(&self) {
        for entry in self.watchers.iter() {
            entry.value().abort();
        }
        self.watchers.clear();
        self.metrics.set_watchers_active(0);
    }

    /// Supervise watchers on the configured interval until shutdown
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting metric scaler"
        );

        loop {
            match self.run_once().await {
                Ok(started) => {
                    if started > 0 {
                        debug!(started, watchers = self.watchers.len(), "Started watchers");
                    }
                    self.health.set_healthy(components::METRIC_SCALER).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to list collector workloads");
                    self.health
                        .set_degraded(components::METRIC_SCALER, e.to_string())
                        .await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down metric scaler");
                    break;
                }
            }
        }

        self.stop_all();
    }
}

impl Drop for MetricScaler {
    fn drop(&mut self) {
        for entry in self.watchers.iter() {
            entry.value().abort();
        }
    }
}
