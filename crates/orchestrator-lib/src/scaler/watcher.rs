//! Per-workload scaling loop

use super::{MetricsSource, ScalingConfig};
use crate::cluster::ObjectManager;
use crate::observability::{OrchestratorMetrics, ScaleDirection, StructuredLogger};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause before retrying when the workload could not be read and no
/// interval is known yet
const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Why a watcher stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherExit {
    /// The workload lacks a complete set of scaling annotations
    NotConfigured,
    /// The workload no longer exists
    WorkloadGone,
}

/// Fixed-size window of usage samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    size: usize,
}

impl RollingWindow {
    pub fn new(size: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(size),
            size,
        }
    }

    pub fn push(&mut self, sample: f64) {
        if self.samples.len() == self.size {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Mean of the samples once the window is full
    pub fn mean(&self) -> Option<f64> {
        if self.size == 0 || self.samples.len() < self.size {
            return None;
        }
        Some(self.samples.iter().sum::<f64>() / self.samples.len() as f64)
    }

    /// Shrink or grow to `size`, dropping the oldest samples
    pub fn resize(&mut self, size: usize) {
        self.size = size;
        while self.samples.len() > size {
            self.samples.pop_front();
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Replica count to move to, if any
///
/// Moves one replica at a time and never leaves `[min_replicas, max_replicas]`.
pub fn target_replicas(usage_pct: f64, current: i32, config: &ScalingConfig) -> Option<i32> {
    if usage_pct > config.scale_up_threshold && current < config.max_replicas {
        Some((current + 1).max(config.min_replicas))
    } else if usage_pct < config.scale_down_threshold && current > config.min_replicas {
        Some((current - 1).min(config.max_replicas))
    } else {
        None
    }
}

/// Scales a single DeploymentConfig on its own usage signal
pub struct Watcher {
    deployment_config: String,
    objects: Arc<ObjectManager>,
    source: Arc<dyn MetricsSource>,
    metrics: OrchestratorMetrics,
    logger: StructuredLogger,
}

impl Watcher {
    pub fn new(
        deployment_config: impl Into<String>,
        objects: Arc<ObjectManager>,
        source: Arc<dyn MetricsSource>,
        metrics: OrchestratorMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            deployment_config: deployment_config.into(),
            objects,
            source,
            metrics,
            logger,
        }
    }

    /// Poll until the workload disappears or loses its scaling annotations
    ///
    /// The DeploymentConfig is re-read every poll so annotation edits and
    /// external replica changes take effect without a restart.
    pub async fn run(self) -> WatcherExit {
        let name = self.deployment_config.as_str();
        let mut window: Option<RollingWindow> = None;
        let mut interval = RETRY_DELAY;

        loop {
            let deployment_config = match self.objects.get_deployment_config(name).await {
                Ok(Some(dc)) => dc,
                Ok(None) => {
                    debug!(deployment_config = %name, "Workload gone, stopping watcher");
                    return WatcherExit::WorkloadGone;
                }
                Err(e) => {
                    warn!(deployment_config = %name, error = %e, "Failed to read workload");
                    tokio::time::sleep(interval).await;
                    continue;
                }
            };

            let Some(config) = ScalingConfig::from_annotations(&deployment_config.annotations())
            else {
                debug!(deployment_config = %name, "No scaling configuration, stopping watcher");
                return WatcherExit::NotConfigured;
            };
            interval = config.interval;

            let window = window.get_or_insert_with(|| {
                info!(
                    deployment_config = %name,
                    min_replicas = config.min_replicas,
                    max_replicas = config.max_replicas,
                    interval_secs = config.interval.as_secs(),
                    "Watching workload"
                );
                RollingWindow::new(config.window_size)
            });
            window.resize(config.window_size);

            match self.source.percent_usage(name, &config).await {
                Ok(Some(usage)) => window.push(usage),
                Ok(None) => debug!(deployment_config = %name, "No usage sample"),
                Err(e) => warn!(deployment_config = %name, error = %e, "Failed to read usage"),
            }

            if let Some(mean) = window.mean() {
                let current = deployment_config.spec.replicas;
                if let Some(target) = target_replicas(mean, current, &config) {
                    match self.objects.scale(name, target).await {
                        Ok(()) => {
                            let direction = if target > current {
                                ScaleDirection::Up
                            } else {
                                ScaleDirection::Down
                            };
                            self.metrics.record_scale(direction);
                            self.logger.log_scaled(name, current, target, mean);
                            window.clear();
                        }
                        Err(e) if e.is_not_found() => return WatcherExit::WorkloadGone,
                        Err(e) => {
                            warn!(deployment_config = %name, error = %e, "Failed to scale")
                        }
                    }
                }
            }

            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ScalingConfig {
        ScalingConfig {
            current_metric: "busy".to_string(),
            max_metric: "max".to_string(),
            min_replicas: 1,
            max_replicas: 3,
            scale_up_threshold: 80.0,
            scale_down_threshold: 20.0,
            interval: Duration::from_secs(10),
            window_size: 3,
        }
    }

    #[test]
    fn test_window_needs_to_fill() {
        let mut window = RollingWindow::new(3);
        window.push(10.0);
        window.push(20.0);
        assert_eq!(window.mean(), None);

        window.push(30.0);
        assert_eq!(window.mean(), Some(20.0));

        window.push(60.0);
        assert_eq!(window.len(), 3);
        assert_eq!(window.mean(), Some(110.0 / 3.0));
    }

    #[test]
    fn test_window_resize_keeps_newest() {
        let mut window = RollingWindow::new(3);
        for sample in [10.0, 20.0, 30.0] {
            window.push(sample);
        }

        window.resize(2);
        assert_eq!(window.mean(), Some(25.0));

        window.clear();
        assert!(window.is_empty());
    }

    #[test]
    fn test_target_replicas() {
        let config = config();

        assert_eq!(target_replicas(90.0, 1, &config), Some(2));
        assert_eq!(target_replicas(90.0, 3, &config), None);
        assert_eq!(target_replicas(10.0, 2, &config), Some(1));
        assert_eq!(target_replicas(10.0, 1, &config), None);
        assert_eq!(target_replicas(50.0, 2, &config), None);
    }

    #[test]
    fn test_target_replicas_at_thresholds_holds() {
        let config = config();

        assert_eq!(target_replicas(80.0, 2, &config), None);
        assert_eq!(target_replicas(20.0, 2, &config), None);
    }

    #[test]
    fn test_target_replicas_from_outside_bounds() {
        let config = config();

        // Replica counts changed by hand are pulled back toward the bounds
        assert_eq!(target_replicas(90.0, 0, &config), Some(1));
        assert_eq!(target_replicas(10.0, 5, &config), Some(3));
    }
}
