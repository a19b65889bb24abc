//! Per-workload scaling configuration read from DeploymentConfig annotations

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

pub const CURRENT_METRIC_ANNOTATION: &str = "metric_scaler_current_metric_name";
pub const MAX_METRIC_ANNOTATION: &str = "metric_scaler_max_metric_name";
pub const MIN_REPLICAS_ANNOTATION: &str = "metric_scaler_min_replicas";
pub const MAX_REPLICAS_ANNOTATION: &str = "metric_scaler_max_replicas";
pub const SCALE_UP_THRESHOLD_ANNOTATION: &str = "metric_scaler_scale_up_threshold_pct";
pub const SCALE_DOWN_THRESHOLD_ANNOTATION: &str = "metric_scaler_scale_down_threshold_pct";
pub const INTERVAL_ANNOTATION: &str = "metric_scaler_interval_seconds";
pub const WINDOW_SIZE_ANNOTATION: &str = "metric_scaler_window_size";

const DEFAULT_WINDOW_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct ScalingConfig {
    /// Metric holding the workload's current usage
    pub current_metric: String,
    /// Metric holding the workload's capacity
    pub max_metric: String,
    pub min_replicas: i32,
    pub max_replicas: i32,
    /// Percent usage above which a replica is added
    pub scale_up_threshold: f64,
    /// Percent usage below which a replica is removed
    pub scale_down_threshold: f64,
    pub interval: Duration,
    /// Samples averaged before a decision is taken
    pub window_size: usize,
}

impl ScalingConfig {
    /// Returns `None` unless every required annotation is present and valid
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Option<Self> {
        let config = Self {
            current_metric: text(annotations, CURRENT_METRIC_ANNOTATION)?,
            max_metric: text(annotations, MAX_METRIC_ANNOTATION)?,
            min_replicas: parse(annotations, MIN_REPLICAS_ANNOTATION)?,
            max_replicas: parse(annotations, MAX_REPLICAS_ANNOTATION)?,
            scale_up_threshold: parse(annotations, SCALE_UP_THRESHOLD_ANNOTATION)?,
            scale_down_threshold: parse(annotations, SCALE_DOWN_THRESHOLD_ANNOTATION)?,
            interval: Duration::from_secs(parse(annotations, INTERVAL_ANNOTATION)?),
            window_size: match annotations.get(WINDOW_SIZE_ANNOTATION) {
                Some(raw) => raw.trim().parse().ok()?,
                None => DEFAULT_WINDOW_SIZE,
            },
        };

        let valid = config.min_replicas >= 0
            && config.min_replicas <= config.max_replicas
            && config.scale_down_threshold <= config.scale_up_threshold
            && !config.interval.is_zero()
            && config.window_size > 0;

        valid.then_some(config)
    }
}

fn text(annotations: &BTreeMap<String, String>, key: &str) -> Option<String> {
    annotations
        .get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn parse<T: FromStr>(annotations: &BTreeMap<String, String>, key: &str) -> Option<T> {
    annotations.get(key)?.trim().parse().ok()
}
