//! Observability infrastructure for the collector orchestrator
//!
//! Provides:
//! - Prometheus metrics (object churn, quota rejections, scaling, pass latency)
//! - Structured JSON logging of orchestrator events with tracing

use crate::cluster::{ObjectKind, QuotaExceeded};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for reconciliation pass durations (in seconds)
const PASS_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

static GLOBAL_METRICS: OnceLock<OrchestratorMetricsInner> = OnceLock::new();

struct OrchestratorMetricsInner {
    objects_total: IntCounterVec,
    quota_rejections_total: IntCounterVec,
    scale_events_total: IntCounterVec,
    reconcile_errors_total: IntCounter,
    collectors_desired: IntGauge,
    collectors_actual: IntGauge,
    watchers_active: IntGauge,
    reconcile_duration_seconds: Histogram,
}

impl OrchestratorMetricsInner {
    fn new() -> Self {
        Self {
            objects_total: register_int_counter_vec!(
                "collector_orchestrator_objects_total",
                "Cluster objects the orchestrator created or removed",
                &["kind", "action", "source_type"]
            )
            .expect("Failed to register objects_total"),

            quota_rejections_total: register_int_counter_vec!(
                "collector_orchestrator_quota_rejections_total",
                "Collector creations refused by the namespace resource quota",
                &["dimension"]
            )
            .expect("Failed to register quota_rejections_total"),

            scale_events_total: register_int_counter_vec!(
                "collector_orchestrator_scale_events_total",
                "Replica count changes made by the metric scaler",
                &["direction"]
            )
            .expect("Failed to register scale_events_total"),

            reconcile_errors_total: register_int_counter!(
                "collector_orchestrator_reconcile_errors_total",
                "Reconciliation passes aborted by an error"
            )
            .expect("Failed to register reconcile_errors_total"),

            collectors_desired: register_int_gauge!(
                "collector_orchestrator_collectors_desired",
                "Collectors the inventory asked for in the last pass"
            )
            .expect("Failed to register collectors_desired"),

            collectors_actual: register_int_gauge!(
                "collector_orchestrator_collectors_actual",
                "Collectors found in the cluster in the last pass"
            )
            .expect("Failed to register collectors_actual"),

            watchers_active: register_int_gauge!(
                "collector_orchestrator_watchers_active",
                "Metric scaler watchers currently running"
            )
            .expect("Failed to register watchers_active"),

            reconcile_duration_seconds: register_histogram!(
                "collector_orchestrator_reconcile_duration_seconds",
                "Time spent in one reconciliation pass",
                PASS_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_duration_seconds"),
        }
    }
}

/// Whether an object was created or removed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAction {
    Add,
    Remove,
}

impl ObjectAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectAction::Add => "add",
            ObjectAction::Remove => "remove",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDirection {
    Up,
    Down,
}

impl ScaleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleDirection::Up => "up",
            ScaleDirection::Down => "down",
        }
    }
}

/// Orchestrator metrics for Prometheus exposition
///
/// Lightweight handle to the process-global metrics; clones share the same
/// underlying series.
#[derive(Clone)]
pub struct OrchestratorMetrics {
    _private: (),
}

impl Default for OrchestratorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for OrchestratorMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestratorMetrics").finish()
    }
}

impl OrchestratorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OrchestratorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OrchestratorMetricsInner {
        GLOBAL_METRICS.get_or_init(OrchestratorMetricsInner::new)
    }

    pub fn record_object(&self, kind: ObjectKind, action: ObjectAction, source_type: &str) {
        self.inner()
            .objects_total
            .with_label_values(&[kind.as_str(), action.as_str(), source_type])
            .inc();
    }

    /// Current value of one object counter series
    pub fn object_count(&self, kind: ObjectKind, action: ObjectAction, source_type: &str) -> u64 {
        self.inner()
            .objects_total
            .with_label_values(&[kind.as_str(), action.as_str(), source_type])
            .get()
    }

    pub fn record_quota_rejection(&self, exceeded: &QuotaExceeded) {
        self.inner()
            .quota_rejections_total
            .with_label_values(&[exceeded.dimension().quota_key()])
            .inc();
    }

    pub fn record_scale(&self, direction: ScaleDirection) {
        self.inner()
            .scale_events_total
            .with_label_values(&[direction.as_str()])
            .inc();
    }

    pub fn inc_reconcile_errors(&self) {
        self.inner().reconcile_errors_total.inc();
    }

    pub fn set_collectors(&self, desired: usize, actual: usize) {
        self.inner().collectors_desired.set(desired as i64);
        self.inner().collectors_actual.set(actual as i64);
    }

    pub fn set_watchers_active(&self, count: usize) {
        self.inner().watchers_active.set(count as i64);
    }

    pub fn observe_reconcile_duration(&self, duration_secs: f64) {
        self.inner().reconcile_duration_seconds.observe(duration_secs);
    }
}

/// Structured logger for orchestrator events
///
/// Every method emits exactly one record carrying an `event` field so the
/// JSON log stream can be filtered by event type.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn log_startup(&self, version: &str, surface: &str) {
        info!(
            event = "orchestrator_started",
            namespace = %self.namespace,
            version = %version,
            api_surface = %surface,
            "Collector orchestrator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "orchestrator_shutdown",
            namespace = %self.namespace,
            reason = %reason,
            "Collector orchestrator shutting down"
        );
    }

    pub fn log_collector_created(
        &self,
        source_id: &str,
        tenant: &str,
        deployment_config: &str,
        digest: &str,
    ) {
        info!(
            event = "collector_created",
            namespace = %self.namespace,
            source_id = %source_id,
            tenant = %tenant,
            deployment_config = %deployment_config,
            digest = %digest,
            "Created collector"
        );
    }

    pub fn log_collector_removed(&self, deployment_config: &str, digest: &str) {
        info!(
            event = "collector_removed",
            namespace = %self.namespace,
            deployment_config = %deployment_config,
            digest = %digest,
            "Removed collector"
        );
    }

    pub fn log_quota_limited(&self, source_id: &str, tenant: &str, exceeded: &QuotaExceeded) {
        warn!(
            event = "quota_limited",
            namespace = %self.namespace,
            source_id = %source_id,
            tenant = %tenant,
            dimension = %exceeded.dimension(),
            details = %exceeded,
            "Collector creation refused by resource quota"
        );
    }

    pub fn log_refresh_status_failed(&self, source_id: &str, tenant: &str, status: &str) {
        warn!(
            event = "refresh_status_failed",
            namespace = %self.namespace,
            source_id = %source_id,
            tenant = %tenant,
            refresh_status = %status,
            "Source vanished before its refresh status could be recorded"
        );
    }

    pub fn log_scaled(&self, deployment_config: &str, from: i32, to: i32, usage_pct: f64) {
        info!(
            event = "replicas_scaled",
            namespace = %self.namespace,
            deployment_config = %deployment_config,
            from_replicas = from,
            to_replicas = to,
            usage_pct = usage_pct,
            "Scaled collector"
        );
    }

    pub fn log_pass_complete(
        &self,
        desired: usize,
        actual: usize,
        created: usize,
        removed: usize,
        quota_limited: usize,
        duration_secs: f64,
    ) {
        info!(
            event = "reconcile_complete",
            namespace = %self.namespace,
            desired = desired,
            actual = actual,
            created = created,
            removed = removed,
            quota_limited = quota_limited,
            duration_secs = duration_secs,
            "Reconciliation pass complete"
        );
    }
}
