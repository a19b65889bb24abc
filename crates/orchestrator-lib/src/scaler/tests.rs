//! Watchers and their supervisor against an in-memory cluster

use super::*;
use crate::cluster::{ApiSurface, DeploymentConfig, ObjectManagerSettings};
use crate::collector::collector_labels;
use crate::health::ComponentStatus;
use crate::testing::FakeCluster;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Usage values scripted per workload
#[derive(Default)]
struct FakeMetricsSource {
    usage: Mutex<HashMap<String, Option<f64>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeMetricsSource {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn set_usage(&self, deployment_config: &str, usage: Option<f64>) {
        self.usage
            .lock()
            .unwrap()
            .insert(deployment_config.to_string(), usage);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetricsSource for FakeMetricsSource {
    async fn percent_usage(
        &self,
        deployment_config: &str,
        _config: &ScalingConfig,
    ) -> Result<Option<f64>, MetricsSourceError> {
        self.calls
            .lock()
            .unwrap()
            .push(deployment_config.to_string());
        Ok(self
            .usage
            .lock()
            .unwrap()
            .get(deployment_config)
            .copied()
            .flatten())
    }
}

fn scaling_annotations(window_size: usize, interval_secs: u64) -> BTreeMap<String, String> {
    [
        (CURRENT_METRIC_ANNOTATION, "busy_threads".to_string()),
        (MAX_METRIC_ANNOTATION, "max_threads".to_string()),
        (MIN_REPLICAS_ANNOTATION, "1".to_string()),
        (MAX_REPLICAS_ANNOTATION, "3".to_string()),
        (SCALE_UP_THRESHOLD_ANNOTATION, "80".to_string()),
        (SCALE_DOWN_THRESHOLD_ANNOTATION, "20".to_string()),
        (INTERVAL_ANNOTATION, interval_secs.to_string()),
        (WINDOW_SIZE_ANNOTATION, window_size.to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn workload(name: &str, replicas: i32, annotations: BTreeMap<String, String>) -> DeploymentConfig {
    let mut dc = DeploymentConfig {
        api_version: "apps.openshift.io/v1".to_string(),
        kind: "DeploymentConfig".to_string(),
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(collector_labels(&format!("digest-{}", name))),
            ..Default::default()
        },
        ..Default::default()
    };
    dc.spec.replicas = replicas;
    if !annotations.is_empty() {
        dc.metadata.annotations = Some(annotations);
    }
    dc
}

struct Harness {
    cluster: Arc<FakeCluster>,
    source: Arc<FakeMetricsSource>,
    health: HealthRegistry,
    objects: Arc<ObjectManager>,
    scaler: Arc<MetricScaler>,
}

fn harness() -> Harness {
    let cluster = FakeCluster::new(ApiSurface::V4);
    let source = FakeMetricsSource::new();
    let metrics = OrchestratorMetrics::new();
    let health = HealthRegistry::new();

    let objects = Arc::new(ObjectManager::new(
        cluster.clone(),
        ObjectManagerSettings::default(),
        metrics.clone(),
    ));
    let scaler = Arc::new(MetricScaler::new(
        objects.clone(),
        source.clone(),
        Duration::from_secs(60),
        metrics,
        StructuredLogger::new("test"),
        health.clone(),
    ));

    Harness {
        cluster,
        source,
        health,
        objects,
        scaler,
    }
}

impl Harness {
    fn watcher(&self, name: &str) -> Watcher {
        Watcher::new(
            name,
            self.objects.clone(),
            self.source.clone(),
            OrchestratorMetrics::new(),
            StructuredLogger::new("test"),
        )
    }

    fn scale_calls(&self) -> Vec<String> {
        self.cluster
            .mutations()
            .into_iter()
            .filter(|c| c.starts_with("scale:"))
            .collect()
    }
}

#[tokio::test(start_paused = true)]
async fn test_unannotated_workload_is_never_scaled() {
    let h = harness();
    h.cluster
        .insert_deployment_config(workload("collector-a", 1, BTreeMap::new()));

    assert_eq!(h.scaler.run_once().await.unwrap(), 0);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(!h.scaler.is_watching("collector-a"));
    assert!(h.source.calls().is_empty());
    assert!(h.scale_calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unannotated_workload_is_watched_once_annotated() {
    let h = harness();
    h.cluster
        .insert_deployment_config(workload("collector-a", 1, BTreeMap::new()));

    for _ in 0..3 {
        assert_eq!(h.scaler.run_once().await.unwrap(), 0);
    }
    assert!(!h
        .cluster
        .calls()
        .iter()
        .any(|c| c.starts_with("get_deployment_config:")));

    h.cluster
        .insert_deployment_config(workload("collector-a", 1, scaling_annotations(5, 300)));

    assert_eq!(h.scaler.run_once().await.unwrap(), 1);
    assert!(h.scaler.is_watching("collector-a"));
}

#[tokio::test(start_paused = true)]
async fn test_watcher_is_not_restarted_after_annotations_are_removed() {
    let h = harness();
    h.cluster
        .insert_deployment_config(workload("collector-a", 1, scaling_annotations(5, 10)));
    assert_eq!(h.scaler.run_once().await.unwrap(), 1);

    h.cluster
        .insert_deployment_config(workload("collector-a", 1, BTreeMap::new()));
    // The watcher notices on its next poll
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert_eq!(h.scaler.run_once().await.unwrap(), 0);
    assert!(!h.scaler.is_watching("collector-a"));
}

#[tokio::test(start_paused = true)]
async fn test_unannotated_watcher_exits() {
    let h = harness();
    h.cluster
        .insert_deployment_config(workload("collector-a", 1, BTreeMap::new()));

    let exit = h.watcher("collector-a").run().await;

    assert_eq!(exit, WatcherExit::NotConfigured);
    assert!(h.source.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_scales_up_once_per_full_window() {
    let h = harness();
    h.cluster
        .insert_deployment_config(workload("collector-a", 1, scaling_annotations(2, 10)));
    h.source.set_usage("collector-a", Some(90.0));

    let handle = tokio::spawn(h.watcher("collector-a").run());

    // Samples at t=0 and t=10 fill the window
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.cluster.replicas("collector-a"), Some(1));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.cluster.replicas("collector-a"), Some(2));

    // The window starts over after a scale
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(h.cluster.replicas("collector-a"), Some(3));

    // Capped at max_replicas
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.cluster.replicas("collector-a"), Some(3));
    assert_eq!(
        h.scale_calls(),
        vec!["scale:collector-a:2", "scale:collector-a:3"]
    );

    h.cluster.remove_deployment_config("collector-a");
    let exit = handle.await.unwrap();
    assert_eq!(exit, WatcherExit::WorkloadGone);
}

#[tokio::test(start_paused = true)]
async fn test_scales_down_to_min_replicas() {
    let h = harness();
    h.cluster
        .insert_deployment_config(workload("collector-a", 2, scaling_annotations(1, 10)));
    h.source.set_usage("collector-a", Some(5.0));

    let handle = tokio::spawn(h.watcher("collector-a").run());
    tokio::time::sleep(Duration::from_secs(45)).await;

    assert_eq!(h.cluster.replicas("collector-a"), Some(1));
    assert_eq!(h.scale_calls(), vec!["scale:collector-a:1"]);

    handle.abort();
}

#[tokio::test(start_paused = true)]
async fn test_holds_between_thresholds_or_without_samples() {
    let h = harness();
    h.cluster
        .insert_deployment_config(workload("collector-a", 2, scaling_annotations(1, 10)));
    h.cluster
        .insert_deployment_config(workload("collector-b", 2, scaling_annotations(1, 10)));
    h.source.set_usage("collector-a", Some(50.0));
    h.source.set_usage("collector-b", None);

    let a = tokio::spawn(h.watcher("collector-a").run());
    let b = tokio::spawn(h.watcher("collector-b").run());
    tokio::time::sleep(Duration::from_secs(45)).await;

    assert!(h.scale_calls().is_empty());
    assert!(h.source.calls().len() >= 8);

    a.abort();
    b.abort();
}

#[tokio::test(start_paused = true)]
async fn test_one_watcher_per_workload() {
    let h = harness();
    h.cluster
        .insert_deployment_config(workload("collector-a", 1, scaling_annotations(5, 300)));

    assert_eq!(h.scaler.run_once().await.unwrap(), 1);
    assert_eq!(h.scaler.run_once().await.unwrap(), 0);

    assert_eq!(h.scaler.len(), 1);
    assert!(h.scaler.is_watching("collector-a"));
}

#[tokio::test(start_paused = true)]
async fn test_watcher_of_removed_workload_is_stopped() {
    let h = harness();
    h.cluster
        .insert_deployment_config(workload("collector-a", 1, scaling_annotations(5, 300)));
    h.cluster
        .insert_deployment_config(workload("collector-b", 1, scaling_annotations(5, 300)));
    h.scaler.run_once().await.unwrap();
    assert_eq!(h.scaler.len(), 2);

    h.cluster.remove_deployment_config("collector-a");
    assert_eq!(h.scaler.run_once().await.unwrap(), 0);

    assert_eq!(h.scaler.len(), 1);
    assert!(!h.scaler.is_watching("collector-a"));
    assert!(h.scaler.is_watching("collector-b"));
}

#[tokio::test(start_paused = true)]
async fn test_only_collector_workloads_are_watched() {
    let h = harness();
    let mut other = workload("router", 1, scaling_annotations(5, 300));
    other.metadata.labels = None;
    h.cluster.insert_deployment_config(other);

    assert_eq!(h.scaler.run_once().await.unwrap(), 0);
    assert!(h.scaler.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_run_stops_watchers_on_shutdown() {
    let h = harness();
    h.health.register_all().await;
    h.cluster
        .insert_deployment_config(workload("collector-a", 1, scaling_annotations(5, 300)));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let scaler = h.scaler.clone();
    let handle = tokio::spawn(async move { scaler.run(shutdown_rx).await });

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.scaler.is_watching("collector-a"));

    let health = h.health.health().await;
    assert_eq!(
        health.components[components::METRIC_SCALER].status,
        ComponentStatus::Healthy
    );

    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    assert!(h.scaler.is_empty());
}
