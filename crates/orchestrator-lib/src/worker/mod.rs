//! Reconciliation worker
//!
//! Each pass recomputes the desired collectors from the inventory, reads the
//! digests of the collectors running in the cluster and closes the gap:
//! removals first, then creations. Nothing is carried between passes.

mod qualify;


pub use qualify::{
    build_record, collector_definition, first_authentication, first_endpoint,
    has_supported_application, qualify, Disqualified, Qualification, TenantScope,
};

use crate::cluster::{ClusterError, ObjectManager, ObjectManagerError};
use crate::collector::{
    collector_labels, collector_selector, digest_selector, CollectorDefinitions, CollectorRecord,
    COLLECTOR_DIGEST_LABEL, COLLECTOR_LABEL, SOURCE_TYPE_ANNOTATION,
};
use crate::health::{components, HealthRegistry};
use crate::inventory::{Inventory, InventoryError};
use crate::models::{RefreshStatus, SourceType};
use crate::observability::{OrchestratorMetrics, StructuredLogger};
use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Registry namespace collector images are pulled from
    pub image_namespace: String,
    /// `http://host:port` of the ingress API handed to collectors
    pub ingress_api: String,
    pub interval: Duration,
}

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub desired: usize,
    pub actual: usize,
    pub created: usize,
    pub removed: usize,
    pub quota_limited: usize,
}

/// Desired collectors keyed by record digest
pub type DesiredState = BTreeMap<String, CollectorRecord>;

enum Creation {
    Deployed,
    QuotaLimited,
}

pub struct Worker {
    inventory: Arc<dyn Inventory>,
    objects: Arc<ObjectManager>,
    definitions: CollectorDefinitions,
    settings: WorkerSettings,
    metrics: OrchestratorMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl Worker {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        objects: Arc<ObjectManager>,
        definitions: CollectorDefinitions,
        settings: WorkerSettings,
        metrics: OrchestratorMetrics,
        logger: StructuredLogger,
        health: HealthRegistry,
    ) -> Self {
        Self {
            inventory,
            objects,
            definitions,
            settings,
            metrics,
            logger,
            health,
        }
    }

    /// Collector records for every fully configured source, by digest
    pub async fn desired_state(&self) -> Result<DesiredState, InventoryError> {
        let source_types: HashMap<String, SourceType> = self
            .inventory
            .source_types()
            .await?
            .into_iter()
            .map(|t| (t.id.clone(), t))
            .collect();
        let application_type_ids = self.inventory.supported_application_type_ids().await?;

        let mut desired = DesiredState::new();

        for tenant in self.inventory.tenants().await? {
            let sources_with_applications: HashSet<String> = self
                .inventory
                .applications(&application_type_ids, &tenant)
                .await?
                .into_iter()
                .filter_map(|app| app.source_id)
                .collect();

            let scope = TenantScope {
                tenant: &tenant,
                image_namespace: &self.settings.image_namespace,
                source_types: &source_types,
                definitions: &self.definitions,
                sources_with_applications: &sources_with_applications,
            };

            for topology_source in self.inventory.topology_sources(&tenant).await? {
                match qualify(self.inventory.as_ref(), &scope, &topology_source.id).await? {
                    Qualification::Qualified(record) => {
                        desired.insert(record.digest(), *record);
                    }
                    Qualification::Disqualified(reason) => {
                        debug!(
                            source_id = %topology_source.id,
                            tenant = %tenant,
                            reason = %reason,
                            "Skipping source"
                        );
                    }
                }
            }
        }

        Ok(desired)
    }

    /// Digests of the collector workloads in the cluster
    pub async fn actual_state(&self) -> Result<BTreeSet<String>, ClusterError> {
        let deployment_configs = self
            .objects
            .get_deployment_configs(&collector_selector())
            .await?;

        Ok(deployment_configs
            .iter()
            .filter_map(|dc| dc.label(COLLECTOR_DIGEST_LABEL))
            .map(str::to_string)
            .collect())
    }

    /// Run one full pass
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let desired = self
            .desired_state()
            .await
            .context("failed to compute desired collectors")?;
        let actual = self
            .actual_state()
            .await
            .context("failed to list collectors")?;

        let mut summary = ReconcileSummary {
            desired: desired.len(),
            actual: actual.len(),
            ..Default::default()
        };

        for digest in actual.iter().filter(|d| !desired.contains_key(*d)) {
            if self.remove_collector(digest).await? {
                summary.removed += 1;
            }
        }

        for (digest, record) in desired.iter().filter(|(d, _)| !actual.contains(*d)) {
            match self.create_collector(digest, record).await? {
                Creation::Deployed => summary.created += 1,
                Creation::QuotaLimited => summary.quota_limited += 1,
            }
        }

        Ok(summary)
    }

    /// Remove the workload carrying `digest` and its Secret
    ///
    /// Returns false when no such workload exists any more.
    async fn remove_collector(&self, digest: &str) -> Result<bool> {
        let deployment_configs = self
            .objects
            .get_deployment_configs(&digest_selector(digest))
            .await?;
        let Some(deployment_config) = deployment_configs
            .into_iter()
            .find(|dc| dc.label(COLLECTOR_LABEL) == Some("true"))
        else {
            debug!(digest = %digest, "Collector already gone");
            return Ok(false);
        };

        let name = deployment_config.name().to_string();
        let source_type = deployment_config
            .annotation(SOURCE_TYPE_ANNOTATION)
            .unwrap_or("unknown")
            .to_string();

        info!(deployment_config = %name, digest = %digest, "Removing collector");
        self.objects
            .delete_deployment_config(&name, &source_type)
            .await
            .with_context(|| format!("failed to delete DeploymentConfig {}", name))?;

        let secret = crate::collector::secret_name(&name);
        self.objects
            .delete_secret(&secret, &source_type)
            .await
            .with_context(|| format!("failed to delete Secret {}", secret))?;

        self.logger.log_collector_removed(&name, digest);
        Ok(true)
    }

    async fn create_collector(&self, digest: &str, record: &CollectorRecord) -> Result<Creation> {
        let name = record.deployment_config_name();
        let secret = record.secret_name();
        info!(
            source_id = %record.source_id,
            digest = %digest,
            deployment_config = %name,
            "Creating collector"
        );

        // Nothing is written for a workload the quota would refuse
        match self
            .objects
            .admit_deployment_config(&name, &record.image_namespace, &record.image)
            .await
        {
            Ok(()) => {}
            Err(ObjectManagerError::Quota(exceeded)) => {
                self.logger
                    .log_quota_limited(&record.source_id, &record.tenant, &exceeded);
                self.report_refresh_status(record, RefreshStatus::QuotaLimited)
                    .await?;
                return Ok(Creation::QuotaLimited);
            }
            Err(ObjectManagerError::Cluster(e)) => {
                return Err(e).with_context(|| format!("failed to check quota for {}", name));
            }
        }

        self.write_secret(&secret, record)
            .await
            .with_context(|| format!("failed to create Secret {}", secret))?;

        let environment = record.container_environment(&self.settings.ingress_api);
        let source_type = record.source_type.clone();
        let created = self
            .objects
            .create_deployment_config(
                &name,
                &record.image_namespace,
                &record.image,
                &record.source_type,
                |dc| {
                    dc.labels_mut().extend(collector_labels(digest));
                    dc.annotations_mut()
                        .insert(SOURCE_TYPE_ANNOTATION.to_string(), source_type);
                    dc.spec.replicas = 1;
                    if let Some(container) = dc.first_container_mut() {
                        container.env = Some(environment);
                    }
                },
            )
            .await;

        let (creation, status) = match created {
            Ok(()) => {
                self.logger
                    .log_collector_created(&record.source_id, &record.tenant, &name, digest);
                (Creation::Deployed, RefreshStatus::Deployed)
            }
            // Quota usage moved between the check and the create
            Err(ObjectManagerError::Quota(exceeded)) => {
                self.logger
                    .log_quota_limited(&record.source_id, &record.tenant, &exceeded);
                self.objects
                    .delete_secret(&secret, &record.source_type)
                    .await
                    .with_context(|| format!("failed to roll back Secret {}", secret))?;
                (Creation::QuotaLimited, RefreshStatus::QuotaLimited)
            }
            Err(ObjectManagerError::Cluster(e)) => {
                return Err(e)
                    .with_context(|| format!("failed to create DeploymentConfig {}", name));
            }
        };

        self.report_refresh_status(record, status).await?;
        Ok(creation)
    }

    /// Create the collector's Secret, replacing one left behind by an
    /// interrupted creation
    async fn write_secret(&self, name: &str, record: &CollectorRecord) -> Result<(), ClusterError> {
        let source_type = &record.source_type;
        let data = record.secret.to_data();
        match self
            .objects
            .create_secret(name, source_type, |s| s.string_data = Some(data.clone()))
            .await
        {
            Err(e) if e.is_already_exists() => {
                warn!(secret = %name, "Replacing orphaned collector Secret");
                self.objects.delete_secret(name, source_type).await?;
                self.objects
                    .create_secret(name, source_type, |s| s.string_data = Some(data))
                    .await
            }
            other => other,
        }
    }

    async fn report_refresh_status(
        &self,
        record: &CollectorRecord,
        status: RefreshStatus,
    ) -> Result<()> {
        let updated = self
            .inventory
            .update_refresh_status(&record.source_id, &record.tenant, status)
            .await
            .with_context(|| {
                format!("failed to update refresh status of source {}", record.source_id)
            })?;

        if !updated {
            self.logger
                .log_refresh_status_failed(&record.source_id, &record.tenant, status.as_str());
        }
        Ok(())
    }

    /// Reconcile on the configured interval until shutdown
    ///
    /// A failed pass is logged, counted and retried on the next interval.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            "Starting reconciliation worker"
        );

        loop {
            let start = Instant::now();
            let result = self.reconcile().await;
            let elapsed = start.elapsed().as_secs_f64();
            self.metrics.observe_reconcile_duration(elapsed);

            match result {
                Ok(summary) => {
                    self.metrics.set_collectors(summary.desired, summary.actual);
                    self.logger.log_pass_complete(
                        summary.desired,
                        summary.actual,
                        summary.created,
                        summary.removed,
                        summary.quota_limited,
                        elapsed,
                    );
                    self.health.set_healthy(components::WORKER).await;
                    self.health.set_healthy(components::INVENTORY).await;
                }
                Err(e) => {
                    let message = format!("{:#}", e);
                    self.metrics.inc_reconcile_errors();
                    error!(error = %message, "Reconciliation pass failed");
                    if let Some(inventory_error) = e.downcast_ref::<InventoryError>() {
                        self.health
                            .set_degraded(components::INVENTORY, inventory_error.to_string())
                            .await;
                    }
                    self.health.set_degraded(components::WORKER, message).await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down reconciliation worker");
                    break;
                }
            }
        }
    }
}
