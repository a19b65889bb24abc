//! Quota-aware facade over a [`ClusterConnection`]

use super::{
    detect_connection, ApiSurface, ClusterConnection, ClusterError, Connector, DeploymentConfig,
    DeploymentConfigSpec, DeploymentTriggerPolicy, ObjectKind, QuotaExceeded, QuotaUsage,
    ResourceAmounts, DEPLOYMENT_CONFIG_NAME_LABEL,
};
use crate::observability::{ObjectAction, OrchestratorMetrics};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PodSpec, PodTemplateSpec, ResourceRequirements, Secret, Service,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Limits and requests given to every collector container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerResources {
    pub cpu_limit: String,
    pub cpu_request: String,
    pub memory_limit: String,
    pub memory_request: String,
}

impl Default for ContainerResources {
    fn default() -> Self {
        Self {
            cpu_limit: "100m".to_string(),
            cpu_request: "50m".to_string(),
            memory_limit: "500Mi".to_string(),
            memory_request: "200Mi".to_string(),
        }
    }
}

impl ContainerResources {
    fn requirements(&self) -> ResourceRequirements {
        let pair = |cpu: &str, memory: &str| {
            BTreeMap::from([
                ("cpu".to_string(), Quantity(cpu.to_string())),
                ("memory".to_string(), Quantity(memory.to_string())),
            ])
        };

        ResourceRequirements {
            limits: Some(pair(&self.cpu_limit, &self.memory_limit)),
            requests: Some(pair(&self.cpu_request, &self.memory_request)),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectManagerSettings {
    /// ResourceQuota consulted before every DeploymentConfig creation
    pub resource_quota_name: String,
    pub container_resources: ContainerResources,
}

impl Default for ObjectManagerSettings {
    fn default() -> Self {
        Self {
            resource_quota_name: "compute-resources-non-terminating".to_string(),
            container_resources: ContainerResources::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ObjectManagerError {
    #[error(transparent)]
    Quota(#[from] QuotaExceeded),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Sole gateway to the cluster API
///
/// Shared between the reconciliation worker, the metric scaler and its
/// watchers; every method takes `&self`.
pub struct ObjectManager {
    connection: Arc<dyn ClusterConnection>,
    settings: ObjectManagerSettings,
    metrics: OrchestratorMetrics,
}

impl ObjectManager {
    /// Detect the served API surface and keep that connection for the
    /// lifetime of the manager
    pub async fn connect(
        connector: &dyn Connector,
        settings: ObjectManagerSettings,
        metrics: OrchestratorMetrics,
    ) -> Result<Self, ClusterError> {
        let connection = detect_connection(connector).await?;
        Ok(Self::new(connection, settings, metrics))
    }

    pub fn new(
        connection: Arc<dyn ClusterConnection>,
        settings: ObjectManagerSettings,
        metrics: OrchestratorMetrics,
    ) -> Self {
        Self {
            connection,
            settings,
            metrics,
        }
    }

    pub fn surface(&self) -> ApiSurface {
        self.connection.surface()
    }

    // Secrets

    pub async fn create_secret<F>(
        &self,
        name: &str,
        source_type: &str,
        customize: F,
    ) -> Result<(), ClusterError>
    where
        F: FnOnce(&mut Secret) + Send,
    {
        let mut secret = Secret {
            metadata: named(name),
            ..Default::default()
        };
        customize(&mut secret);

        self.metrics
            .record_object(ObjectKind::Secret, ObjectAction::Add, source_type);
        self.connection.create_secret(&secret).await
    }

    pub async fn get_secret(&self, name: &str) -> Result<Option<Secret>, ClusterError> {
        self.connection.get_secret(name).await
    }

    pub async fn delete_secret(&self, name: &str, source_type: &str) -> Result<(), ClusterError> {
        self.delete(ObjectKind::Secret, name, source_type).await
    }

    // ConfigMaps

    pub async fn create_config_map<F>(
        &self,
        name: &str,
        source_type: &str,
        customize: F,
    ) -> Result<(), ClusterError>
    where
        F: FnOnce(&mut ConfigMap) + Send,
    {
        let mut config_map = ConfigMap {
            metadata: named(name),
            ..Default::default()
        };
        customize(&mut config_map);

        self.metrics
            .record_object(ObjectKind::ConfigMap, ObjectAction::Add, source_type);
        self.connection.create_config_map(&config_map).await
    }

    pub async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        self.connection.get_config_map(name).await
    }

    pub async fn delete_config_map(
        &self,
        name: &str,
        source_type: &str,
    ) -> Result<(), ClusterError> {
        self.delete(ObjectKind::ConfigMap, name, source_type).await
    }

    // Services

    pub async fn create_service<F>(
        &self,
        name: &str,
        source_type: &str,
        customize: F,
    ) -> Result<(), ClusterError>
    where
        F: FnOnce(&mut Service) + Send,
    {
        let mut service = Service {
            metadata: named(name),
            ..Default::default()
        };
        customize(&mut service);

        self.metrics
            .record_object(ObjectKind::Service, ObjectAction::Add, source_type);
        self.connection.create_service(&service).await
    }

    pub async fn get_service(&self, name: &str) -> Result<Option<Service>, ClusterError> {
        self.connection.get_service(name).await
    }

    pub async fn delete_service(&self, name: &str, source_type: &str) -> Result<(), ClusterError> {
        self.delete(ObjectKind::Service, name, source_type).await
    }

    // DeploymentConfigs

    /// Create a single-container DeploymentConfig after quota admission
    ///
    /// `customize` sees the full template (labels, replicas, container
    /// environment and resources) before admission, so resource changes it
    /// makes are what the quota is checked against. A refused admission
    /// creates nothing.
    pub async fn create_deployment_config<F>(
        &self,
        name: &str,
        image_namespace: &str,
        image: &str,
        source_type: &str,
        customize: F,
    ) -> Result<(), ObjectManagerError>
    where
        F: FnOnce(&mut DeploymentConfig) + Send,
    {
        let mut deployment_config = self.deployment_config_template(name, image_namespace, image);
        customize(&mut deployment_config);

        self.admit(deployment_config.containers()).await?;

        self.metrics
            .record_object(ObjectKind::DeploymentConfig, ObjectAction::Add, source_type);
        self.connection
            .create_deployment_config(&deployment_config)
            .await?;
        Ok(())
    }

    /// Check the collector container against the resource quota without
    /// creating anything
    pub async fn admit_deployment_config(
        &self,
        name: &str,
        image_namespace: &str,
        image: &str,
    ) -> Result<(), ObjectManagerError> {
        let template = self.deployment_config_template(name, image_namespace, image);
        self.admit(template.containers()).await
    }

    pub async fn get_deployment_config(
        &self,
        name: &str,
    ) -> Result<Option<DeploymentConfig>, ClusterError> {
        self.connection.get_deployment_config(name).await
    }

    pub async fn get_deployment_configs(
        &self,
        label_selector: &str,
    ) -> Result<Vec<DeploymentConfig>, ClusterError> {
        self.connection.list_deployment_configs(label_selector).await
    }

    pub async fn scale(&self, name: &str, replicas: i32) -> Result<(), ClusterError> {
        self.connection.scale_deployment_config(name, replicas).await
    }

    /// Scale to zero, remove its replication controllers, then remove the
    /// DeploymentConfig itself
    ///
    /// Every step tolerates objects that are already gone.
    pub async fn delete_deployment_config(
        &self,
        name: &str,
        source_type: &str,
    ) -> Result<(), ClusterError> {
        self.metrics
            .record_object(ObjectKind::DeploymentConfig, ObjectAction::Remove, source_type);

        match self.connection.scale_deployment_config(name, 0).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(deployment_config = %name, "DeploymentConfig already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        let selector = format!("{}={}", DEPLOYMENT_CONFIG_NAME_LABEL, name);
        for controller in self
            .connection
            .list_replication_controllers(&selector)
            .await?
        {
            let Some(rc_name) = controller.metadata.name.as_deref() else {
                continue;
            };
            ignore_not_found(
                self.connection
                    .delete(ObjectKind::ReplicationController, rc_name)
                    .await,
            )?;
        }

        ignore_not_found(
            self.connection
                .delete(ObjectKind::DeploymentConfig, name)
                .await,
        )
    }

    async fn delete(
        &self,
        kind: ObjectKind,
        name: &str,
        source_type: &str,
    ) -> Result<(), ClusterError> {
        self.metrics
            .record_object(kind, ObjectAction::Remove, source_type);
        ignore_not_found(self.connection.delete(kind, name).await)
    }

    async fn admit(&self, containers: &[Container]) -> Result<(), ObjectManagerError> {
        let quota_name = &self.settings.resource_quota_name;
        let Some(quota) = self.connection.get_resource_quota(quota_name).await? else {
            debug!(quota = %quota_name, "No resource quota, admitting");
            return Ok(());
        };

        let usage = QuotaUsage::from_quota(&quota)?;
        let requested = ResourceAmounts::from_containers(containers)?;

        if let Err(exceeded) = usage.admit(&requested) {
            info!(quota = %quota_name, error = %exceeded, "Quota admission refused");
            self.metrics.record_quota_rejection(&exceeded);
            return Err(exceeded.into());
        }

        Ok(())
    }

    fn deployment_config_template(
        &self,
        name: &str,
        image_namespace: &str,
        image: &str,
    ) -> DeploymentConfig {
        let surface = self.surface();
        let selector = BTreeMap::from([("name".to_string(), name.to_string())]);

        let container = Container {
            name: name.to_string(),
            image: Some(image_reference(image_namespace, image)),
            resources: Some(self.settings.container_resources.requirements()),
            ..Default::default()
        };

        DeploymentConfig {
            api_version: surface.deployment_config_api_version().to_string(),
            kind: "DeploymentConfig".to_string(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::new()),
                ..Default::default()
            },
            spec: DeploymentConfigSpec {
                replicas: 1,
                selector: selector.clone(),
                template: Some(PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(selector),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                }),
                triggers: vec![DeploymentTriggerPolicy::config_change()],
            },
            status: None,
        }
    }
}

fn named(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        ..Default::default()
    }
}

fn image_reference(image_namespace: &str, image: &str) -> String {
    if image_namespace.is_empty() {
        image.to_string()
    } else {
        format!("{}/{}", image_namespace, image)
    }
}

fn ignore_not_found(result: Result<(), ClusterError>) -> Result<(), ClusterError> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
