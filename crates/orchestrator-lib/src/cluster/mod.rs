//! Cluster object management
//!
//! Everything that touches the cluster API goes through [`ObjectManager`].
//! The manager talks to the cluster through a [`ClusterConnection`], which
//! is chosen once at startup by probing the legacy (v3) and current (v4)
//! OpenShift API surfaces.

mod deployment_config;
mod manager;
mod openshift;
mod quantity;
mod quota;


pub use deployment_config::{
    DeploymentConfig, DeploymentConfigSpec, DeploymentConfigStatus, DeploymentTriggerPolicy,
};
pub use manager::{ContainerResources, ObjectManager, ObjectManagerError, ObjectManagerSettings};
pub use openshift::{OpenShiftConnection, OpenShiftConnector};
pub use quantity::{parse_bytes, parse_cpu_millis};
pub use quota::{QuotaDimension, QuotaExceeded, QuotaUsage, ResourceAmounts};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, ReplicationController, ResourceQuota, Secret, Service,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Label OpenShift puts on the replication controllers of a DeploymentConfig
pub const DEPLOYMENT_CONFIG_NAME_LABEL: &str = "openshift.io/deployment-config.name";

/// Kinds of cluster objects the orchestrator manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Secret,
    ConfigMap,
    Service,
    DeploymentConfig,
    ReplicationController,
}

impl ObjectKind {
    /// Metric label value for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Secret => "secret",
            ObjectKind::ConfigMap => "config_map",
            ObjectKind::Service => "service",
            ObjectKind::DeploymentConfig => "deployment_config",
            ObjectKind::ReplicationController => "replication_controller",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// OpenShift API surface serving DeploymentConfigs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiSurface {
    /// OpenShift 3 legacy API under `/oapi`
    V3,
    /// OpenShift 4 API group `apps.openshift.io`
    V4,
}

impl ApiSurface {
    /// Path probed to decide whether the surface is served
    pub fn discovery_path(&self) -> &'static str {
        match self {
            ApiSurface::V3 => "/oapi",
            ApiSurface::V4 => "/apis/apps.openshift.io",
        }
    }

    /// Versioned root DeploymentConfig URLs hang off
    pub fn deployment_config_root(&self) -> &'static str {
        match self {
            ApiSurface::V3 => "/oapi/v1",
            ApiSurface::V4 => "/apis/apps.openshift.io/v1",
        }
    }

    pub fn deployment_config_api_version(&self) -> &'static str {
        match self {
            ApiSurface::V3 => "v1",
            ApiSurface::V4 => "apps.openshift.io/v1",
        }
    }
}

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("cluster API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("cluster request failed: {0}")]
    Kube(#[source] kube::Error),

    #[error("failed to build cluster request: {0}")]
    Request(#[from] http::Error),

    #[error("failed to encode cluster object: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid quantity {0:?}")]
    InvalidQuantity(String),

    #[error("unable to detect an OpenShift API: {0}")]
    ConnectionUndetectable(String),
}

impl ClusterError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ClusterError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, ClusterError::Api { code: 409, .. })
    }
}

impl From<kube::Error> for ClusterError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => {
                ClusterError::NotFound(response.message)
            }
            kube::Error::Api(response) => ClusterError::Api {
                code: response.code,
                message: response.message,
            },
            other => ClusterError::Kube(other),
        }
    }
}

/// Raw access to the cluster API for one namespace
///
/// `get_*` return `None` for missing objects; `delete` reports a missing
/// object as [`ClusterError::NotFound`]. Implementations must be safe to
/// share between concurrently running tasks.
#[async_trait]
pub trait ClusterConnection: Send + Sync {
    fn surface(&self) -> ApiSurface;

    /// Call the surface's discovery endpoint
    async fn discover(&self) -> Result<(), ClusterError>;

    async fn create_secret(&self, secret: &Secret) -> Result<(), ClusterError>;

    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, ClusterError>;

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), ClusterError>;

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>, ClusterError>;

    async fn create_service(&self, service: &Service) -> Result<(), ClusterError>;

    async fn get_service(&self, name: &str) -> Result<Option<Service>, ClusterError>;

    async fn create_deployment_config(
        &self,
        deployment_config: &DeploymentConfig,
    ) -> Result<(), ClusterError>;

    async fn get_deployment_config(
        &self,
        name: &str,
    ) -> Result<Option<DeploymentConfig>, ClusterError>;

    async fn list_deployment_configs(
        &self,
        label_selector: &str,
    ) -> Result<Vec<DeploymentConfig>, ClusterError>;

    async fn scale_deployment_config(&self, name: &str, replicas: i32)
        -> Result<(), ClusterError>;

    async fn list_replication_controllers(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ReplicationController>, ClusterError>;

    async fn delete(&self, kind: ObjectKind, name: &str) -> Result<(), ClusterError>;

    async fn get_resource_quota(&self, name: &str) -> Result<Option<ResourceQuota>, ClusterError>;
}

/// Opens a connection to one API surface without probing it
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        surface: ApiSurface,
    ) -> Result<Arc<dyn ClusterConnection>, ClusterError>;
}

/// Find the API surface this cluster serves
///
/// The legacy surface is tried first; only a not-found answer from its
/// discovery endpoint moves on to the current surface. Any failure on the
/// current surface means no usable connection exists.
pub async fn detect_connection(
    connector: &dyn Connector,
) -> Result<Arc<dyn ClusterConnection>, ClusterError> {
    let legacy = connector.connect(ApiSurface::V3).await?;
    match legacy.discover().await {
        Ok(()) => {
            info!(surface = ?ApiSurface::V3, "Detected OpenShift API");
            return Ok(legacy);
        }
        Err(e) if e.is_not_found() => {
            info!("Legacy OpenShift API not served, probing apps.openshift.io");
        }
        Err(e) => return Err(e),
    }

    let current = connector.connect(ApiSurface::V4).await?;
    match current.discover().await {
        Ok(()) => {
            info!(surface = ?ApiSurface::V4, "Detected OpenShift API");
            Ok(current)
        }
        Err(e) => {
            warn!(error = %e, "No OpenShift API detected");
            Err(ClusterError::ConnectionUndetectable(e.to_string()))
        }
    }
}
