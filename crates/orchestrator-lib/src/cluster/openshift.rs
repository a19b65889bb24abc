//! `kube`-backed [`ClusterConnection`]
//!
//! Core objects go through typed `kube::Api` handles. DeploymentConfigs and
//! the discovery probes are OpenShift-only, so they are sent as raw requests
//! against the root of the detected [`ApiSurface`].

use super::{
    ApiSurface, ClusterConnection, ClusterError, Connector, DeploymentConfig, ObjectKind,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, ReplicationController, ResourceQuota, Secret, Service,
};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::debug;

const MERGE_PATCH: &str = "application/merge-patch+json";

#[derive(Debug, Deserialize)]
struct DeploymentConfigList {
    #[serde(default)]
    items: Vec<DeploymentConfig>,
}

/// Connection to one namespace on one OpenShift API surface
///
/// `kube::Client` is internally reference counted and safe to use from
/// many tasks at once.
#[derive(Clone)]
pub struct OpenShiftConnection {
    client: Client,
    namespace: String,
    surface: ApiSurface,
}

impl OpenShiftConnection {
    pub fn new(client: Client, namespace: impl Into<String>, surface: ApiSurface) -> Self {
        Self {
            client,
            namespace: namespace.into(),
            surface,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn deployment_configs_path(&self) -> String {
        format!(
            "{}/namespaces/{}/deploymentconfigs",
            self.surface.deployment_config_root(),
            self.namespace
        )
    }

    fn deployment_config_path(&self, name: &str) -> String {
        format!("{}/{}", self.deployment_configs_path(), name)
    }

    async fn send_text(&self, request: http::Request<Vec<u8>>) -> Result<String, ClusterError> {
        Ok(self.client.request_text(request).await?)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: http::Request<Vec<u8>>,
    ) -> Result<T, ClusterError> {
        Ok(self.client.request::<T>(request).await?)
    }
}

async fn get_opt<K>(api: &Api<K>, name: &str) -> Result<Option<K>, ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn create<K>(api: &Api<K>, object: &K) -> Result<(), ClusterError>
where
    K: Clone + DeserializeOwned + Serialize + Debug,
{
    api.create(&PostParams::default(), object).await?;
    Ok(())
}

async fn delete<K>(api: &Api<K>, name: &str) -> Result<(), ClusterError>
where
    K: Clone + DeserializeOwned + Debug,
{
    api.delete(name, &DeleteParams::default()).await?;
    Ok(())
}

#[async_trait]
impl ClusterConnection for OpenShiftConnection {
    fn surface(&self) -> ApiSurface {
        self.surface
    }

    async fn discover(&self) -> Result<(), ClusterError> {
        let request = http::Request::get(self.surface.discovery_path()).body(Vec::new())?;
        self.send_text(request).await?;
        debug!(path = self.surface.discovery_path(), "Discovery succeeded");
        Ok(())
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), ClusterError> {
        create(&self.api::<Secret>(), secret).await
    }

    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, ClusterError> {
        get_opt(&self.api::<Secret>(), name).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), ClusterError> {
        create(&self.api::<ConfigMap>(), config_map).await
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        get_opt(&self.api::<ConfigMap>(), name).await
    }

    async fn create_service(&self, service: &Service) -> Result<(), ClusterError> {
        create(&self.api::<Service>(), service).await
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>, ClusterError> {
        get_opt(&self.api::<Service>(), name).await
    }

    async fn create_deployment_config(
        &self,
        deployment_config: &DeploymentConfig,
    ) -> Result<(), ClusterError> {
        let body = serde_json::to_vec(deployment_config)?;
        let request = http::Request::post(self.deployment_configs_path())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)?;
        self.send_text(request).await?;
        Ok(())
    }

    async fn get_deployment_config(
        &self,
        name: &str,
    ) -> Result<Option<DeploymentConfig>, ClusterError> {
        let request = http::Request::get(self.deployment_config_path(name)).body(Vec::new())?;
        match self.send::<DeploymentConfig>(request).await {
            Ok(deployment_config) => Ok(Some(deployment_config)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list_deployment_configs(
        &self,
        label_selector: &str,
    ) -> Result<Vec<DeploymentConfig>, ClusterError> {
        let query: String = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("labelSelector", label_selector)
            .finish();
        let uri = format!("{}?{}", self.deployment_configs_path(), query);

        let request = http::Request::get(uri).body(Vec::new())?;
        let list = self.send::<DeploymentConfigList>(request).await?;
        Ok(list.items)
    }

    async fn scale_deployment_config(
        &self,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        let request = http::Request::patch(self.deployment_config_path(name))
            .header(http::header::CONTENT_TYPE, MERGE_PATCH)
            .body(serde_json::to_vec(&patch)?)?;
        self.send_text(request).await?;
        Ok(())
    }

    async fn list_replication_controllers(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ReplicationController>, ClusterError> {
        let params = ListParams::default().labels(label_selector);
        let list = self.api::<ReplicationController>().list(&params).await?;
        Ok(list.items)
    }

    async fn delete(&self, kind: ObjectKind, name: &str) -> Result<(), ClusterError> {
        match kind {
            ObjectKind::Secret => delete(&self.api::<Secret>(), name).await,
            ObjectKind::ConfigMap => delete(&self.api::<ConfigMap>(), name).await,
            ObjectKind::Service => delete(&self.api::<Service>(), name).await,
            ObjectKind::ReplicationController => {
                delete(&self.api::<ReplicationController>(), name).await
            }
            ObjectKind::DeploymentConfig => {
                let request =
                    http::Request::delete(self.deployment_config_path(name)).body(Vec::new())?;
                self.send_text(request).await?;
                Ok(())
            }
        }
    }

    async fn get_resource_quota(&self, name: &str) -> Result<Option<ResourceQuota>, ClusterError> {
        get_opt(&self.api::<ResourceQuota>(), name).await
    }
}

/// Produces [`OpenShiftConnection`]s sharing one `kube::Client`
#[derive(Clone)]
pub struct OpenShiftConnector {
    client: Client,
    namespace: String,
}

impl OpenShiftConnector {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    /// Build a client from the in-cluster service account or kubeconfig
    pub async fn try_default(namespace: impl Into<String>) -> Result<Self, ClusterError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, namespace))
    }
}

#[async_trait]
impl Connector for OpenShiftConnector {
    async fn connect(
        &self,
        surface: ApiSurface,
    ) -> Result<Arc<dyn ClusterConnection>, ClusterError> {
        let connection: Arc<dyn ClusterConnection> = Arc::new(OpenShiftConnection::new(
            self.client.clone(),
            self.namespace.clone(),
            surface,
        ));
        Ok(connection)
    }
}
