//! In-memory cluster used by unit tests

use crate::cluster::{
    ApiSurface, ClusterConnection, ClusterError, Connector, DeploymentConfig, ObjectKind,
};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    ConfigMap, ReplicationController, ResourceQuota, Secret, Service,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Outcome of a discovery probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    Served,
    NotFound,
    Unavailable,
}

#[derive(Default)]
struct State {
    secrets: BTreeMap<String, Secret>,
    config_maps: BTreeMap<String, ConfigMap>,
    services: BTreeMap<String, Service>,
    deployment_configs: BTreeMap<String, DeploymentConfig>,
    replication_controllers: BTreeMap<String, ReplicationController>,
    /// Read front to back; the last entry stays
    quota: Option<(String, VecDeque<ResourceQuota>)>,
    calls: Vec<String>,
}

pub struct FakeCluster {
    surface: ApiSurface,
    discovery: Mutex<Discovery>,
    state: Mutex<State>,
}

impl FakeCluster {
    pub fn new(surface: ApiSurface) -> Arc<Self> {
        Arc::new(Self {
            surface,
            discovery: Mutex::new(Discovery::Served),
            state: Mutex::new(State::default()),
        })
    }

    pub fn set_discovery(&self, discovery: Discovery) {
        *self.discovery.lock().unwrap() = discovery;
    }

    pub fn set_quota(&self, name: &str, quota: ResourceQuota) {
        self.set_quota_sequence(name, vec![quota]);
    }

    /// Answer successive quota reads with `quotas` in order
    pub fn set_quota_sequence(&self, name: &str, quotas: Vec<ResourceQuota>) {
        self.state.lock().unwrap().quota = Some((name.to_string(), quotas.into()));
    }

    pub fn insert_deployment_config(&self, deployment_config: DeploymentConfig) {
        let name = deployment_config.name().to_string();
        self.state
            .lock()
            .unwrap()
            .deployment_configs
            .insert(name, deployment_config);
    }

    /// Add a replication controller owned by `deployment_config`
    pub fn insert_replication_controller(&self, name: &str, deployment_config: &str) {
        let controller = ReplicationController {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(BTreeMap::from([(
                    crate::cluster::DEPLOYMENT_CONFIG_NAME_LABEL.to_string(),
                    deployment_config.to_string(),
                )])),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .replication_controllers
            .insert(name.to_string(), controller);
    }

    /// Drop a DeploymentConfig behind the orchestrator's back
    pub fn remove_deployment_config(&self, name: &str) {
        self.state.lock().unwrap().deployment_configs.remove(name);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Calls that changed cluster state
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("get") && !c.starts_with("list") && c != "discover")
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.state.lock().unwrap().secrets.get(name).cloned()
    }

    pub fn secret_names(&self) -> Vec<String> {
        self.state.lock().unwrap().secrets.keys().cloned().collect()
    }

    pub fn deployment_config(&self, name: &str) -> Option<DeploymentConfig> {
        self.state
            .lock()
            .unwrap()
            .deployment_configs
            .get(name)
            .cloned()
    }

    pub fn deployment_config_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .deployment_configs
            .keys()
            .cloned()
            .collect()
    }

    pub fn replication_controller_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .replication_controllers
            .keys()
            .cloned()
            .collect()
    }

    pub fn replicas(&self, name: &str) -> Option<i32> {
        self.deployment_config(name).map(|dc| dc.spec.replicas)
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

/// `k=v[,k=v...]` equality selector match
pub fn selector_matches(selector: &str, labels: Option<&BTreeMap<String, String>>) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((key, value)) => {
                labels.and_then(|l| l.get(key)).map(String::as_str) == Some(value)
            }
            None => false,
        })
}

fn insert_new<T>(
    map: &mut BTreeMap<String, T>,
    name: Option<&String>,
    object: &T,
) -> Result<(), ClusterError>
where
    T: Clone,
{
    let name = name.cloned().unwrap_or_default();
    if map.contains_key(&name) {
        return Err(ClusterError::Api {
            code: 409,
            message: format!("{} already exists", name),
        });
    }
    map.insert(name, object.clone());
    Ok(())
}

fn remove<T>(map: &mut BTreeMap<String, T>, name: &str) -> Result<(), ClusterError> {
    map.remove(name)
        .map(|_| ())
        .ok_or_else(|| ClusterError::NotFound(name.to_string()))
}

#[async_trait]
impl ClusterConnection for FakeCluster {
    fn surface(&self) -> ApiSurface {
        self.surface
    }

    async fn discover(&self) -> Result<(), ClusterError> {
        self.record("discover".to_string());
        match *self.discovery.lock().unwrap() {
            Discovery::Served => Ok(()),
            Discovery::NotFound => Err(ClusterError::NotFound(
                self.surface.discovery_path().to_string(),
            )),
            Discovery::Unavailable => Err(ClusterError::Api {
                code: 503,
                message: "service unavailable".to_string(),
            }),
        }
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), ClusterError> {
        self.record(format!(
            "create_secret:{}",
            secret.metadata.name.as_deref().unwrap_or("")
        ));
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state.secrets, secret.metadata.name.as_ref(), secret)
    }

    async fn get_secret(&self, name: &str) -> Result<Option<Secret>, ClusterError> {
        self.record(format!("get_secret:{}", name));
        Ok(self.secret(name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), ClusterError> {
        self.record(format!(
            "create_config_map:{}",
            config_map.metadata.name.as_deref().unwrap_or("")
        ));
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state.config_maps, config_map.metadata.name.as_ref(), config_map)
    }

    async fn get_config_map(&self, name: &str) -> Result<Option<ConfigMap>, ClusterError> {
        self.record(format!("get_config_map:{}", name));
        Ok(self.state.lock().unwrap().config_maps.get(name).cloned())
    }

    async fn create_service(&self, service: &Service) -> Result<(), ClusterError> {
        self.record(format!(
            "create_service:{}",
            service.metadata.name.as_deref().unwrap_or("")
        ));
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state.services, service.metadata.name.as_ref(), service)
    }

    async fn get_service(&self, name: &str) -> Result<Option<Service>, ClusterError> {
        self.record(format!("get_service:{}", name));
        Ok(self.state.lock().unwrap().services.get(name).cloned())
    }

    async fn create_deployment_config(
        &self,
        deployment_config: &DeploymentConfig,
    ) -> Result<(), ClusterError> {
        self.record(format!("create_deployment_config:{}", deployment_config.name()));
        let mut state = self.state.lock().unwrap();
        insert_new(
            &mut state.deployment_configs,
            deployment_config.metadata.name.as_ref(),
            deployment_config,
        )
    }

    async fn get_deployment_config(
        &self,
        name: &str,
    ) -> Result<Option<DeploymentConfig>, ClusterError> {
        self.record(format!("get_deployment_config:{}", name));
        Ok(self.deployment_config(name))
    }

    async fn list_deployment_configs(
        &self,
        label_selector: &str,
    ) -> Result<Vec<DeploymentConfig>, ClusterError> {
        self.record(format!("list_deployment_configs:{}", label_selector));
        let state = self.state.lock().unwrap();
        Ok(state
            .deployment_configs
            .values()
            .filter(|dc| selector_matches(label_selector, dc.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn scale_deployment_config(
        &self,
        name: &str,
        replicas: i32,
    ) -> Result<(), ClusterError> {
        self.record(format!("scale:{}:{}", name, replicas));
        let mut state = self.state.lock().unwrap();
        let dc = state
            .deployment_configs
            .get_mut(name)
            .ok_or_else(|| ClusterError::NotFound(name.to_string()))?;
        dc.spec.replicas = replicas;
        Ok(())
    }

    async fn list_replication_controllers(
        &self,
        label_selector: &str,
    ) -> Result<Vec<ReplicationController>, ClusterError> {
        self.record(format!("list_replication_controllers:{}", label_selector));
        let state = self.state.lock().unwrap();
        Ok(state
            .replication_controllers
            .values()
            .filter(|rc| selector_matches(label_selector, rc.metadata.labels.as_ref()))
            .cloned()
            .collect())
    }

    async fn delete(&self, kind: ObjectKind, name: &str) -> Result<(), ClusterError> {
        self.record(format!("delete:{}:{}", kind, name));
        let mut state = self.state.lock().unwrap();
        match kind {
            ObjectKind::Secret => remove(&mut state.secrets, name),
            ObjectKind::ConfigMap => remove(&mut state.config_maps, name),
            ObjectKind::Service => remove(&mut state.services, name),
            ObjectKind::DeploymentConfig => remove(&mut state.deployment_configs, name),
            ObjectKind::ReplicationController => {
                remove(&mut state.replication_controllers, name)
            }
        }
    }

    async fn get_resource_quota(&self, name: &str) -> Result<Option<ResourceQuota>, ClusterError> {
        self.record(format!("get_resource_quota:{}", name));
        let mut state = self.state.lock().unwrap();
        let Some((quota_name, quotas)) = state.quota.as_mut() else {
            return Ok(None);
        };
        if quota_name != name {
            return Ok(None);
        }
        if quotas.len() > 1 {
            return Ok(quotas.pop_front());
        }
        Ok(quotas.front().cloned())
    }
}

/// Hands out a fixed [`FakeCluster`] per API surface
#[derive(Default)]
pub struct FakeConnector {
    clusters: HashMap<&'static str, Arc<FakeCluster>>,
    connects: Mutex<Vec<ApiSurface>>,
}

impl FakeConnector {
    pub fn new(v3: Arc<FakeCluster>, v4: Arc<FakeCluster>) -> Self {
        Self {
            clusters: HashMap::from([("v3", v3), ("v4", v4)]),
            connects: Mutex::new(Vec::new()),
        }
    }

    pub fn connects(&self) -> Vec<ApiSurface> {
        self.connects.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        surface: ApiSurface,
    ) -> Result<Arc<dyn ClusterConnection>, ClusterError> {
        self.connects.lock().unwrap().push(surface);
        let key = match surface {
            ApiSurface::V3 => "v3",
            ApiSurface::V4 => "v4",
        };
        let cluster = self
            .clusters
            .get(key)
            .cloned()
            .ok_or_else(|| ClusterError::ConnectionUndetectable(key.to_string()))?;
        let connection: Arc<dyn ClusterConnection> = cluster;
        Ok(connection)
    }
}
