//! Orchestrator configuration

use anyhow::{bail, Context, Result};
use orchestrator_lib::cluster::{ContainerResources, ObjectManagerSettings};
use serde::Deserialize;
use std::time::Duration;

const SERVICE_ACCOUNT_NAMESPACE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Orchestrator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Tag of every collector image
    #[serde(default = "default_collector_image_tag")]
    pub collector_image_tag: String,

    /// Public sources API base URL
    #[serde(default)]
    pub sources_api: Option<String>,

    /// Public topology API base URL
    #[serde(default)]
    pub topology_api: Option<String>,

    /// Registry namespace collector images are pulled from
    #[serde(default = "default_image_namespace")]
    pub image_namespace: String,

    #[serde(default = "default_ingress_api_host")]
    pub ingress_api_host: String,

    #[serde(default = "default_ingress_api_port")]
    pub ingress_api_port: String,

    /// Namespace the collectors live in
    #[serde(default = "default_namespace")]
    pub namespace: Option<String>,

    #[serde(default = "default_resource_quota_name")]
    pub resource_quota_name: String,

    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,

    #[serde(default = "default_scaler_interval")]
    pub scaler_interval_secs: u64,

    /// Prometheus HTTP API base URL for collector usage metrics
    #[serde(default = "default_metrics_url")]
    pub metrics_url: String,

    /// Timeout of inventory and metrics requests
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// API server port for health/metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: String,

    #[serde(default = "default_cpu_request")]
    pub cpu_request: String,

    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,

    #[serde(default = "default_memory_request")]
    pub memory_request: String,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn default_collector_image_tag() -> String {
    "latest".to_string()
}

fn default_image_namespace() -> String {
    env_or("IMAGE_NAMESPACE", "buildfactory")
}

fn default_ingress_api_host() -> String {
    env_or("TOPOLOGICAL_INVENTORY_INGRESS_API_SERVICE_HOST", "localhost")
}

fn default_ingress_api_port() -> String {
    env_or("TOPOLOGICAL_INVENTORY_INGRESS_API_SERVICE_PORT", "9292")
}

fn default_namespace() -> Option<String> {
    std::env::var("MY_NAMESPACE")
        .ok()
        .or_else(|| std::fs::read_to_string(SERVICE_ACCOUNT_NAMESPACE).ok())
        .map(|ns| ns.trim().to_string())
        .filter(|ns| !ns.is_empty())
}

fn default_resource_quota_name() -> String {
    "compute-resources-non-terminating".to_string()
}

fn default_reconcile_interval() -> u64 {
    10
}

fn default_scaler_interval() -> u64 {
    10
}

fn default_metrics_url() -> String {
    "http://prometheus:9090".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_api_port() -> u16 {
    8080
}

fn default_cpu_limit() -> String {
    "100m".to_string()
}

fn default_cpu_request() -> String {
    "50m".to_string()
}

fn default_memory_limit() -> String {
    "500Mi".to_string()
}

fn default_memory_request() -> String {
    "200Mi".to_string()
}

impl OrchestratorConfig {
    /// Load configuration from `ORCHESTRATOR_*` environment variables
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::with_prefix("ORCHESTRATOR"))
    }

    pub fn from_environment(environment: config::Environment) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(environment)
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("ORCHESTRATOR_SOURCES_API", &self.sources_api),
            ("ORCHESTRATOR_TOPOLOGY_API", &self.topology_api),
        ] {
            match value.as_deref() {
                Some(url) if !url.trim().is_empty() => {
                    url::Url::parse(url).with_context(|| format!("{} is not a valid URL", name))?;
                }
                _ => bail!("{} must be set to the service's base URL", name),
            }
        }

        if self.namespace.is_none() {
            bail!("ORCHESTRATOR_NAMESPACE or MY_NAMESPACE must name the collector namespace");
        }
        if self.reconcile_interval_secs == 0 || self.scaler_interval_secs == 0 {
            bail!("loop intervals must be at least one second");
        }
        Ok(())
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or_default()
    }

    pub fn sources_api(&self) -> &str {
        self.sources_api.as_deref().unwrap_or_default()
    }

    pub fn topology_api(&self) -> &str {
        self.topology_api.as_deref().unwrap_or_default()
    }

    /// `http://host:port` handed to collectors
    pub fn ingress_api(&self) -> String {
        format!("http://{}:{}", self.ingress_api_host, self.ingress_api_port)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }

    pub fn scaler_interval(&self) -> Duration {
        Duration::from_secs(self.scaler_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn object_manager_settings(&self) -> ObjectManagerSettings {
        ObjectManagerSettings {
            resource_quota_name: self.resource_quota_name.clone(),
            container_resources: ContainerResources {
                cpu_limit: self.cpu_limit.clone(),
                cpu_request: self.cpu_request.clone(),
                memory_limit: self.memory_limit.clone(),
                memory_request: self.memory_request.clone(),
            },
        }
    }
}
