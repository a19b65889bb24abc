//! Canonical collector records and their content digests
//!
//! A record captures every parameter a collector workload is deployed with.
//! Its digest is stored as a label on the workload and is the only link
//! between the inventory (desired state) and the cluster (actual state).

use k8s_openapi::api::core::v1::{EnvVar, EnvVarSource, SecretKeySelector};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224};
use std::collections::BTreeMap;

/// Label marking a DeploymentConfig as a managed collector
pub const COLLECTOR_LABEL: &str = "topological-inventory/collector";
/// Label holding the collector record digest
pub const COLLECTOR_DIGEST_LABEL: &str = "topological-inventory/collector_digest";
/// Annotation recording the source type a collector was created for
pub const SOURCE_TYPE_ANNOTATION: &str = "topological-inventory/source_type";

const DEPLOYMENT_NAME_PREFIX: &str = "topological-inventory-collector-source-";
const SECRET_NAME_SUFFIX: &str = "-secrets";

/// Credentials stored in the collector's Secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSecret {
    pub password: Option<String>,
    pub username: Option<String>,
}

impl CollectorSecret {
    /// Secret data as written to the cluster
    pub fn to_data(&self) -> BTreeMap<String, String> {
        let mut data = BTreeMap::new();
        data.insert(
            "password".to_string(),
            self.password.clone().unwrap_or_default(),
        );
        data.insert(
            "username".to_string(),
            self.username.clone().unwrap_or_default(),
        );
        data
    }
}

/// Everything a collector for one source is deployed with
///
/// Field order is part of the digest: the canonical encoding is the JSON
/// serialization of this struct in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorRecord {
    pub endpoint_host: Option<String>,
    pub endpoint_path: Option<String>,
    pub endpoint_port: Option<String>,
    pub endpoint_scheme: Option<String>,
    pub image: String,
    pub image_namespace: String,
    pub source_id: String,
    pub source_uid: Option<String>,
    pub secret: CollectorSecret,
    pub tenant: String,
    /// Used to tag object counters only; not part of the digest
    #[serde(skip)]
    pub source_type: String,
}

impl CollectorRecord {
    /// Hex SHA-224 of the canonical encoding
    ///
    /// 56 hex characters, inside the 63 character label value limit.
    pub fn digest(&self) -> String {
        // Serializing a struct of strings and options cannot fail
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha224::digest(&canonical))
    }

    pub fn deployment_config_name(&self) -> String {
        deployment_config_name(&self.source_id)
    }

    pub fn secret_name(&self) -> String {
        secret_name(&self.deployment_config_name())
    }

    /// Container environment for the collector
    pub fn container_environment(&self, ingress_api: &str) -> Vec<EnvVar> {
        let secret_name = self.secret_name();

        vec![
            secret_env("AUTH_PASSWORD", &secret_name, "password"),
            secret_env("AUTH_USERNAME", &secret_name, "username"),
            value_env("ENDPOINT_HOST", self.endpoint_host.clone()),
            value_env("ENDPOINT_PATH", self.endpoint_path.clone()),
            value_env("ENDPOINT_PORT", self.endpoint_port.clone()),
            value_env("ENDPOINT_SCHEME", self.endpoint_scheme.clone()),
            value_env("INGRESS_API", Some(ingress_api.to_string())),
            value_env("SOURCE_UID", self.source_uid.clone()),
        ]
    }
}

pub fn deployment_config_name(source_id: &str) -> String {
    format!("{}{}", DEPLOYMENT_NAME_PREFIX, source_id)
}

/// Name of the Secret paired with a DeploymentConfig
pub fn secret_name(deployment_config_name: &str) -> String {
    format!("{}{}", deployment_config_name, SECRET_NAME_SUFFIX)
}

/// Labels identifying a collector workload
pub fn collector_labels(digest: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(COLLECTOR_LABEL.to_string(), "true".to_string());
    labels.insert(COLLECTOR_DIGEST_LABEL.to_string(), digest.to_string());
    labels
}

/// Selector matching every collector workload
pub fn collector_selector() -> String {
    format!("{}=true", COLLECTOR_LABEL)
}

/// Selector matching the collector workload for one digest
pub fn digest_selector(digest: &str) -> String {
    format!("{}={}", COLLECTOR_DIGEST_LABEL, digest)
}

fn value_env(name: &str, value: Option<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value,
        value_from: None,
    }
}

fn secret_env(name: &str, secret_name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: Some(secret_name.to_string()),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
    }
}
