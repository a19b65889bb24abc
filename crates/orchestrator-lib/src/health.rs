//! Component health behind the orchestrator's liveness and readiness probes
//!
//! The reconciliation worker and the metric scaler report after every pass;
//! the binary reports the cluster connection once at startup. Overall health
//! is the worst component status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Component names for health tracking
pub mod components {
    pub const WORKER: &str = "worker";
    pub const METRIC_SCALER: &str = "metric_scaler";
    pub const CLUSTER: &str = "cluster";
    pub const INVENTORY: &str = "inventory";

    pub const ALL: [&str; 4] = [WORKER, METRIC_SCALER, CLUSTER, INVENTORY];
}

/// Ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last pass failed; the loop keeps running
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    /// Anything short of unhealthy keeps the liveness probe green
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failed reports since the last healthy one
    pub consecutive_failures: u32,
    pub updated_at: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            consecutive_failures: 0,
            updated_at: Utc::now(),
        }
    }

    fn failing(previous: Option<&ComponentHealth>, status: ComponentStatus, message: String) -> Self {
        Self {
            status,
            message: Some(message),
            consecutive_failures: previous.map_or(0, |p| p.consecutive_failures) + 1,
            updated_at: Utc::now(),
        }
    }
}

/// Body of `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    fn from_components(components: HashMap<String, ComponentHealth>) -> Self {
        let status = components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy);
        Self { status, components }
    }

    /// Names of unhealthy components, sorted
    pub fn unhealthy(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .components
            .iter()
            .filter(|(_, c)| c.status == ComponentStatus::Unhealthy)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

/// Body of `GET /readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Default)]
struct RegistryState {
    components: HashMap<String, ComponentHealth>,
    /// Set once the cluster API surface has been detected
    ready: bool,
}

/// Shared, cloneable view of every component's health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Register every orchestrator component as healthy
    pub async fn register_all(&self) {
        let mut state = self.state.write().await;
        for name in components::ALL {
            state
                .components
                .insert(name.to_string(), ComponentHealth::healthy());
        }
    }

    pub async fn set_healthy(&self, name: &str) {
        self.state
            .write()
            .await
            .components
            .insert(name.to_string(), ComponentHealth::healthy());
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.fail(name, ComponentStatus::Degraded, message.into()).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.fail(name, ComponentStatus::Unhealthy, message.into()).await;
    }

    async fn fail(&self, name: &str, status: ComponentStatus, message: String) {
        let mut state = self.state.write().await;
        let health = ComponentHealth::failing(state.components.get(name), status, message);
        state.components.insert(name.to_string(), health);
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        HealthResponse::from_components(self.state.read().await.components.clone())
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let (ready, health) = {
            let state = self.state.read().await;
            (
                state.ready,
                HealthResponse::from_components(state.components.clone()),
            )
        };

        let reason = if !ready {
            Some("Cluster connection not yet detected".to_string())
        } else {
            let unhealthy = health.unhealthy();
            (!unhealthy.is_empty())
                .then(|| format!("Unhealthy components: {}", unhealthy.join(", ")))
        };

        ReadinessResponse {
            ready: reason.is_none(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_registry_is_healthy_but_not_ready() {
        let registry = HealthRegistry::new();

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Cluster connection not yet detected")
        );
    }

    #[tokio::test]
    async fn test_register_all_components() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        let health = registry.health().await;
        assert_eq!(health.components.len(), components::ALL.len());
        for name in components::ALL {
            assert_eq!(health.components[name].status, ComponentStatus::Healthy);
        }
    }

    #[tokio::test]
    async fn test_failed_passes_are_counted_until_recovery() {
        let registry = HealthRegistry::new();
        registry.register_all().await;

        registry
            .set_degraded(components::WORKER, "inventory unreachable")
            .await;
        registry
            .set_degraded(components::WORKER, "inventory unreachable")
            .await;

        let health = registry.health().await;
        let worker = &health.components[components::WORKER];
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(worker.message.as_deref(), Some("inventory unreachable"));
        assert_eq!(worker.consecutive_failures, 2);

        registry.set_healthy(components::WORKER).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Healthy);
        assert_eq!(health.components[components::WORKER].consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry.set_degraded(components::METRIC_SCALER, "list failed").await;
        registry.set_unhealthy(components::CLUSTER, "no API").await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Unhealthy);
        assert!(!health.status.is_operational());
    }

    #[tokio::test]
    async fn test_degraded_component_keeps_readiness() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry.set_ready(true).await;
        registry.set_degraded(components::WORKER, "pass failed").await;

        let readiness = registry.readiness().await;
        assert!(readiness.ready);
        assert!(readiness.reason.is_none());
    }

    #[tokio::test]
    async fn test_readiness_names_unhealthy_components() {
        let registry = HealthRegistry::new();
        registry.register_all().await;
        registry.set_ready(true).await;
        registry.set_unhealthy(components::INVENTORY, "down").await;
        registry.set_unhealthy(components::CLUSTER, "connection lost").await;

        let readiness = registry.readiness().await;
        assert!(!readiness.ready);
        assert_eq!(
            readiness.reason.as_deref(),
            Some("Unhealthy components: cluster, inventory")
        );
    }
}
