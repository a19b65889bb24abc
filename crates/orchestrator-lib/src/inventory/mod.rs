//! Read access to the sources and topology inventory services
//!
//! The reconciler depends on the [`Inventory`] trait; [`InventoryClient`]
//! is the HTTP implementation used in production.

mod client;


pub use client::{identity_header, InventoryClient, InventoryClientConfig, IDENTITY_HEADER};

use crate::models::{
    Application, ApplicationType, Authentication, Endpoint, RefreshStatus, Source, SourceType,
    TopologySource,
};
use async_trait::async_trait;
use thiserror::Error;

/// Account used for calls that are not scoped to a tenant
pub const ORCHESTRATOR_TENANT: &str = "system_orchestrator";

/// Application types whose sources need a collector
pub const SUPPORTED_APPLICATIONS: &[&str] = &[
    "/insights/platform/catalog",
    "/insights/platform/topological-inventory",
];

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("invalid inventory url: {0}")]
    Url(#[from] url::ParseError),

    #[error("inventory request to {url} failed with status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("inventory request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode inventory response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Tenant-scoped access to the inventory services
///
/// Lookups of a single resource return `None` when the service answers
/// not-found; listings of a missing parent return an empty list.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// External tenant identifiers known to the topology service
    async fn tenants(&self) -> Result<Vec<String>, InventoryError>;

    async fn source_types(&self) -> Result<Vec<SourceType>, InventoryError>;

    async fn application_types(&self) -> Result<Vec<ApplicationType>, InventoryError>;

    /// Applications of any of the given types visible to a tenant
    async fn applications(
        &self,
        application_type_ids: &[String],
        tenant: &str,
    ) -> Result<Vec<Application>, InventoryError>;

    /// Sources recorded by the topology service for a tenant
    async fn topology_sources(&self, tenant: &str) -> Result<Vec<TopologySource>, InventoryError>;

    async fn source(&self, id: &str, tenant: &str) -> Result<Option<Source>, InventoryError>;

    async fn source_endpoints(
        &self,
        source_id: &str,
        tenant: &str,
    ) -> Result<Vec<Endpoint>, InventoryError>;

    async fn endpoint_authentications(
        &self,
        endpoint_id: &str,
        tenant: &str,
    ) -> Result<Vec<Authentication>, InventoryError>;

    /// Authentication with its password unmasked
    async fn authentication_with_password(
        &self,
        id: &str,
        tenant: &str,
    ) -> Result<Option<Authentication>, InventoryError>;

    /// Report a source's refresh status; `Ok(false)` if the source is gone
    async fn update_refresh_status(
        &self,
        source_id: &str,
        tenant: &str,
        status: RefreshStatus,
    ) -> Result<bool, InventoryError>;

    /// Ids of the application types in [`SUPPORTED_APPLICATIONS`]
    async fn supported_application_type_ids(&self) -> Result<Vec<String>, InventoryError> {
        Ok(self
            .application_types()
            .await?
            .into_iter()
            .filter(|t| SUPPORTED_APPLICATIONS.contains(&t.name.as_str()))
            .map(|t| t.id)
            .collect())
    }
}
