//! HTTP client for the sources and topology inventory services

use super::{Inventory, InventoryError, ORCHESTRATOR_TENANT};
use crate::models::{
    Application, ApplicationType, Authentication, Endpoint, RefreshStatus, Source, SourceType,
    Tenant, TopologySource,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Header carrying the tenant identity on every inventory request
pub const IDENTITY_HEADER: &str = "x-rh-identity";

const INTERNAL_API_PATH: &str = "/internal/v1.0";

/// Configuration for the inventory client
#[derive(Debug, Clone)]
pub struct InventoryClientConfig {
    /// Public sources API base, e.g. `http://sources-api:8080/api/v1.0`
    pub sources_api: String,
    /// Public topology API base, e.g. `http://topology-api:8080/api/v1.0`
    pub topology_api: String,
    /// Per-request timeout
    pub request_timeout: Duration,
}

/// Base64-encoded identity naming the account a request is made for
pub fn identity_header(tenant: &str) -> String {
    let identity = serde_json::json!({ "identity": { "account_number": tenant } });
    BASE64.encode(identity.to_string())
}

/// One page of an inventory listing
///
/// Listings are either paginated objects or bare arrays; a bare array is
/// always complete.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Paged {
        data: Vec<T>,
        #[serde(default)]
        links: Option<Links>,
    },
    Complete(Vec<T>),
}

#[derive(Debug, Deserialize)]
struct Links {
    #[serde(default)]
    next: Option<String>,
}

/// Inventory client backed by the services' REST APIs
pub struct InventoryClient {
    client: Client,
    sources_api: Url,
    sources_internal_api: Url,
    topology_api: Url,
    topology_internal_api: Url,
}

impl InventoryClient {
    pub fn new(config: InventoryClientConfig) -> Result<Self, InventoryError> {
        let client = Client::builder().timeout(config.request_timeout).build()?;

        let sources_api = Url::parse(&config.sources_api)?;
        let topology_api = Url::parse(&config.topology_api)?;

        Ok(Self {
            client,
            sources_internal_api: internal_api(&sources_api),
            topology_internal_api: internal_api(&topology_api),
            sources_api,
            topology_api,
        })
    }

    pub fn sources_internal_api(&self) -> &Url {
        &self.sources_internal_api
    }

    pub fn topology_internal_api(&self) -> &Url {
        &self.topology_internal_api
    }

    /// GET a single resource; `None` on not-found
    async fn get_and_parse<T: DeserializeOwned>(
        &self,
        url: Url,
        tenant: &str,
    ) -> Result<Option<T>, InventoryError> {
        debug!(url = %url, tenant = %tenant, "GET");

        let response = self
            .client
            .get(url.clone())
            .header(IDENTITY_HEADER, identity_header(tenant))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| InventoryError::Decode {
                url: url.to_string(),
                source,
            })
    }

    /// Collect every item of a listing, following `links.next`
    async fn resources<T: DeserializeOwned>(
        &self,
        url: Url,
        tenant: &str,
    ) -> Result<Vec<T>, InventoryError> {
        let mut items = Vec::new();
        let mut fetched = HashSet::new();
        let mut next = Some(url);

        while let Some(url) = next.take() {
            fetched.insert(url.clone());
            let Some(page) = self.get_and_parse::<Listing<T>>(url.clone(), tenant).await? else {
                break;
            };

            match page {
                Listing::Complete(data) => items.extend(data),
                Listing::Paged { data, links } => {
                    items.extend(data);

                    if let Some(link) = links.and_then(|l| l.next) {
                        let next_url = url.join(&link)?;
                        if fetched.contains(&next_url) {
                            warn!(
                                url = %url,
                                next = %next_url,
                                "Pagination link points at an already fetched page"
                            );
                        } else {
                            next = Some(next_url);
                        }
                    }
                }
            }
        }

        Ok(items)
    }
}

#[async_trait]
impl Inventory for InventoryClient {
    async fn tenants(&self) -> Result<Vec<String>, InventoryError> {
        let url = url_for(&self.topology_internal_api, &["tenants"])?;
        let tenants: Vec<Tenant> = self.resources(url, ORCHESTRATOR_TENANT).await?;
        Ok(tenants.into_iter().map(|t| t.external_tenant).collect())
    }

    async fn source_types(&self) -> Result<Vec<SourceType>, InventoryError> {
        let url = url_for(&self.sources_api, &["source_types"])?;
        self.resources(url, ORCHESTRATOR_TENANT).await
    }

    async fn application_types(&self) -> Result<Vec<ApplicationType>, InventoryError> {
        let url = url_for(&self.sources_api, &["application_types"])?;
        self.resources(url, ORCHESTRATOR_TENANT).await
    }

    async fn applications(
        &self,
        application_type_ids: &[String],
        tenant: &str,
    ) -> Result<Vec<Application>, InventoryError> {
        // An unfiltered query would match every application
        if application_type_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut url = url_for(&self.sources_api, &["applications"])?;
        {
            let mut query = url.query_pairs_mut();
            for id in application_type_ids {
                query.append_pair("filter[application_type_id][eq]", id);
            }
        }

        self.resources(url, tenant).await
    }

    async fn topology_sources(&self, tenant: &str) -> Result<Vec<TopologySource>, InventoryError> {
        let url = url_for(&self.topology_api, &["sources"])?;
        self.resources(url, tenant).await
    }

    async fn source(&self, id: &str, tenant: &str) -> Result<Option<Source>, InventoryError> {
        let url = url_for(&self.sources_api, &["sources", id])?;
        self.get_and_parse(url, tenant).await
    }

    async fn source_endpoints(
        &self,
        source_id: &str,
        tenant: &str,
    ) -> Result<Vec<Endpoint>, InventoryError> {
        let url = url_for(&self.sources_api, &["sources", source_id, "endpoints"])?;
        self.resources(url, tenant).await
    }

    async fn endpoint_authentications(
        &self,
        endpoint_id: &str,
        tenant: &str,
    ) -> Result<Vec<Authentication>, InventoryError> {
        let url = url_for(
            &self.sources_api,
            &["endpoints", endpoint_id, "authentications"],
        )?;
        self.resources(url, tenant).await
    }

    async fn authentication_with_password(
        &self,
        id: &str,
        tenant: &str,
    ) -> Result<Option<Authentication>, InventoryError> {
        let mut url = url_for(&self.sources_internal_api, &["authentications", id])?;
        url.query_pairs_mut()
            .append_pair("expose_encrypted_attribute[]", "password");

        self.get_and_parse(url, tenant).await
    }

    async fn update_refresh_status(
        &self,
        source_id: &str,
        tenant: &str,
        status: RefreshStatus,
    ) -> Result<bool, InventoryError> {
        let url = url_for(&self.topology_internal_api, &["sources", source_id])?;
        debug!(url = %url, tenant = %tenant, refresh_status = status.as_str(), "PATCH");

        let response = self
            .client
            .patch(url.clone())
            .header(IDENTITY_HEADER, identity_header(tenant))
            .json(&serde_json::json!({ "refresh_status": status }))
            .send()
            .await?;

        let code = response.status();
        if code == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !code.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::Status {
                url: url.to_string(),
                status: code.as_u16(),
                body,
            });
        }

        Ok(true)
    }
}

/// Same host as `api`, rooted at the internal API path
fn internal_api(api: &Url) -> Url {
    let mut internal = api.clone();
    internal.set_path(INTERNAL_API_PATH);
    internal.set_query(None);
    internal
}

/// Append path segments to a base URL
fn url_for(base: &Url, segments: &[&str]) -> Result<Url, InventoryError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| InventoryError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
