//! Source qualification
//!
//! A topology source becomes a collector only when every linked resource is
//! present. Each step either yields the next piece of the record or a
//! [`Disqualified`] reason; the pipeline stops at the first reason.

use crate::collector::{CollectorDefinition, CollectorDefinitions, CollectorRecord, CollectorSecret};
use crate::inventory::{Inventory, InventoryError};
use crate::models::{Authentication, Endpoint, Source, SourceType};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Why a source does not get a collector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disqualified {
    /// The sources service no longer knows the source
    SourceMissing,
    /// The source references a source type that was not listed
    UnknownSourceType,
    NoCollectorDefinition,
    NoSupportedApplication,
    NoEndpoint,
    NoAuthentication,
    /// The unmasked authentication could not be fetched
    PasswordUnavailable,
}

impl Disqualified {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disqualified::SourceMissing => "source_missing",
            Disqualified::UnknownSourceType => "unknown_source_type",
            Disqualified::NoCollectorDefinition => "no_collector_definition",
            Disqualified::NoSupportedApplication => "no_supported_application",
            Disqualified::NoEndpoint => "no_endpoint",
            Disqualified::NoAuthentication => "no_authentication",
            Disqualified::PasswordUnavailable => "password_unavailable",
        }
    }
}

impl fmt::Display for Disqualified {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Qualification {
    Qualified(Box<CollectorRecord>),
    Disqualified(Disqualified),
}

/// Everything qualification needs that is shared by a tenant's sources
pub struct TenantScope<'a> {
    pub tenant: &'a str,
    pub image_namespace: &'a str,
    pub source_types: &'a HashMap<String, SourceType>,
    pub definitions: &'a CollectorDefinitions,
    /// Ids of sources with at least one supported application
    pub sources_with_applications: &'a HashSet<String>,
}

/// Resolve the collector definition for a source's type
pub fn collector_definition<'a>(
    source: &Source,
    source_types: &HashMap<String, SourceType>,
    definitions: &'a CollectorDefinitions,
) -> Result<&'a CollectorDefinition, Disqualified> {
    let source_type = source
        .source_type_id
        .as_ref()
        .and_then(|id| source_types.get(id))
        .ok_or(Disqualified::UnknownSourceType)?;

    definitions
        .get(&source_type.name)
        .ok_or(Disqualified::NoCollectorDefinition)
}

pub fn has_supported_application(
    source: &Source,
    sources_with_applications: &HashSet<String>,
) -> Result<(), Disqualified> {
    if sources_with_applications.contains(&source.id) {
        Ok(())
    } else {
        Err(Disqualified::NoSupportedApplication)
    }
}

pub fn first_endpoint(endpoints: Vec<Endpoint>) -> Result<Endpoint, Disqualified> {
    endpoints.into_iter().next().ok_or(Disqualified::NoEndpoint)
}

pub fn first_authentication(
    authentications: Vec<Authentication>,
) -> Result<Authentication, Disqualified> {
    authentications
        .into_iter()
        .next()
        .ok_or(Disqualified::NoAuthentication)
}

pub fn build_record(
    source: &Source,
    definition: &CollectorDefinition,
    endpoint: &Endpoint,
    authentication: &Authentication,
    tenant: &str,
    image_namespace: &str,
) -> CollectorRecord {
    CollectorRecord {
        endpoint_host: endpoint.host.clone(),
        endpoint_path: endpoint.path.clone(),
        endpoint_port: endpoint.port.clone(),
        endpoint_scheme: endpoint.scheme.clone(),
        image: definition.image.clone(),
        image_namespace: image_namespace.to_string(),
        source_id: source.id.clone(),
        source_uid: source.uid.clone(),
        secret: CollectorSecret {
            password: authentication.password.clone(),
            username: authentication.username.clone(),
        },
        tenant: tenant.to_string(),
        source_type: definition.source_type.clone(),
    }
}

macro_rules! qualify_step {
    ($step:expr) => {
        match $step {
            Ok(value) => value,
            Err(reason) => return Ok(Qualification::Disqualified(reason)),
        }
    };
}

/// Run the full qualification pipeline for one topology source
///
/// Inventory transport errors abort; missing resources disqualify.
pub async fn qualify(
    inventory: &dyn Inventory,
    scope: &TenantScope<'_>,
    source_id: &str,
) -> Result<Qualification, InventoryError> {
    let tenant = scope.tenant;

    let source = qualify_step!(inventory
        .source(source_id, tenant)
        .await?
        .ok_or(Disqualified::SourceMissing));
    let definition = qualify_step!(collector_definition(
        &source,
        scope.source_types,
        scope.definitions
    ));
    qualify_step!(has_supported_application(
        &source,
        scope.sources_with_applications
    ));

    let endpoint = qualify_step!(first_endpoint(
        inventory.source_endpoints(&source.id, tenant).await?
    ));
    let authentication = qualify_step!(first_authentication(
        inventory
            .endpoint_authentications(&endpoint.id, tenant)
            .await?
    ));
    let authentication = qualify_step!(inventory
        .authentication_with_password(&authentication.id, tenant)
        .await?
        .ok_or(Disqualified::PasswordUnavailable));

    Ok(Qualification::Qualified(Box::new(build_record(
        &source,
        definition,
        &endpoint,
        &authentication,
        tenant,
        scope.image_namespace,
    ))))
}
