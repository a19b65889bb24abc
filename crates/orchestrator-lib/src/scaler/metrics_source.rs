//! Percent-usage signal for a collector workload

use super::ScalingConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum MetricsSourceError {
    #[error("invalid metrics url: {0}")]
    Url(#[from] url::ParseError),

    #[error("metrics request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("metrics query {query:?} failed with status {status}")]
    Status { query: String, status: u16 },

    #[error("metrics query {query:?} was rejected: {message}")]
    Query { query: String, message: String },
}

/// Source of the usage signal the watchers scale on
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Usage of `deployment_config` as a percentage of its capacity, or
    /// `None` when no sample is available
    async fn percent_usage(
        &self,
        deployment_config: &str,
        config: &ScalingConfig,
    ) -> Result<Option<f64>, MetricsSourceError>;
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<VectorSample>,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    /// `[timestamp, "value"]`
    value: (f64, String),
}

/// Prometheus HTTP API backed [`MetricsSource`]
///
/// Both metrics are summed over the workload's pods, selected by the
/// `deploymentconfig` label OpenShift puts on them.
#[derive(Clone)]
pub struct PrometheusMetricsSource {
    client: Client,
    query_url: Url,
}

impl PrometheusMetricsSource {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, MetricsSourceError> {
        let query_url = Url::parse(base_url)?.join("api/v1/query")?;
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self { client, query_url })
    }

    async fn sum(
        &self,
        metric: &str,
        deployment_config: &str,
    ) -> Result<Option<f64>, MetricsSourceError> {
        let query = format!(
            "sum({}{{deploymentconfig=\"{}\"}})",
            metric, deployment_config
        );

        let response = self
            .client
            .get(self.query_url.clone())
            .query(&[("query", query.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetricsSourceError::Status {
                query,
                status: status.as_u16(),
            });
        }

        let body: QueryResponse = response.json().await?;
        if body.status != "success" {
            return Err(MetricsSourceError::Query {
                query,
                message: body.error.unwrap_or(body.status),
            });
        }

        let value = body
            .data
            .and_then(|d| d.result.into_iter().next())
            .and_then(|sample| sample.value.1.parse::<f64>().ok())
            .filter(|v| v.is_finite());

        debug!(query = %query, value = ?value, "Queried metric");
        Ok(value)
    }
}

#[async_trait]
impl MetricsSource for PrometheusMetricsSource {
    async fn percent_usage(
        &self,
        deployment_config: &str,
        config: &ScalingConfig,
    ) -> Result<Option<f64>, MetricsSourceError> {
        let Some(current) = self.sum(&config.current_metric, deployment_config).await? else {
            return Ok(None);
        };
        let Some(max) = self.sum(&config.max_metric, deployment_config).await? else {
            return Ok(None);
        };

        if max <= 0.0 {
            return Ok(None);
        }
        Ok(Some(100.0 * current / max))
    }
}
