//! Namespace resource quota admission
//!
//! Dimensions are checked in a fixed order (cpu limit, cpu request, memory
//! limit, memory request) and the first one that would be exceeded is
//! reported.

use super::quantity::{parse_bytes, parse_cpu_millis};
use super::ClusterError;
use k8s_openapi::api::core::v1::{Container, ResourceQuota};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// One quota-constrained resource dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaDimension {
    CpuLimit,
    CpuRequest,
    MemoryLimit,
    MemoryRequest,
}

impl QuotaDimension {
    /// Order dimensions are admitted in
    pub const CHECK_ORDER: [QuotaDimension; 4] = [
        QuotaDimension::CpuLimit,
        QuotaDimension::CpuRequest,
        QuotaDimension::MemoryLimit,
        QuotaDimension::MemoryRequest,
    ];

    /// Key of this dimension in a ResourceQuota's `hard`/`used` maps
    pub fn quota_key(&self) -> &'static str {
        match self {
            QuotaDimension::CpuLimit => "limits.cpu",
            QuotaDimension::CpuRequest => "requests.cpu",
            QuotaDimension::MemoryLimit => "limits.memory",
            QuotaDimension::MemoryRequest => "requests.memory",
        }
    }

    fn is_cpu(&self) -> bool {
        matches!(self, QuotaDimension::CpuLimit | QuotaDimension::CpuRequest)
    }

    fn parse(&self, quantity: &Quantity) -> Result<u64, ClusterError> {
        if self.is_cpu() {
            parse_cpu_millis(&quantity.0)
        } else {
            parse_bytes(&quantity.0)
        }
    }
}

impl fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.quota_key())
    }
}

/// Admission refused because a dimension would exceed its hard cap
///
/// Cpu amounts are millicores, memory amounts are bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaExceeded {
    #[error("cpu limit quota exceeded: {used}m used + {requested}m requested > {hard}m")]
    CpuLimit { used: u64, requested: u64, hard: u64 },

    #[error("cpu request quota exceeded: {used}m used + {requested}m requested > {hard}m")]
    CpuRequest { used: u64, requested: u64, hard: u64 },

    #[error("memory limit quota exceeded: {used} used + {requested} requested > {hard} bytes")]
    MemoryLimit { used: u64, requested: u64, hard: u64 },

    #[error("memory request quota exceeded: {used} used + {requested} requested > {hard} bytes")]
    MemoryRequest { used: u64, requested: u64, hard: u64 },
}

impl QuotaExceeded {
    fn new(dimension: QuotaDimension, used: u64, requested: u64, hard: u64) -> Self {
        match dimension {
            QuotaDimension::CpuLimit => QuotaExceeded::CpuLimit { used, requested, hard },
            QuotaDimension::CpuRequest => QuotaExceeded::CpuRequest { used, requested, hard },
            QuotaDimension::MemoryLimit => QuotaExceeded::MemoryLimit { used, requested, hard },
            QuotaDimension::MemoryRequest => QuotaExceeded::MemoryRequest { used, requested, hard },
        }
    }

    pub fn dimension(&self) -> QuotaDimension {
        match self {
            QuotaExceeded::CpuLimit { .. } => QuotaDimension::CpuLimit,
            QuotaExceeded::CpuRequest { .. } => QuotaDimension::CpuRequest,
            QuotaExceeded::MemoryLimit { .. } => QuotaDimension::MemoryLimit,
            QuotaExceeded::MemoryRequest { .. } => QuotaDimension::MemoryRequest,
        }
    }
}

/// Resources requested by a set of containers, per dimension
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceAmounts {
    pub cpu_limit_millis: u64,
    pub cpu_request_millis: u64,
    pub memory_limit_bytes: u64,
    pub memory_request_bytes: u64,
}

impl ResourceAmounts {
    /// Sum the limits and requests declared by `containers`
    pub fn from_containers(containers: &[Container]) -> Result<Self, ClusterError> {
        let mut amounts = ResourceAmounts::default();

        for container in containers {
            let Some(resources) = container.resources.as_ref() else {
                continue;
            };
            let empty = BTreeMap::new();
            let limits = resources.limits.as_ref().unwrap_or(&empty);
            let requests = resources.requests.as_ref().unwrap_or(&empty);

            if let Some(q) = limits.get("cpu") {
                amounts.cpu_limit_millis = amounts
                    .cpu_limit_millis
                    .saturating_add(parse_cpu_millis(&q.0)?);
            }
            if let Some(q) = requests.get("cpu") {
                amounts.cpu_request_millis = amounts
                    .cpu_request_millis
                    .saturating_add(parse_cpu_millis(&q.0)?);
            }
            if let Some(q) = limits.get("memory") {
                amounts.memory_limit_bytes = amounts
                    .memory_limit_bytes
                    .saturating_add(parse_bytes(&q.0)?);
            }
            if let Some(q) = requests.get("memory") {
                amounts.memory_request_bytes = amounts
                    .memory_request_bytes
                    .saturating_add(parse_bytes(&q.0)?);
            }
        }

        Ok(amounts)
    }

    pub fn get(&self, dimension: QuotaDimension) -> u64 {
        match dimension {
            QuotaDimension::CpuLimit => self.cpu_limit_millis,
            QuotaDimension::CpuRequest => self.cpu_request_millis,
            QuotaDimension::MemoryLimit => self.memory_limit_bytes,
            QuotaDimension::MemoryRequest => self.memory_request_bytes,
        }
    }
}

/// Parsed `hard` and `used` amounts of a ResourceQuota
///
/// A dimension without a hard cap is unconstrained; a dimension without a
/// used amount counts as unused.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaUsage {
    hard: BTreeMap<&'static str, u64>,
    used: BTreeMap<&'static str, u64>,
}

impl QuotaUsage {
    pub fn from_quota(quota: &ResourceQuota) -> Result<Self, ClusterError> {
        let empty = BTreeMap::new();
        let status = quota.status.as_ref();
        let hard = status.and_then(|s| s.hard.as_ref()).unwrap_or(&empty);
        let used = status.and_then(|s| s.used.as_ref()).unwrap_or(&empty);

        let mut usage = QuotaUsage::default();
        for dimension in QuotaDimension::CHECK_ORDER {
            let key = dimension.quota_key();
            if let Some(q) = hard.get(key) {
                usage.hard.insert(key, dimension.parse(q)?);
            }
            if let Some(q) = used.get(key) {
                usage.used.insert(key, dimension.parse(q)?);
            }
        }

        Ok(usage)
    }

    pub fn hard(&self, dimension: QuotaDimension) -> Option<u64> {
        self.hard.get(dimension.quota_key()).copied()
    }

    pub fn used(&self, dimension: QuotaDimension) -> u64 {
        self.used.get(dimension.quota_key()).copied().unwrap_or(0)
    }

    /// Admit `requested` or report the first dimension it would exceed
    pub fn admit(&self, requested: &ResourceAmounts) -> Result<(), QuotaExceeded> {
        for dimension in QuotaDimension::CHECK_ORDER {
            let Some(hard) = self.hard(dimension) else {
                continue;
            };
            let used = self.used(dimension);
            let wanted = requested.get(dimension);

            if used.saturating_add(wanted) > hard {
                return Err(QuotaExceeded::new(dimension, used, wanted, hard));
            }
        }

        Ok(())
    }
}
