//! Collector orchestrator library
//!
//! This crate provides the core functionality for:
//! - Reading sources and their credentials from the inventory services
//! - Deriving content-addressed collector records
//! - Managing collector objects on OpenShift under a resource quota
//! - Reconciling desired collectors against the cluster
//! - Metric-driven scaling of collector workloads
//! - Health checks and observability

pub mod cluster;
pub mod collector;
pub mod health;
pub mod inventory;
pub mod models;
pub mod observability;
pub mod scaler;
pub mod worker;

#[cfg(test)]
mod testing;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{OrchestratorMetrics, StructuredLogger};
