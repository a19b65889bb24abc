//! Collector definitions and canonical collector records
//!
//! Maps source types to collector images and derives the content-addressed
//! record each collector workload is deployed from.

mod definitions;
mod record;

pub use definitions::{CollectorDefinition, CollectorDefinitions};
pub use record::{
    collector_labels, collector_selector, deployment_config_name, digest_selector, secret_name,
    CollectorRecord, CollectorSecret, COLLECTOR_DIGEST_LABEL, COLLECTOR_LABEL,
    SOURCE_TYPE_ANNOTATION,
};
