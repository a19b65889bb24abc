//! Static source-type to collector image mapping

use std::collections::BTreeMap;

/// Source types that have a collector image
const SUPPORTED_SOURCE_TYPES: &[&str] = &["amazon", "ansible-tower", "openshift"];

/// Image used to collect from one source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorDefinition {
    pub source_type: String,
    pub image: String,
}

/// Name-indexed collector definitions, built once at startup
#[derive(Debug, Clone)]
pub struct CollectorDefinitions {
    by_source_type: BTreeMap<String, CollectorDefinition>,
}

impl CollectorDefinitions {
    /// Build the allow-list for a given image tag
    pub fn new(image_tag: &str) -> Self {
        let by_source_type = SUPPORTED_SOURCE_TYPES
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    CollectorDefinition {
                        source_type: name.to_string(),
                        image: format!("topological-inventory-{}:{}", name, image_tag),
                    },
                )
            })
            .collect();

        Self { by_source_type }
    }

    pub fn get(&self, source_type: &str) -> Option<&CollectorDefinition> {
        self.by_source_type.get(source_type)
    }

    pub fn source_types(&self) -> impl Iterator<Item = &str> {
        self.by_source_type.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definitions_use_image_tag() {
        let definitions = CollectorDefinitions::new("abc123");

        let tower = definitions.get("ansible-tower").unwrap();
        assert_eq!(tower.image, "topological-inventory-ansible-tower:abc123");
        assert_eq!(
            definitions.get("openshift").unwrap().image,
            "topological-inventory-openshift:abc123"
        );
    }

    #[test]
    fn test_unknown_source_type_has_no_definition() {
        let definitions = CollectorDefinitions::new("latest");
        assert!(definitions.get("azure").is_none());
        assert_eq!(definitions.source_types().count(), 3);
    }
}
