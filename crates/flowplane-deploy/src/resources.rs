//! Deployment resource bounds.
//!
//! Parsed from the `deployment_config` key of the (otherwise opaque)
//! version configuration document. Unknown keys are ignored; missing keys
//! fall back to defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// Concurrency and replica bounds applied to the deployed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentResources {
    /// Maximum concurrent requests per replica.
    pub concurrency: u32,
    /// Minimum replica count (the cluster target waits for this many
    /// ready replicas).
    pub min_replicas: u32,
    /// Maximum replica count.
    pub max_replicas: u32,
    /// CPU allocation in millicores.
    pub cpu_millicores: u32,
    /// Memory allocation in megabytes.
    pub memory_mb: u32,
}

impl Default for DeploymentResources {
    fn default() -> Self {
        Self {
            concurrency: 10,
            min_replicas: 1,
            max_replicas: 1,
            cpu_millicores: 1000,
            memory_mb: 1024,
        }
    }
}

impl DeploymentResources {
    /// Extract resource bounds from a version configuration document.
    #[must_use]
    pub fn from_version_config(config: &Json) -> Self {
        config
            .get("deployment_config")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_section_yields_defaults() {
        let resources = DeploymentResources::from_version_config(&json!({"nodes": []}));
        assert_eq!(resources, DeploymentResources::default());
    }

    #[test]
    fn partial_section_fills_defaults() {
        let config = json!({"deployment_config": {"concurrency": 4, "max_replicas": 3}});
        let resources = DeploymentResources::from_version_config(&config);
        assert_eq!(resources.concurrency, 4);
        assert_eq!(resources.max_replicas, 3);
        assert_eq!(resources.min_replicas, 1);
    }

    #[test]
    fn malformed_section_yields_defaults() {
        let config = json!({"deployment_config": "not an object"});
        let resources = DeploymentResources::from_version_config(&config);
        assert_eq!(resources, DeploymentResources::default());
    }
}
