//! Service name → base address lookup.
//!
//! A [`ServiceRegistry`] is assembled once at startup through
//! [`ServiceRegistryBuilder`] and is read-only afterwards, so it can be shared
//! behind an `Arc` by the resolver and every worker without locking.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Immutable mapping from service name to base network address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceRegistry {
    services: BTreeMap<String, String>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    /// Base address registered for `service`, if any.
    pub fn base_address(&self, service: &str) -> Option<&str> {
        self.services.get(service).map(String::as_str)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.services.contains_key(service)
    }

    /// `{base}/{action}` for a registered service.
    pub fn endpoint(&self, service: &str, action: &str) -> Option<String> {
        self.base_address(service)
            .map(|base| format!("{}/{}", base.trim_end_matches('/'), action))
    }

    pub fn services(&self) -> impl Iterator<Item = (&str, &str)> {
        self.services.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Collects registry entries from the configured sources. Later sources
/// override earlier ones.
#[derive(Debug, Default)]
pub struct ServiceRegistryBuilder {
    services: BTreeMap<String, String>,
}

impl ServiceRegistryBuilder {
    pub fn service(mut self, name: impl Into<String>, base: impl Into<String>) -> Self {
        self.services.insert(name.into(), base.into());
        self
    }

    /// Merge a JSON object of the form `{ "dropbox": "http://dropbox:8080" }`.
    pub fn merge_json(mut self, document: &str) -> Result<Self, serde_json::Error> {
        let parsed: BTreeMap<String, String> = serde_json::from_str(document)?;
        self.services.extend(parsed);
        Ok(self)
    }

    /// Merge `{prefix}{NAME}=address` variables. `NAME` is lower-cased and
    /// underscores become hyphens, so `WORKFLOW_SERVICE_GOOGLE_DRIVE` registers
    /// `google-drive`.
    pub fn merge_env<I, K, V>(mut self, prefix: &str, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            if let Some(name) = key.as_ref().strip_prefix(prefix) {
                if name.is_empty() {
                    continue;
                }
                let name = name.to_ascii_lowercase().replace('_', "-");
                self.services.insert(name, value.into());
            }
        }
        self
    }

    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry { services: self.services }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_base_and_action() {
        let registry = ServiceRegistry::builder()
            .service("dropbox", "http://dropbox:8080/")
            .build();

        assert_eq!(
            registry.endpoint("dropbox", "save-file").as_deref(),
            Some("http://dropbox:8080/save-file")
        );
        assert_eq!(registry.endpoint("gdrive", "save-file"), None);
    }

    #[test]
    fn later_sources_override_earlier_ones() {
        let registry = ServiceRegistry::builder()
            .merge_json(r#"{ "slack": "http://from-file", "jira": "http://jira" }"#)
            .unwrap()
            .merge_env(
                "WORKFLOW_SERVICE_",
                vec![
                    ("WORKFLOW_SERVICE_SLACK", "http://from-env"),
                    ("WORKFLOW_SERVICE_GOOGLE_DRIVE", "http://gdrive"),
                    ("UNRELATED", "http://ignored"),
                ],
            )
            .build();

        assert_eq!(registry.base_address("slack"), Some("http://from-env"));
        assert_eq!(registry.base_address("jira"), Some("http://jira"));
        assert_eq!(registry.base_address("google-drive"), Some("http://gdrive"));
        assert!(!registry.contains("unrelated"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(ServiceRegistry::builder().merge_json("[1, 2]").is_err());
    }
}
