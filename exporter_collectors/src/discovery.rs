use crate::config::DiscoveryConfig;
use exporter_core::api::{BatchAccount, StorageAccount};
use std::collections::HashMap;

/// A discovered resource that carries tags.
pub trait Tagged {
    fn resource_name(&self) -> &str;
    fn tags(&self) -> &HashMap<String, String>;
}

impl Tagged for BatchAccount {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }
}

impl Tagged for StorageAccount {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn tags(&self) -> &HashMap<String, String> {
        &self.tags
    }
}

/// Decides whether a discovered resource is collected at all.
///
/// Every required tag must be present; names compare case-insensitively,
/// values exactly. No required tags means everything is included.
#[derive(Debug, Clone, Default)]
pub struct InclusionPredicate {
    required: Vec<(String, String)>,
}

impl InclusionPredicate {
    pub fn include_all() -> Self {
        Self::default()
    }

    pub fn new<I, K, V>(required: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut required: Vec<(String, String)> = required
            .into_iter()
            .map(|(k, v)| (k.as_ref().to_lowercase(), v.into()))
            .collect();
        required.sort();
        Self { required }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self::new(
            config
                .required_tags
                .iter()
                .map(|(k, v)| (k.as_str(), v.clone())),
        )
    }

    pub fn includes_all(&self) -> bool {
        self.required.is_empty()
    }

    pub fn matches<R: Tagged + ?Sized>(&self, resource: &R) -> bool {
        let tags = resource.tags();
        self.required.iter().all(|(name, value)| {
            tags.iter()
                .any(|(k, v)| k.to_lowercase() == *name && v == value)
        })
    }
}
