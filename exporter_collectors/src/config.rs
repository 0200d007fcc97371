use crate::updater::KNOWN_UPDATERS;
use exporter_core::api::arm::DEFAULT_MANAGEMENT_ENDPOINT;
use exporter_core::{ExporterError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    #[serde(default)]
    pub subscription_id: String,
    #[serde(with = "humantime_serde", default = "default_update_interval")]
    pub update_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_call_timeout")]
    pub call_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub cache_ttl: Duration,
    #[serde(default = "default_updaters")]
    pub updaters: Vec<String>,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default = "default_management_endpoint")]
    pub management_endpoint: String,
}

/// Inclusion predicate over resource tags.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub required_tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_listen_address")]
    pub address: String,
    #[serde(default = "default_listen_port")]
    pub port: u16,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
            port: default_listen_port(),
        }
    }
}

impl ListenConfig {
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            subscription_id: String::new(),
            update_interval: default_update_interval(),
            call_timeout: default_call_timeout(),
            cache_ttl: default_cache_ttl(),
            updaters: default_updaters(),
            discovery: DiscoveryConfig::default(),
            listen: ListenConfig::default(),
            management_endpoint: default_management_endpoint(),
        }
    }
}

impl ExporterConfig {
    pub fn builder() -> ExporterConfigBuilder {
        ExporterConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.subscription_id.trim().is_empty() {
            return Err(invalid("subscription_id cannot be empty"));
        }

        for (name, value) in [
            ("update_interval", self.update_interval),
            ("call_timeout", self.call_timeout),
            ("cache_ttl", self.cache_ttl),
        ] {
            if value.is_zero() {
                return Err(invalid(format!("{} must be > 0", name)));
            }
        }

        if self.updaters.is_empty() {
            return Err(invalid("at least one updater must be enabled"));
        }

        let mut seen = HashSet::new();
        for name in &self.updaters {
            if !KNOWN_UPDATERS.contains(&name.as_str()) {
                return Err(invalid(format!(
                    "unknown updater '{}' (expected one of: {})",
                    name,
                    KNOWN_UPDATERS.join(", ")
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(invalid(format!("updater '{}' listed twice", name)));
            }
        }

        if self.management_endpoint.trim().is_empty() {
            return Err(invalid("management_endpoint cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ExporterError {
    ExporterError::InvalidConfig(message.into())
}

#[derive(Default)]
pub struct ExporterConfigBuilder {
    config: ExporterConfig,
}

impl ExporterConfigBuilder {
    pub fn subscription_id(mut self, subscription_id: impl Into<String>) -> Self {
        self.config.subscription_id = subscription_id.into();
        self
    }

    pub fn update_interval(mut self, interval: Duration) -> Self {
        self.config.update_interval = interval;
        self
    }

    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    pub fn updaters<I, S>(mut self, updaters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.updaters = updaters.into_iter().map(Into::into).collect();
        self
    }

    pub fn required_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config
            .discovery
            .required_tags
            .insert(name.into(), value.into());
        self
    }

    pub fn listen(mut self, address: impl Into<String>, port: u16) -> Self {
        self.config.listen = ListenConfig {
            address: address.into(),
            port,
        };
        self
    }

    pub fn management_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.management_endpoint = endpoint.into();
        self
    }

    pub fn build(self) -> ExporterConfig {
        self.config
    }
}

fn default_update_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_updaters() -> Vec<String> {
    KNOWN_UPDATERS.iter().map(|u| u.to_string()).collect()
}

fn default_listen_address() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    9000
}

fn default_management_endpoint() -> String {
    DEFAULT_MANAGEMENT_ENDPOINT.to_string()
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
