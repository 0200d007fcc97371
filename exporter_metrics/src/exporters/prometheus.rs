use crate::registry::MetricsRegistry;
use exporter_core::Result;
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, TextEncoder};

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

pub struct PrometheusExporter;

impl PrometheusExporter {
    pub fn format(families: &[MetricFamily]) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(families, &mut buffer)?;
        let text = String::from_utf8(buffer).map_err(anyhow::Error::from)?;
        Ok(text)
    }

    /// Everything currently exposed by `registry`.
    pub fn render(registry: &MetricsRegistry) -> Result<String> {
        Self::format(&registry.gather())
    }
}
