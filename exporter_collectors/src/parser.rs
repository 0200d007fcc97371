use crate::config::ExporterConfig;
use anyhow::Result;
use std::path::Path;

/// Reads and validates a configuration file.
pub async fn load_config_from_file(path: impl AsRef<Path>) -> Result<ExporterConfig> {
    let config = read_config_from_file(path).await?;
    config.validate()?;
    Ok(config)
}

/// Reads a configuration file without validating it, so that command line
/// overrides can fill in missing fields first.
pub async fn read_config_from_file(path: impl AsRef<Path>) -> Result<ExporterConfig> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path).await?;

    let extension = path.extension().and_then(|s| s.to_str());

    match extension {
        Some("yaml") | Some("yml") => parse_yaml(&contents),
        Some("toml") => parse_toml(&contents),
        Some("json") => parse_json(&contents),
        _ => Err(anyhow::anyhow!(
            "Unsupported file format. Use .yaml, .yml, .toml, or .json"
        )),
    }
}

pub fn parse_config_from_str(content: &str, format: &str) -> Result<ExporterConfig> {
    let config = match format.to_lowercase().as_str() {
        "yaml" | "yml" => parse_yaml(content)?,
        "toml" => parse_toml(content)?,
        "json" => parse_json(content)?,
        _ => return Err(anyhow::anyhow!("Unsupported format: {}", format)),
    };
    config.validate()?;
    Ok(config)
}

fn parse_yaml(content: &str) -> Result<ExporterConfig> {
    Ok(serde_yaml::from_str(content)?)
}

fn parse_toml(content: &str) -> Result<ExporterConfig> {
    Ok(toml::from_str(content)?)
}

fn parse_json(content: &str) -> Result<ExporterConfig> {
    Ok(serde_json::from_str(content)?)
}
