//! Server configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use valuation_lib::ArtifactSelector;

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP port for the prediction, health and metrics endpoints
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding model artifacts
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,

    /// Artifact file name prefix
    #[serde(default = "default_model_name")]
    pub model_name: String,

    /// `latest` for the current artifact, or an explicit version
    #[serde(default = "default_artifact")]
    pub artifact: String,

    /// Accepted values of the `X-API-Key` header
    #[serde(default = "default_api_keys")]
    pub api_keys: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_model_name() -> String {
    "property_valuation_model".to_string()
}

fn default_artifact() -> String {
    "latest".to_string()
}

fn default_api_keys() -> Vec<String> {
    vec!["dev-key-123".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model_dir: default_model_dir(),
            model_name: default_model_name(),
            artifact: default_artifact(),
            api_keys: default_api_keys(),
        }
    }
}

impl ServerConfig {
    /// Load from `config/server.*` (if present) and `VALUATION_*` variables
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("config/server"))
    }

    /// Load from the given file stem (if present) and `VALUATION_*` variables
    pub fn load_from(file: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(file).required(false))
            .add_source(
                config::Environment::with_prefix("VALUATION")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("api_keys"),
            )
            .build()
            .context("Failed to read server configuration")?;

        let mut config: ServerConfig = config
            .try_deserialize()
            .context("Invalid server configuration")?;
        config.api_keys.retain(|k| !k.trim().is_empty());
        if config.api_keys.is_empty() {
            anyhow::bail!("At least one API key must be configured");
        }
        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn artifact_selector(&self) -> ArtifactSelector {
        // Parsing is infallible
        self.artifact.parse().unwrap_or_default()
    }
}
