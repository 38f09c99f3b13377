//! Server settings file: pipeline tuning plus MCP connection details.
//!
//! ```yaml
//! pipeline:
//!   max_retries: 3
//!   verification_mode: llm
//! mcp:
//!   url: http://localhost:8000/mcp
//!   tools:
//!     execute_sql: run_query
//! ```

use nl2sql_mcp::McpConfig;
use nl2sql_pipeline::{ConfigError, PipelineConfig};
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

pub const DEFAULT_MCP_URL: &str = "http://localhost:8000/mcp";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse settings file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Pipeline(#[from] ConfigError),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub mcp: Option<McpConfig>,
}

impl Settings {
    pub fn from_yaml_str(raw: &str) -> Result<Self, SettingsError> {
        let settings: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        settings.pipeline.validate()?;
        Ok(settings)
    }

    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        match path {
            Some(path) => {
                log::info!("Loading settings from {:?}", path);
                Self::from_yaml_str(&std::fs::read_to_string(path)?)
            }
            None => Ok(Self::default()),
        }
    }

    /// MCP connection with command-line overrides applied.
    pub fn mcp_config(&self, url: Option<&str>, timeout_ms: Option<u64>) -> McpConfig {
        let mut config = self
            .mcp
            .clone()
            .unwrap_or_else(|| McpConfig::new(DEFAULT_MCP_URL));
        if let Some(url) = url {
            config.url = url.to_string();
        }
        if let Some(timeout_ms) = timeout_ms {
            config.request_timeout_ms = timeout_ms;
        }
        config
    }
}
