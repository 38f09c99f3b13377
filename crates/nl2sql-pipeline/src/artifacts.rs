//! Chart specifications and where they are published.

use async_trait::async_trait;
use nl2sql_core::{ChartArtifact, ChartType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub x: Value,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
}

/// Renderer-agnostic chart description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartSpec {
    pub id: String,
    pub chart_type: ChartType,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_label: Option<String>,
    pub points: Vec<DataPoint>,
}

impl ChartSpec {
    pub fn artifact(&self, uri: impl Into<String>) -> ChartArtifact {
        ChartArtifact {
            id: self.id.clone(),
            chart_type: self.chart_type,
            title: self.title.clone(),
            uri: uri.into(),
            point_count: self.points.len(),
        }
    }
}

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn publish(&self, spec: &ChartSpec) -> Result<ChartArtifact, ArtifactError>;
}

/// Writes each spec as `<dir>/<id>.json`. Publishing the same spec twice
/// overwrites the same file.
#[derive(Debug, Clone)]
pub struct FileArtifactSink {
    dir: PathBuf,
    base_url: Option<String>,
}

impl FileArtifactSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            base_url: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into().trim_end_matches('/').to_string());
        self
    }
}

#[async_trait]
impl ArtifactSink for FileArtifactSink {
    async fn publish(&self, spec: &ChartSpec) -> Result<ChartArtifact, ArtifactError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let file_name = format!("{}.json", spec.id);
        let path = self.dir.join(&file_name);
        let body = serde_json::to_vec_pretty(spec)?;
        tokio::fs::write(&path, body).await?;

        let uri = match &self.base_url {
            Some(base) => format!("{}/{}", base, file_name),
            None => path.display().to_string(),
        };
        log::debug!("Published chart {} to {}", spec.id, uri);
        Ok(spec.artifact(uri))
    }
}
