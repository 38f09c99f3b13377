use super::{SchemaEntry, SchemaError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Where a full schema catalog is loaded from.
#[async_trait]
pub trait SchemaSource: Send + Sync {
    async fn load(&self) -> Result<Vec<SchemaEntry>, SchemaError>;

    /// Human-readable origin, used in logs.
    fn describe(&self) -> String;
}

/// Catalog stored as a JSON file, either `{"tables": [...]}` or a bare array.
pub struct JsonFileSchemaSource {
    path: PathBuf,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CatalogFile {
    Wrapped { tables: Vec<SchemaEntry> },
    Bare(Vec<SchemaEntry>),
}

impl JsonFileSchemaSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub fn parse_catalog_json(raw: &str) -> Result<Vec<SchemaEntry>, SchemaError> {
    let file: CatalogFile =
        serde_json::from_str(raw).map_err(|e| SchemaError::Parse(e.to_string()))?;
    Ok(match file {
        CatalogFile::Wrapped { tables } => tables,
        CatalogFile::Bare(tables) => tables,
    })
}

#[async_trait]
impl SchemaSource for JsonFileSchemaSource {
    async fn load(&self) -> Result<Vec<SchemaEntry>, SchemaError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| SchemaError::Io(format!("{}: {}", self.path.display(), e)))?;
        parse_catalog_json(&raw)
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
