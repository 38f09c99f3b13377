use chrono::{DateTime, Utc};
use nl2sql_core::{SchemaIndex, SchemaSource};
use nl2sql_pipeline::Pipeline;
use std::sync::Arc;

pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    /// Where `POST /schema/reload` reads the catalog from.
    pub schema_source: Arc<dyn SchemaSource>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, schema_source: Arc<dyn SchemaSource>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            schema_source,
            started_at: Utc::now(),
        }
    }

    pub fn schema(&self) -> &Arc<SchemaIndex> {
        self.pipeline.schema()
    }
}
