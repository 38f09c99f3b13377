mod catalog;
mod entry;
mod index;
mod selection;
mod source;

pub use catalog::SchemaCatalog;
pub use entry::{ColumnDef, ForeignKey, SchemaEntry};
pub use index::SchemaIndex;
pub use selection::{OmittedJoin, OmissionReason, SchemaSelection};
pub use source::{parse_catalog_json, JsonFileSchemaSource, SchemaSource};

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum SchemaError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid catalog: {0}")]
    Invalid(String),

    #[error("Duplicate table: {0}")]
    DuplicateTable(String),

    #[error("Schema source returned no tables")]
    EmptyCatalog,

    #[error("Schema source error: {0}")]
    Source(String),
}
