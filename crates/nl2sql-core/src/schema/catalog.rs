use super::{SchemaEntry, SchemaError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;

/// Immutable set of table descriptions.
///
/// A catalog is never mutated once built; reloading produces a new catalog
/// with a higher version that replaces the old one as a whole.
#[derive(Debug, Clone, Serialize)]
pub struct SchemaCatalog {
    version: u64,
    loaded_at: DateTime<Utc>,
    entries: Vec<SchemaEntry>,
    #[serde(skip)]
    by_name: HashMap<String, usize>,
}

impl SchemaCatalog {
    /// Build a catalog, rejecting empty or duplicated table names.
    /// Entries are kept sorted by table name.
    pub fn new(version: u64, mut entries: Vec<SchemaEntry>) -> Result<Self, SchemaError> {
        entries.sort_by(|a, b| a.table.to_lowercase().cmp(&b.table.to_lowercase()));

        let mut by_name = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            let key = entry.table.trim().to_lowercase();
            if key.is_empty() {
                return Err(SchemaError::Invalid("table with empty name".to_string()));
            }
            if by_name.insert(key, idx).is_some() {
                return Err(SchemaError::DuplicateTable(entry.table.clone()));
            }
        }

        Ok(Self {
            version,
            loaded_at: Utc::now(),
            entries,
            by_name,
        })
    }

    pub fn empty() -> Self {
        Self {
            version: 0,
            loaded_at: Utc::now(),
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn entries(&self) -> &[SchemaEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Case-insensitive table lookup.
    pub fn get(&self, table: &str) -> Option<&SchemaEntry> {
        self.by_name
            .get(&table.trim().to_lowercase())
            .map(|idx| &self.entries[*idx])
    }

    pub fn contains(&self, table: &str) -> bool {
        self.get(table).is_some()
    }
}
