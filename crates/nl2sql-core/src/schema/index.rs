use super::{SchemaCatalog, SchemaEntry, SchemaError, SchemaSource};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide holder of the current schema catalog.
///
/// Readers take an `Arc` snapshot and keep it for the lifetime of a run, so a
/// concurrent reload never changes the schema a run is working against.
pub struct SchemaIndex {
    current: ArcSwap<SchemaCatalog>,
    next_version: AtomicU64,
}

impl SchemaIndex {
    pub fn new(catalog: SchemaCatalog) -> Self {
        let next = catalog.version() + 1;
        Self {
            current: ArcSwap::from_pointee(catalog),
            next_version: AtomicU64::new(next),
        }
    }

    pub fn from_entries(entries: Vec<SchemaEntry>) -> Result<Self, SchemaError> {
        Ok(Self::new(SchemaCatalog::new(1, entries)?))
    }

    /// Current catalog. Cheap; clones an `Arc`.
    pub fn snapshot(&self) -> Arc<SchemaCatalog> {
        self.current.load_full()
    }

    /// Validate and install a new set of entries. Returns the new version.
    ///
    /// On validation failure the previous catalog stays in place.
    pub fn replace(&self, entries: Vec<SchemaEntry>) -> Result<u64, SchemaError> {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        let catalog = SchemaCatalog::new(version, entries)?;
        self.current.store(Arc::new(catalog));
        log::info!("Schema catalog swapped to version {}", version);
        Ok(version)
    }

    /// Load a full catalog from `source` and swap it in.
    pub async fn reload(&self, source: &dyn SchemaSource) -> Result<u64, SchemaError> {
        log::info!("Reloading schema catalog from {}", source.describe());
        let entries = source.load().await?;
        if entries.is_empty() {
            log::warn!("Schema source {} returned no tables", source.describe());
            return Err(SchemaError::EmptyCatalog);
        }
        self.replace(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use async_trait::async_trait;

    struct FixedSource(Vec<SchemaEntry>);

    #[async_trait]
    impl SchemaSource for FixedSource {
        async fn load(&self) -> Result<Vec<SchemaEntry>, SchemaError> {
            Ok(self.0.clone())
        }

        fn describe(&self) -> String {
            "fixed".to_string()
        }
    }

    #[tokio::test]
    async fn test_snapshot_survives_reload() {
        let index =
            SchemaIndex::from_entries(vec![SchemaEntry::new("gdp", vec![])]).unwrap();
        let before = index.snapshot();

        let source = FixedSource(vec![
            SchemaEntry::new("gdp", vec![ColumnDef::new("year", "INT")]),
            SchemaEntry::new("countries", vec![]),
        ]);
        let version = index.reload(&source).await.unwrap();

        assert_eq!(version, 2);
        assert_eq!(before.len(), 1);
        assert_eq!(before.version(), 1);
        assert_eq!(index.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_reload_keeps_previous_catalog() {
        let index =
            SchemaIndex::from_entries(vec![SchemaEntry::new("gdp", vec![])]).unwrap();
        let err = index.reload(&FixedSource(vec![])).await.unwrap_err();
        assert!(matches!(err, SchemaError::EmptyCatalog));
        assert_eq!(index.snapshot().version(), 1);
    }

    #[test]
    fn test_invalid_replace_keeps_previous_catalog() {
        let index =
            SchemaIndex::from_entries(vec![SchemaEntry::new("gdp", vec![])]).unwrap();
        let result = index.replace(vec![SchemaEntry::new("", vec![])]);
        assert!(result.is_err());
        assert!(index.snapshot().contains("gdp"));
    }
}
