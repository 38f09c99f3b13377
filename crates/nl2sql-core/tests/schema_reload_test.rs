use nl2sql_core::schema::JsonFileSchemaSource;
use nl2sql_core::{SchemaCatalog, SchemaError, SchemaIndex};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

const V1: &str = r#"{
  "tables": [
    {"table": "countries", "columns": [{"name": "code", "type": "TEXT"}, {"name": "region", "type": "TEXT"}]},
    {"table": "gdp", "description": "GDP by country and year",
     "columns": [{"name": "country_code", "type": "TEXT"}, {"name": "gdp_usd", "type": "REAL"}],
     "foreign_keys": [{"column": "country_code", "references_table": "countries", "references_column": "code"}]}
  ]
}"#;

const V2: &str = r#"[
  {"table_name": "population", "columns": [{"name": "total", "data_type": "INT"}]}
]"#;

fn write(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[tokio::test]
async fn test_reload_swaps_whole_catalog() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "catalog.json", V1);
    let source = JsonFileSchemaSource::new(&path);

    let index = SchemaIndex::new(SchemaCatalog::empty());
    assert_eq!(index.reload(&source).await.unwrap(), 1);

    let pinned = index.snapshot();
    assert_eq!(pinned.len(), 2);
    assert_eq!(pinned.get("gdp").unwrap().foreign_keys.len(), 1);

    std::fs::write(&path, V2).unwrap();
    assert_eq!(index.reload(&source).await.unwrap(), 2);

    // The earlier snapshot is unaffected by the swap.
    assert_eq!(pinned.version(), 1);
    assert!(pinned.contains("countries"));
    assert!(!pinned.contains("population"));

    let current = index.snapshot();
    assert_eq!(current.version(), 2);
    assert_eq!(current.len(), 1);
    assert!(current.contains("population"));
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_catalog() {
    let dir = TempDir::new().unwrap();
    let path = write(&dir, "catalog.json", V1);
    let source = JsonFileSchemaSource::new(&path);
    let index = SchemaIndex::new(SchemaCatalog::empty());
    assert_ok!(index.reload(&source).await);

    std::fs::write(&path, "{not json").unwrap();
    assert!(matches!(
        index.reload(&source).await,
        Err(SchemaError::Parse(_))
    ));

    std::fs::write(&path, "[]").unwrap();
    assert!(matches!(
        index.reload(&source).await,
        Err(SchemaError::EmptyCatalog)
    ));

    let missing = JsonFileSchemaSource::new(dir.path().join("missing.json"));
    let err = assert_err!(index.reload(&missing).await);
    assert!(matches!(err, SchemaError::Io(_)));

    assert_eq!(index.snapshot().version(), 1);
    assert_eq!(index.snapshot().len(), 2);
}

#[tokio::test]
async fn test_readers_never_see_partial_catalog() {
    let dir = TempDir::new().unwrap();
    let v1 = JsonFileSchemaSource::new(write(&dir, "v1.json", V1));
    let v2 = JsonFileSchemaSource::new(write(&dir, "v2.json", V2));
    let index = Arc::new(SchemaIndex::new(SchemaCatalog::empty()));
    index.reload(&v1).await.unwrap();

    let readers: Vec<_> = (0..8)
        .map(|_| {
            let index = index.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let catalog = index.snapshot();
                    let names: Vec<&str> =
                        catalog.entries().iter().map(|e| e.table.as_str()).collect();
                    assert!(
                        names == ["countries", "gdp"] || names == ["population"],
                        "mixed catalog: {:?}",
                        names
                    );
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect();

    for i in 0..20 {
        let source = if i % 2 == 0 { &v2 } else { &v1 };
        index.reload(source).await.unwrap();
        tokio::task::yield_now().await;
    }

    for reader in readers {
        reader.await.unwrap();
    }
    assert_eq!(index.snapshot().version(), 21);
}
