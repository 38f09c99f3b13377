use super::SchemaEntry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OmissionReason {
    /// The join target exists but did not fit the table or token budget.
    Budget,
    /// The foreign key points at a table the catalog does not describe.
    NotInCatalog,
}

/// A join target referenced by a selected table but left out of the subset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OmittedJoin {
    pub from_table: String,
    pub column: String,
    pub target_table: String,
    pub reason: OmissionReason,
}

/// The bounded schema subset handed to SQL generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSelection {
    pub catalog_version: u64,
    pub tables: Vec<SchemaEntry>,
    #[serde(default)]
    pub omitted_join_targets: Vec<OmittedJoin>,
}

impl SchemaSelection {
    pub fn table(&self, name: &str) -> Option<&SchemaEntry> {
        self.tables
            .iter()
            .find(|t| t.table.eq_ignore_ascii_case(name))
    }

    pub fn table_names(&self) -> Vec<&str> {
        self.tables.iter().map(|t| t.table.as_str()).collect()
    }

    /// True when any selected table declares a column with this name.
    pub fn has_column(&self, name: &str) -> bool {
        self.tables.iter().any(|t| t.has_column(name))
    }

    /// Rendered schema text for prompts, tables in selection order.
    pub fn render(&self) -> String {
        let mut out: String = self
            .tables
            .iter()
            .map(|t| t.render())
            .collect::<Vec<_>>()
            .join("\n");
        if !self.omitted_join_targets.is_empty() {
            out.push_str("\nJoin targets NOT available (do not reference them):\n");
            for omitted in &self.omitted_join_targets {
                out.push_str(&format!(
                    "  {}.{} -> {}\n",
                    omitted.from_table, omitted.column, omitted.target_table
                ));
            }
        }
        out
    }
}
