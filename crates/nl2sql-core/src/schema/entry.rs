use serde::{Deserialize, Serialize};
use std::fmt::Write;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type", alias = "data_type", default)]
    pub data_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            description: None,
        }
    }
}

/// A foreign key from one column of this table to a column of another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub column: String,
    pub references_table: String,
    pub references_column: String,
}

/// One table of the queryable database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaEntry {
    #[serde(alias = "table_name", alias = "name")]
    pub table: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub description: String,
}

impl SchemaEntry {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            table: table.into(),
            columns,
            foreign_keys: Vec::new(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_foreign_key(
        mut self,
        column: impl Into<String>,
        references_table: impl Into<String>,
        references_column: impl Into<String>,
    ) -> Self {
        self.foreign_keys.push(ForeignKey {
            column: column.into(),
            references_table: references_table.into(),
            references_column: references_column.into(),
        });
        self
    }

    /// Case-insensitive column lookup.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Compact text form used inside prompts.
    ///
    /// ```text
    /// countries -- Country reference data
    ///   id INT
    ///   region VARCHAR -- Continent or region
    ///   FK region_id -> regions.id
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();
        if self.description.is_empty() {
            let _ = writeln!(out, "{}", self.table);
        } else {
            let _ = writeln!(out, "{} -- {}", self.table, self.description);
        }
        for column in &self.columns {
            match &column.description {
                Some(desc) if !desc.is_empty() => {
                    let _ = writeln!(out, "  {} {} -- {}", column.name, column.data_type, desc);
                }
                _ => {
                    let _ = writeln!(out, "  {} {}", column.name, column.data_type);
                }
            }
        }
        for fk in &self.foreign_keys {
            let _ = writeln!(
                out,
                "  FK {} -> {}.{}",
                fk.column, fk.references_table, fk.references_column
            );
        }
        out
    }

    /// Rough token estimate of the rendered entry (4 chars per token).
    pub fn approx_tokens(&self) -> usize {
        self.render().chars().count() / 4 + 1
    }
}
