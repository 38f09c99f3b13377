use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: None,
        }
    }

    pub fn typed(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: Some(data_type.into()),
        }
    }
}

/// Tabular result of a read-only query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<ColumnMeta>, rows: Vec<Vec<Value>>) -> Self {
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Values of one column, `Null` where a row is short.
    pub fn column_values(&self, idx: usize) -> impl Iterator<Item = &Value> + '_ {
        self.rows
            .iter()
            .map(move |row| row.get(idx).unwrap_or(&Value::Null))
    }

    /// True when every cell of every row is null.
    pub fn all_null(&self) -> bool {
        !self.rows.is_empty() && self.rows.iter().all(|row| row.iter().all(Value::is_null))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    Syntax,
    Permission,
    Connectivity,
    Timeout,
    RowCapExceeded,
    Other,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionErrorKind::Syntax => "syntax",
            ExecutionErrorKind::Permission => "permission",
            ExecutionErrorKind::Connectivity => "connectivity",
            ExecutionErrorKind::Timeout => "timeout",
            ExecutionErrorKind::RowCapExceeded => "row_cap_exceeded",
            ExecutionErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{kind} error: {message}")]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Whether a corrected query has a chance of succeeding.
    pub fn is_correctable(&self) -> bool {
        matches!(
            self.kind,
            ExecutionErrorKind::Syntax
                | ExecutionErrorKind::Timeout
                | ExecutionErrorKind::RowCapExceeded
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub timeout: Duration,
    pub row_cap: usize,
}

/// Read-only SQL execution against the target database.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// Run `sql`, returning at most `limits.row_cap` rows.
    ///
    /// Implementations report a result that would exceed the cap as
    /// [`ExecutionErrorKind::RowCapExceeded`] rather than truncating silently.
    async fn execute(
        &self,
        sql: &str,
        limits: ExecutionLimits,
    ) -> Result<QueryResult, ExecutionError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_column_values_pads_short_rows() {
        let result = QueryResult::new(
            vec![ColumnMeta::new("a"), ColumnMeta::new("b")],
            vec![vec![json!(1), json!(2)], vec![json!(3)]],
        );
        let b: Vec<_> = result.column_values(1).cloned().collect();
        assert_eq!(b, vec![json!(2), Value::Null]);
        assert_eq!(result.column_index("B"), Some(1));
    }

    #[test]
    fn test_all_null() {
        let result = QueryResult::new(
            vec![ColumnMeta::new("avg")],
            vec![vec![Value::Null], vec![Value::Null]],
        );
        assert!(result.all_null());
        assert!(!QueryResult::default().all_null());
    }

    #[test]
    fn test_correctable_kinds() {
        assert!(ExecutionError::new(ExecutionErrorKind::Syntax, "x").is_correctable());
        assert!(!ExecutionError::new(ExecutionErrorKind::Permission, "x").is_correctable());
        assert_eq!(
            ExecutionError::new(ExecutionErrorKind::Timeout, "slow").to_string(),
            "timeout error: slow"
        );
    }
}
