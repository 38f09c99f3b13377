use async_trait::async_trait;
use nl2sql_core::{
    ColumnMeta, ExecutionError, ExecutionErrorKind, ExecutionLimits, QueryResult, SqlExecutor,
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::classify::classify_execution_error;
use crate::config::ToolNames;
use crate::error::McpError;
use crate::protocol::client::McpProtocolClient;

/// Runs queries through the MCP server's SQL execution tool.
pub struct McpSqlExecutor {
    client: Arc<McpProtocolClient>,
    tools: ToolNames,
}

impl McpSqlExecutor {
    pub fn new(client: Arc<McpProtocolClient>, tools: ToolNames) -> Self {
        Self { client, tools }
    }
}

fn map_transport_error(e: McpError) -> ExecutionError {
    let kind = match &e {
        McpError::Timeout(_) => ExecutionErrorKind::Timeout,
        McpError::Rpc { message, .. } => classify_execution_error(message),
        e if e.is_connectivity() => ExecutionErrorKind::Connectivity,
        _ => ExecutionErrorKind::Other,
    };
    ExecutionError::new(kind, e.to_string())
}

#[async_trait]
impl SqlExecutor for McpSqlExecutor {
    async fn execute(
        &self,
        sql: &str,
        limits: ExecutionLimits,
    ) -> Result<QueryResult, ExecutionError> {
        // One extra row distinguishes "exactly at the cap" from "over the cap".
        let arguments = json!({
            "query": sql,
            "max_rows": limits.row_cap + 1,
        });
        let timeout_ms = limits.timeout.as_millis() as u64;

        debug!("Executing query via {} (timeout {}ms)", self.tools.execute_sql, timeout_ms);
        let result = self
            .client
            .call_tool(&self.tools.execute_sql, arguments, timeout_ms)
            .await
            .map_err(map_transport_error)?;

        if result.is_error {
            let text = result.text();
            warn!("Execution tool reported an error: {}", text);
            return Err(ExecutionError::new(classify_execution_error(&text), text));
        }

        let payload = result.json().ok_or_else(|| {
            ExecutionError::new(
                ExecutionErrorKind::Other,
                "execution tool returned a non-JSON result",
            )
        })?;
        let rows = parse_query_payload(&payload)?;

        if rows.row_count() > limits.row_cap {
            return Err(ExecutionError::new(
                ExecutionErrorKind::RowCapExceeded,
                format!("query returned more than {} rows", limits.row_cap),
            ));
        }
        Ok(rows)
    }
}

/// Normalise the execution tool's payload into a [`QueryResult`].
///
/// Accepted shapes:
/// - `{"columns": [...], "rows": [[...], ...]}` (columns as names or `{name, type}`)
/// - `{"data" | "rows" | "results": [{...}, ...]}`
/// - `[{...}, ...]`
/// - `{"success": false, "error": "..."}`
pub fn parse_query_payload(payload: &Value) -> Result<QueryResult, ExecutionError> {
    if let Some(obj) = payload.as_object() {
        if obj.get("success").and_then(Value::as_bool) == Some(false) || obj.contains_key("error")
        {
            let message = obj
                .get("error")
                .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
                .unwrap_or_else(|| "query failed".to_string());
            return Err(ExecutionError::new(
                classify_execution_error(&message),
                message,
            ));
        }

        if let Some(columns) = obj.get("columns").and_then(Value::as_array) {
            let columns: Vec<ColumnMeta> = columns.iter().filter_map(parse_column).collect();
            let rows = obj
                .get("rows")
                .or_else(|| obj.get("data"))
                .and_then(Value::as_array)
                .map(|rows| rows.iter().map(|r| row_values(r, &columns)).collect())
                .unwrap_or_default();
            return Ok(QueryResult::new(columns, rows));
        }

        for key in ["data", "rows", "results"] {
            if let Some(records) = obj.get(key).and_then(Value::as_array) {
                return Ok(from_records(records));
            }
        }
    }

    if let Some(records) = payload.as_array() {
        return Ok(from_records(records));
    }

    Err(ExecutionError::new(
        ExecutionErrorKind::Other,
        "unrecognised execution result shape",
    ))
}

fn parse_column(value: &Value) -> Option<ColumnMeta> {
    match value {
        Value::String(name) => Some(ColumnMeta::new(name.clone())),
        Value::Object(obj) => {
            let name = obj.get("name")?.as_str()?.to_string();
            let data_type = obj
                .get("type")
                .or_else(|| obj.get("data_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(ColumnMeta { name, data_type })
        }
        _ => None,
    }
}

fn row_values(row: &Value, columns: &[ColumnMeta]) -> Vec<Value> {
    match row {
        Value::Array(values) => values.clone(),
        Value::Object(obj) => columns
            .iter()
            .map(|c| obj.get(&c.name).cloned().unwrap_or(Value::Null))
            .collect(),
        other => vec![other.clone()],
    }
}

fn from_records(records: &[Value]) -> QueryResult {
    let columns: Vec<ColumnMeta> = records
        .first()
        .and_then(Value::as_object)
        .map(|first: &Map<String, Value>| first.keys().map(ColumnMeta::new).collect())
        .unwrap_or_default();
    let rows = records.iter().map(|r| row_values(r, &columns)).collect();
    QueryResult::new(columns, rows)
}
