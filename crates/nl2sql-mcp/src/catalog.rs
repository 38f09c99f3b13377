use async_trait::async_trait;
use nl2sql_core::{SchemaEntry, SchemaError, SchemaSource};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ToolNames;
use crate::protocol::client::McpProtocolClient;

/// Loads the table catalog through the server's introspection tools.
pub struct McpSchemaSource {
    client: Arc<McpProtocolClient>,
    tools: ToolNames,
    timeout_ms: u64,
}

impl McpSchemaSource {
    pub fn new(client: Arc<McpProtocolClient>, tools: ToolNames, timeout_ms: u64) -> Self {
        Self {
            client,
            tools,
            timeout_ms,
        }
    }

    async fn call_json(&self, tool: &str, arguments: Value) -> Result<Value, SchemaError> {
        let result = self
            .client
            .call_tool(tool, arguments, self.timeout_ms)
            .await
            .map_err(|e| SchemaError::Source(format!("{}: {}", tool, e)))?;
        if result.is_error {
            return Err(SchemaError::Source(format!("{}: {}", tool, result.text())));
        }
        result
            .json()
            .ok_or_else(|| SchemaError::Parse(format!("{} returned non-JSON content", tool)))
    }
}

/// Table names from a `list_tables` payload: a list of names or of
/// `{name | table_name, schema?}` objects, optionally wrapped in `{"tables": ...}`.
pub fn parse_table_list(payload: &Value) -> Vec<String> {
    let items = payload
        .get("tables")
        .and_then(Value::as_array)
        .or_else(|| payload.as_array());

    items
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(name) => Some(name.clone()),
                    Value::Object(obj) => {
                        let name = obj
                            .get("name")
                            .or_else(|| obj.get("table_name"))
                            .and_then(Value::as_str)?;
                        match obj.get("schema").and_then(Value::as_str) {
                            Some(schema) if !schema.is_empty() => {
                                Some(format!("{}.{}", schema, name))
                            }
                            _ => Some(name.to_string()),
                        }
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

/// One catalog entry from a `get_table_schema` payload.
pub fn parse_table_schema(table: &str, payload: &Value) -> Result<SchemaEntry, SchemaError> {
    let mut object = payload
        .as_object()
        .cloned()
        .ok_or_else(|| SchemaError::Parse(format!("schema of {} is not an object", table)))?;
    if !object.contains_key("table")
        && !object.contains_key("table_name")
        && !object.contains_key("name")
    {
        object.insert("table".to_string(), json!(table));
    }
    serde_json::from_value(Value::Object(object))
        .map_err(|e| SchemaError::Parse(format!("schema of {}: {}", table, e)))
}

#[async_trait]
impl SchemaSource for McpSchemaSource {
    async fn load(&self) -> Result<Vec<SchemaEntry>, SchemaError> {
        let listing = self.call_json(&self.tools.list_tables, json!({})).await?;
        let tables = parse_table_list(&listing);
        info!("MCP server lists {} tables", tables.len());

        let mut entries = Vec::with_capacity(tables.len());
        for table in tables {
            debug!("Describing table {}", table);
            let payload = self
                .call_json(&self.tools.table_schema, json!({ "table_name": table }))
                .await?;
            entries.push(parse_table_schema(&table, &payload)?);
        }
        Ok(entries)
    }

    fn describe(&self) -> String {
        format!("MCP tools {}/{}", self.tools.list_tables, self.tools.table_schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_list_shapes() {
        assert_eq!(parse_table_list(&json!(["gdp", "countries"])), vec!["gdp", "countries"]);
        assert_eq!(
            parse_table_list(&json!({"tables": [{"schema": "dbo", "name": "gdp"}]})),
            vec!["dbo.gdp"]
        );
        assert!(parse_table_list(&json!({"other": 1})).is_empty());
    }

    #[test]
    fn test_table_schema_fills_missing_name() {
        let entry = parse_table_schema(
            "life_expectancy",
            &json!({
                "description": "Life expectancy by country and year",
                "columns": [
                    {"name": "country_id", "data_type": "int"},
                    {"name": "value", "type": "float", "description": "years"}
                ],
                "foreign_keys": [
                    {"column": "country_id", "references_table": "countries", "references_column": "id"}
                ]
            }),
        )
        .unwrap();
        assert_eq!(entry.table, "life_expectancy");
        assert_eq!(entry.columns.len(), 2);
        assert_eq!(entry.foreign_keys[0].references_table, "countries");
    }

    #[test]
    fn test_table_schema_rejects_non_object() {
        assert!(matches!(
            parse_table_schema("t", &json!([1, 2])),
            Err(SchemaError::Parse(_))
        ));
    }
}
