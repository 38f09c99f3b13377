use serde::{Deserialize, Serialize};

/// Connection settings for the database MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Streamable HTTP endpoint, e.g. `http://localhost:8000/mcp`
    pub url: String,
    /// Additional headers
    #[serde(default)]
    pub headers: Vec<HeaderConfig>,
    /// Request timeout in milliseconds for non-query calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Tool names exposed by the server
    #[serde(default)]
    pub tools: ToolNames,
}

fn default_request_timeout() -> u64 {
    30000 // 30 seconds
}

impl McpConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
            request_timeout_ms: default_request_timeout(),
            tools: ToolNames::default(),
        }
    }
}

/// HTTP header configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderConfig {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolNames {
    #[serde(default = "default_execute_tool")]
    pub execute_sql: String,
    #[serde(default = "default_list_tables_tool")]
    pub list_tables: String,
    #[serde(default = "default_table_schema_tool")]
    pub table_schema: String,
}

fn default_execute_tool() -> String {
    "execute_sql_query".to_string()
}

fn default_list_tables_tool() -> String {
    "list_tables".to_string()
}

fn default_table_schema_tool() -> String {
    "get_table_schema".to_string()
}

impl Default for ToolNames {
    fn default() -> Self {
        Self {
            execute_sql: default_execute_tool(),
            list_tables: default_list_tables_tool(),
            table_schema: default_table_schema_tool(),
        }
    }
}
