//! MCP-backed database capabilities.
//!
//! Talks JSON-RPC 2.0 to an MCP server over streamable HTTP and exposes
//! its tools as the pipeline's [`SqlExecutor`](nl2sql_core::SqlExecutor)
//! and [`SchemaSource`](nl2sql_core::SchemaSource).

pub mod catalog;
pub mod classify;
pub mod config;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod transports;

pub use catalog::McpSchemaSource;
pub use classify::classify_execution_error;
pub use config::{HeaderConfig, McpConfig, ToolNames};
pub use error::{McpError, Result};
pub use executor::McpSqlExecutor;
pub use protocol::client::{McpProtocolClient, McpTransport};
pub use transports::HttpTransport;
