use anyhow::Context;
use clap::Parser;
use nl2sql_core::schema::JsonFileSchemaSource;
use nl2sql_core::{SchemaCatalog, SchemaIndex, SchemaSource};
use nl2sql_llm::OpenAiCompatClient;
use nl2sql_mcp::{McpProtocolClient, McpSchemaSource, McpSqlExecutor};
use nl2sql_pipeline::{FileArtifactSink, Pipeline};
use nl2sql_server::logging::init_logging;
use nl2sql_server::{run_server, AppState, Settings};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug, Clone)]
#[command(name = "nl2sql-server")]
#[command(about = "Natural-language to SQL answering service")]
#[command(version)]
struct Cli {
    /// Enable debug mode
    #[arg(long, env = "DEBUG", default_value = "false")]
    debug: bool,

    /// Server port
    #[arg(long, env = "PORT", default_value = "8081")]
    port: u16,

    /// LLM API base URL (OpenAI-compatible)
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.openai.com/v1")]
    llm_base_url: String,

    /// LLM model name
    #[arg(long, env = "LLM_MODEL", default_value = "gpt-4o-mini")]
    model: String,

    /// LLM API key
    #[arg(long, env = "LLM_API_KEY", default_value = "")]
    api_key: String,

    /// MCP server URL (overrides the settings file)
    #[arg(long, env = "MCP_URL")]
    mcp_url: Option<String>,

    /// MCP request timeout in milliseconds (overrides the settings file)
    #[arg(long, env = "MCP_TIMEOUT_MS")]
    mcp_timeout_ms: Option<u64>,

    /// YAML settings file
    #[arg(long, env = "NL2SQL_CONFIG")]
    config: Option<PathBuf>,

    /// Schema catalog JSON file; the catalog is read from the MCP server when absent
    #[arg(long, env = "NL2SQL_CATALOG")]
    catalog: Option<PathBuf>,

    /// Log level (overrides debug flag)
    #[arg(long, env = "RUST_LOG")]
    log_level: Option<String>,
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.log_level.is_some() {
        env_logger::init();
    } else {
        init_logging(cli.debug);
    }

    let settings = Settings::load(cli.config.as_deref()).context("loading settings")?;
    let mcp = settings.mcp_config(cli.mcp_url.as_deref(), cli.mcp_timeout_ms);
    let config = settings.pipeline;

    log::info!("Starting nl2sql server on port {}", cli.port);
    log::info!("  LLM: {} ({})", cli.model, cli.llm_base_url);
    log::info!("  MCP: {}", mcp.url);
    log::debug!("Pipeline configuration: {:?}", config);

    let client = Arc::new(
        McpProtocolClient::connect_http(&mcp)
            .await
            .with_context(|| format!("connecting to MCP server at {}", mcp.url))?,
    );
    let executor = Arc::new(McpSqlExecutor::new(client.clone(), mcp.tools.clone()));

    let source: Arc<dyn SchemaSource> = match &cli.catalog {
        Some(path) => Arc::new(JsonFileSchemaSource::new(path)),
        None => Arc::new(McpSchemaSource::new(
            client,
            mcp.tools.clone(),
            mcp.request_timeout_ms,
        )),
    };

    // Start even without a catalog; /ready reports it and /schema/reload can fix it.
    let schema = Arc::new(SchemaIndex::new(SchemaCatalog::empty()));
    match schema.reload(source.as_ref()).await {
        Ok(version) => log::info!(
            "Loaded schema catalog v{} ({} tables) from {}",
            version,
            schema.snapshot().len(),
            source.describe()
        ),
        Err(e) => log::error!("Initial schema load from {} failed: {}", source.describe(), e),
    }

    let llm = Arc::new(
        OpenAiCompatClient::new(cli.api_key)
            .with_base_url(cli.llm_base_url)
            .with_model(cli.model),
    );

    let mut sink = FileArtifactSink::new(config.artifact_dir.clone());
    if let Some(base_url) = &config.artifact_base_url {
        sink = sink.with_base_url(base_url.clone());
    }

    let pipeline = Pipeline::new(llm, executor, schema, Arc::new(sink), config);
    run_server(cli.port, AppState::new(pipeline, source)).await?;
    Ok(())
}
