//! Scripted capabilities and fixtures for exercising the pipeline without a
//! model or a database.

use async_trait::async_trait;
use nl2sql_core::{
    ChartArtifact, ColumnDef, ColumnMeta, ConversationContext, ExecutionError,
    ExecutionErrorKind, ExecutionLimits, IntentLabel, IntentOutcome, QueryResult, SchemaCatalog,
    SchemaEntry, SchemaSelection, SqlExecutor, StageOutput, TriageLabel, TriageOutcome,
};
use nl2sql_llm::{CompletionRequest, LlmCapability, LlmError};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::artifacts::{ArtifactError, ArtifactSink, ChartSpec};
use crate::config::{PipelineConfig, StageTimeouts};
use crate::prompts;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Which stage a request came from, recognised by its system prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Triage,
    Intent,
    Scoring,
    Generation,
    Verification,
    Other,
}

impl PromptKind {
    pub fn of(request: &CompletionRequest) -> Self {
        match request.system.as_str() {
            prompts::TRIAGE_SYSTEM => PromptKind::Triage,
            prompts::INTENT_SYSTEM => PromptKind::Intent,
            prompts::SCORING_SYSTEM => PromptKind::Scoring,
            prompts::GENERATION_SYSTEM => PromptKind::Generation,
            prompts::VERIFICATION_SYSTEM => PromptKind::Verification,
            _ => PromptKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    RateLimited,
    Unauthorized,
    /// Never answers; for exercising timeouts and cancellation.
    Hang,
}

#[derive(Default)]
struct LlmScript {
    replies: HashMap<PromptKind, VecDeque<ScriptedReply>>,
    requests: Vec<(PromptKind, CompletionRequest)>,
}

/// LLM that answers from per-stage queues of canned replies and records
/// every request. An exhausted queue answers with an empty response.
#[derive(Clone, Default)]
pub struct ScriptedLlm {
    script: Arc<Mutex<LlmScript>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, kind: PromptKind, reply: ScriptedReply) -> Self {
        lock(&self.script)
            .replies
            .entry(kind)
            .or_default()
            .push_back(reply);
        self
    }

    pub fn on_triage(self, text: impl Into<String>) -> Self {
        self.reply(PromptKind::Triage, ScriptedReply::Text(text.into()))
    }

    pub fn on_intent(self, text: impl Into<String>) -> Self {
        self.reply(PromptKind::Intent, ScriptedReply::Text(text.into()))
    }

    pub fn on_scoring(self, text: impl Into<String>) -> Self {
        self.reply(PromptKind::Scoring, ScriptedReply::Text(text.into()))
    }

    pub fn on_generation(self, text: impl Into<String>) -> Self {
        self.reply(PromptKind::Generation, ScriptedReply::Text(text.into()))
    }

    pub fn on_verification(self, text: impl Into<String>) -> Self {
        self.reply(PromptKind::Verification, ScriptedReply::Text(text.into()))
    }

    /// Wait this long before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of requests received for a stage.
    pub fn calls(&self, kind: PromptKind) -> usize {
        lock(&self.script)
            .requests
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    pub fn requests(&self, kind: PromptKind) -> Vec<CompletionRequest> {
        lock(&self.script)
            .requests
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl LlmCapability for ScriptedLlm {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let kind = PromptKind::of(request);
        let reply = {
            let mut script = lock(&self.script);
            script.requests.push((kind, request.clone()));
            script.replies.get_mut(&kind).and_then(VecDeque::pop_front)
        };

        match reply {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::RateLimited) => Err(LlmError::RateLimited("scripted".into())),
            Some(ScriptedReply::Unauthorized) => Err(LlmError::Auth("scripted".into())),
            Some(ScriptedReply::Hang) => {
                std::future::pending::<()>().await;
                Err(LlmError::EmptyResponse)
            }
            None => Err(LlmError::EmptyResponse),
        }
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

#[derive(Default)]
struct ExecutorScript {
    results: VecDeque<Result<QueryResult, ExecutionError>>,
    executed: Vec<String>,
}

/// Executor that returns queued results and records every statement.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<ExecutorScript>>,
    delay: Option<Duration>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_ok(self, result: QueryResult) -> Self {
        lock(&self.script).results.push_back(Ok(result));
        self
    }

    pub fn then_err(self, error: ExecutionError) -> Self {
        lock(&self.script).results.push_back(Err(error));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn executed(&self) -> Vec<String> {
        lock(&self.script).executed.clone()
    }
}

#[async_trait]
impl SqlExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        sql: &str,
        _limits: ExecutionLimits,
    ) -> Result<QueryResult, ExecutionError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = lock(&self.script);
        script.executed.push(sql.to_string());
        script.results.pop_front().unwrap_or_else(|| {
            Err(ExecutionError::new(
                ExecutionErrorKind::Other,
                "no scripted result",
            ))
        })
    }
}

/// Keeps published charts in memory.
#[derive(Clone, Default)]
pub struct InMemoryArtifactSink {
    published: Arc<Mutex<Vec<ChartSpec>>>,
    failing: bool,
}

impl InMemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every publish fails.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn published(&self) -> Vec<ChartSpec> {
        lock(&self.published).clone()
    }
}

#[async_trait]
impl ArtifactSink for InMemoryArtifactSink {
    async fn publish(&self, spec: &ChartSpec) -> Result<ChartArtifact, ArtifactError> {
        if self.failing {
            return Err(ArtifactError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "sink unavailable",
            )));
        }
        lock(&self.published).push(spec.clone());
        Ok(spec.artifact(format!("memory://charts/{}", spec.id)))
    }
}

/// Three-table statistics catalog: countries, life expectancy and GDP.
pub fn sample_catalog() -> SchemaCatalog {
    sample_catalog_version(1)
}

pub fn sample_catalog_version(version: u64) -> SchemaCatalog {
    let mut region = ColumnDef::new("region", "TEXT");
    region.description = Some("Continent or world region, e.g. Oceania".to_string());

    let entries = vec![
        SchemaEntry::new(
            "countries",
            vec![
                ColumnDef::new("code", "TEXT"),
                ColumnDef::new("name", "TEXT"),
                region,
            ],
        )
        .with_description("Countries and the region they belong to"),
        SchemaEntry::new(
            "life_expectancy",
            vec![
                ColumnDef::new("country_code", "TEXT"),
                ColumnDef::new("year", "INT"),
                ColumnDef::new("life_expectancy", "REAL"),
            ],
        )
        .with_description("Life expectancy at birth in years by country and year")
        .with_foreign_key("country_code", "countries", "code"),
        SchemaEntry::new(
            "gdp",
            vec![
                ColumnDef::new("country_code", "TEXT"),
                ColumnDef::new("year", "INT"),
                ColumnDef::new("gdp_usd", "REAL"),
            ],
        )
        .with_description("Gross domestic product by country and year, current US dollars")
        .with_foreign_key("country_code", "countries", "code"),
    ];

    SchemaCatalog::new(version, entries).unwrap_or_else(|_| SchemaCatalog::empty())
}

/// Every table of [`sample_catalog`].
pub fn sample_selection() -> SchemaSelection {
    let catalog = sample_catalog();
    SchemaSelection {
        catalog_version: catalog.version(),
        tables: catalog.entries().to_vec(),
        omitted_join_targets: Vec::new(),
    }
}

pub fn query_result(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
    QueryResult::new(columns.iter().map(|c| ColumnMeta::new(*c)).collect(), rows)
}

/// Context of a data question that has reached SQL generation.
pub fn context_with_selection(question: &str) -> ConversationContext {
    let mut ctx =
        ConversationContext::new("test-run", question, Vec::new(), Arc::new(sample_catalog()));
    let outputs = [
        StageOutput::Triage(TriageOutcome {
            label: TriageLabel::DataQuestion,
            reasoning: String::new(),
            drafted_reply: None,
        }),
        StageOutput::Intent(IntentOutcome {
            label: IntentLabel::NivelPuntual,
            title: None,
            reasoning: String::new(),
        }),
        StageOutput::Schema(sample_selection()),
    ];
    for output in outputs {
        let _ = ctx.record(output);
    }
    ctx
}

pub fn context_with_sql(question: &str, sql: &str) -> ConversationContext {
    let mut ctx = context_with_selection(question);
    let _ = ctx.record(StageOutput::Sql(sql.to_string()));
    ctx
}

pub fn context_with_result(question: &str, sql: &str, result: QueryResult) -> ConversationContext {
    let mut ctx = context_with_sql(question, sql);
    let _ = ctx.record(StageOutput::Execution(result));
    ctx
}

/// Defaults with millisecond backoff and short stage deadlines.
pub fn fast_config() -> PipelineConfig {
    PipelineConfig {
        backoff_base_ms: 1,
        backoff_max_ms: 5,
        run_budget_ms: 10_000,
        timeouts: StageTimeouts::uniform(2_000),
        ..PipelineConfig::default()
    }
}
