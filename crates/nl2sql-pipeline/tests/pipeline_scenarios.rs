//! End-to-end runs of the pipeline against scripted capabilities.

use nl2sql_core::{
    AbortReason, ChartType, ColumnDef, ExecutionError, ExecutionErrorKind, PipelineState,
    ResponseKind, SchemaEntry, SchemaIndex,
};
use nl2sql_pipeline::messages::MessageKey;
use nl2sql_pipeline::test_utils::{
    fast_config, query_result, sample_catalog, InMemoryArtifactSink, PromptKind,
    ScriptedExecutor, ScriptedLlm, ScriptedReply,
};
use nl2sql_pipeline::{Pipeline, PipelineConfig, RunOutcome, RunRequest};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use PipelineState::*;

const DATA_TRIAGE: &str = r#"{"label": "data_question", "reasoning": "asks for statistics"}"#;
const POINT_INTENT: &str = r#"{"intent": "nivel_puntual", "reasoning": "one figure"}"#;
const VIZ_INTENT: &str =
    r#"{"intent": "requiere_viz", "title": "GDP of Chile", "reasoning": "a trend"}"#;

const OCEANIA_SQL: &str = "SELECT AVG(l.life_expectancy) AS avg_life_expectancy \
FROM life_expectancy l JOIN countries c ON c.code = l.country_code \
WHERE c.region = 'Oceania' AND l.year = 2020";

const GDP_TREND_SQL: &str = "SELECT g.year, g.gdp_usd FROM gdp g \
JOIN countries c ON c.code = g.country_code WHERE c.name = 'Chile' ORDER BY g.year";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    llm: ScriptedLlm,
    executor: ScriptedExecutor,
    sink: InMemoryArtifactSink,
    schema: Arc<SchemaIndex>,
    pipeline: Pipeline,
}

fn harness(llm: ScriptedLlm, executor: ScriptedExecutor, config: PipelineConfig) -> Harness {
    harness_with_sink(llm, executor, InMemoryArtifactSink::new(), config)
}

fn harness_with_sink(
    llm: ScriptedLlm,
    executor: ScriptedExecutor,
    sink: InMemoryArtifactSink,
    config: PipelineConfig,
) -> Harness {
    let schema = Arc::new(SchemaIndex::new(sample_catalog()));
    let pipeline = Pipeline::new(
        Arc::new(llm.clone()),
        Arc::new(executor.clone()),
        schema.clone(),
        Arc::new(sink.clone()),
        config,
    );
    Harness {
        llm,
        executor,
        sink,
        schema,
        pipeline,
    }
}

async fn run(harness: &Harness, question: &str) -> RunOutcome {
    harness
        .pipeline
        .run_with(RunRequest::new(question), CancellationToken::new(), None)
        .await
}

fn sql_block(sql: &str) -> String {
    format!("```sql\n{}\n```", sql)
}

fn gdp_trend_llm() -> ScriptedLlm {
    ScriptedLlm::new()
        .on_triage(DATA_TRIAGE)
        .on_intent(VIZ_INTENT)
        .on_generation(sql_block(GDP_TREND_SQL))
}

fn gdp_trend_executor() -> ScriptedExecutor {
    ScriptedExecutor::new().then_ok(query_result(
        &["year", "gdp_usd"],
        vec![
            vec![json!(2019), json!(278.6)],
            vec![json!(2020), json!(252.9)],
            vec![json!(2021), json!(317.1)],
        ],
    ))
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_point_lookup_life_expectancy_oceania() {
    let llm = ScriptedLlm::new()
        .on_triage(DATA_TRIAGE)
        .on_intent(POINT_INTENT)
        .on_generation(sql_block(OCEANIA_SQL));
    let executor = ScriptedExecutor::new().then_ok(query_result(
        &["avg_life_expectancy"],
        vec![vec![json!(78.4567)]],
    ));
    let h = harness(llm, executor, fast_config());

    let outcome = run(&h, "What is the life expectancy in Oceania?").await;

    assert_eq!(outcome.final_state(), Completed);
    assert_eq!(
        outcome.trace.branch_sequence(),
        &[
            Triage,
            Intent,
            SchemaSelection,
            SqlGeneration,
            SqlExecution,
            Verification,
            ResponseFormatting,
            Completed
        ]
    );
    assert_eq!(outcome.response.kind, ResponseKind::Answer);
    assert_eq!(outcome.response.text, "Avg life expectancy: 78.46");
    assert_eq!(outcome.response.sql.as_deref(), Some(OCEANIA_SQL));
    assert!(outcome.response.artifacts.is_empty());
    assert_eq!(h.executor.executed(), vec![OCEANIA_SQL.to_string()]);

    let selection = outcome.context.selected_schema().unwrap();
    assert_eq!(selection.tables[0].table, "life_expectancy");
    assert!(selection.table("countries").is_some());
}

#[tokio::test]
async fn test_gdp_trend_produces_line_chart() {
    let h = harness(gdp_trend_llm(), gdp_trend_executor(), fast_config());

    let outcome = run(&h, "How has the GDP of Chile evolved over time?").await;

    assert_eq!(outcome.final_state(), Completed);
    assert!(outcome.trace.visited(Visualization));
    assert_eq!(outcome.response.kind, ResponseKind::Answer);
    assert_eq!(outcome.response.artifacts.len(), 1);

    let artifact = &outcome.response.artifacts[0];
    assert_eq!(artifact.chart_type, ChartType::Line);
    assert_eq!(artifact.title, "GDP of Chile");
    assert_eq!(artifact.point_count, 3);
    assert!(outcome.response.text.contains("Chart: GDP of Chile"));

    let published = h.sink.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].x_label, "year");
}

// ---------------------------------------------------------------------------
// Correction loop and guard feedback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_guard_rejection_feeds_next_generation() {
    let llm = ScriptedLlm::new()
        .on_triage(DATA_TRIAGE)
        .on_intent(POINT_INTENT)
        .on_generation(sql_block("SELECT pib FROM gdp WHERE year = 2020"))
        .on_generation(sql_block("SELECT SUM(gdp_usd) AS total_gdp FROM gdp WHERE year = 2020"));
    let executor = ScriptedExecutor::new().then_ok(query_result(
        &["total_gdp"],
        vec![vec![json!(84.5)]],
    ));
    let h = harness(llm, executor, fast_config());

    let outcome = run(&h, "What was total GDP in 2020?").await;

    assert_eq!(outcome.final_state(), Completed);
    let requests = h.llm.requests(PromptKind::Generation);
    assert_eq!(requests.len(), 2);
    assert!(requests[1]
        .prompt
        .contains("rejected because:\n- column 'pib' is not in the provided schema"));
    assert_eq!(h.executor.executed().len(), 1);
    assert!(outcome.context.corrections().is_empty());
}

#[tokio::test]
async fn test_execution_error_triggers_correction() {
    let first = "SELECT gdp_usd FROM gdp WHERE year = 2020";
    let second = "SELECT SUM(gdp_usd) AS total_gdp FROM gdp WHERE year = 2020";
    let llm = ScriptedLlm::new()
        .on_triage(DATA_TRIAGE)
        .on_intent(POINT_INTENT)
        .on_generation(sql_block(first))
        .on_generation(sql_block(second));
    let executor = ScriptedExecutor::new()
        .then_err(ExecutionError::new(
            ExecutionErrorKind::Syntax,
            "Invalid column name 'gdp_usd'",
        ))
        .then_ok(query_result(&["total_gdp"], vec![vec![json!(84.5)]]));
    let h = harness(llm, executor, fast_config());

    let outcome = run(&h, "What was total GDP in 2020?").await;

    assert_eq!(outcome.final_state(), Completed);
    assert_eq!(outcome.context.corrections().len(), 1);
    assert_eq!(outcome.context.sql_attempts().len(), 2);
    assert_eq!(
        outcome.context.sql_attempts()[0].execution_error.as_deref(),
        Some("syntax error: Invalid column name 'gdp_usd'. Use only the listed tables and columns.")
    );
    assert_eq!(h.executor.executed(), vec![first.to_string(), second.to_string()]);

    let retry_prompt = &h.llm.requests(PromptKind::Generation)[1].prompt;
    assert!(retry_prompt.contains(first));
    assert!(retry_prompt.contains("Invalid column name 'gdp_usd'"));
    assert_eq!(outcome.response.sql.as_deref(), Some(second));
}

#[tokio::test]
async fn test_repeated_execution_error_exhausts_corrections() {
    let sql = "SELECT gdp_usd FROM gdp WHERE year = 2020";
    let llm = ScriptedLlm::new()
        .on_triage(DATA_TRIAGE)
        .on_intent(POINT_INTENT)
        .on_generation(sql_block(sql))
        .on_generation(sql_block(sql));
    let executor = ScriptedExecutor::new()
        .then_err(ExecutionError::new(
            ExecutionErrorKind::Syntax,
            "Invalid column name 'pib'",
        ))
        .then_err(ExecutionError::new(
            ExecutionErrorKind::Syntax,
            "Invalid column name 'pib'",
        ));
    let h = harness(llm, executor, fast_config());

    let outcome = run(&h, "What was total GDP in 2020?").await;

    assert_eq!(outcome.final_state(), Aborted);
    let abort = outcome.context.abort().copied().unwrap();
    assert_eq!(abort.reason, AbortReason::CorrectionsExhausted);
    assert_eq!(abort.stage, SqlExecution);
    assert_eq!(outcome.context.corrections().len(), 1);
    assert_eq!(h.executor.executed().len(), 2);

    let text = &outcome.response.text;
    assert!(outcome.response.is_degraded());
    assert!(text.starts_with(MessageKey::ExecutionFailed.text()));
    assert!(!text.contains("pib"));
    assert!(!text.contains("Invalid column name"));
}

#[tokio::test]
async fn test_empty_results_exhaust_corrections() {
    let sql = "SELECT gdp_usd FROM gdp WHERE year = 1066";
    let llm = ScriptedLlm::new()
        .on_triage(DATA_TRIAGE)
        .on_intent(POINT_INTENT)
        .on_generation(sql_block(sql))
        .on_generation(sql_block(sql));
    let executor = ScriptedExecutor::new()
        .then_ok(query_result(&["gdp_usd"], vec![]))
        .then_ok(query_result(&["gdp_usd"], vec![]));
    let h = harness(llm, executor, fast_config());

    let outcome = run(&h, "GDP of Chile in 1066").await;

    assert_eq!(outcome.final_state(), Aborted);
    let abort = outcome.context.abort().copied().unwrap();
    assert_eq!(abort.reason, AbortReason::VerificationFailed);
    assert_eq!(outcome.context.corrections().len(), 1);
    assert!(outcome.response.is_degraded());
    assert!(outcome
        .response
        .text
        .starts_with(MessageKey::EmptyResults.text()));
    assert!(outcome.response.text.contains("\"GDP of Chile in 1066\""));
}

// ---------------------------------------------------------------------------
// Safety
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_out_of_scope_never_generates_or_executes() {
    let llm = ScriptedLlm::new().on_triage(
        r#"{"label": "out_of_scope", "reasoning": "weather", "reply": "I can only answer questions about the statistics database."}"#,
    );
    let h = harness(llm, ScriptedExecutor::new(), fast_config());

    let outcome = run(&h, "Will it rain tomorrow?").await;

    assert_eq!(outcome.final_state(), Completed);
    assert_eq!(
        outcome.trace.branch_sequence(),
        &[Triage, ResponseFormatting, Completed]
    );
    assert_eq!(outcome.response.kind, ResponseKind::NonData);
    assert_eq!(
        outcome.response.text,
        "I can only answer questions about the statistics database."
    );
    assert_eq!(h.llm.calls(PromptKind::Generation), 0);
    assert!(h.executor.executed().is_empty());
}

#[tokio::test]
async fn test_mutating_sql_never_reaches_execution() {
    let llm = ScriptedLlm::new()
        .on_triage(DATA_TRIAGE)
        .on_intent(POINT_INTENT)
        .on_generation(sql_block("DELETE FROM gdp"))
        .on_generation(sql_block("DROP TABLE gdp"))
        .on_generation(sql_block("SELECT year FROM gdp; DELETE FROM gdp"));
    let h = harness(llm, ScriptedExecutor::new(), fast_config());

    let outcome = run(&h, "Remove all GDP rows").await;

    assert_eq!(outcome.final_state(), Aborted);
    assert!(h.executor.executed().is_empty());
    assert_eq!(h.llm.calls(PromptKind::Generation), 3);
    let abort = outcome.context.abort().copied().unwrap();
    assert_eq!(abort.reason, AbortReason::RetriesExhausted);
    assert_eq!(abort.stage, SqlGeneration);
    assert!(outcome
        .response
        .text
        .starts_with(MessageKey::GenerationFailed.text()));
    assert!(!outcome.response.text.contains("DELETE"));
}

// ---------------------------------------------------------------------------
// Determinism, time bounds, cancellation, schema swap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_identical_inputs_take_identical_paths() {
    let question = "How has the GDP of Chile evolved over time?";
    let a = harness(gdp_trend_llm(), gdp_trend_executor(), fast_config());
    let b = harness(gdp_trend_llm(), gdp_trend_executor(), fast_config());

    let first = run(&a, question).await;
    let second = run(&b, question).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.trace.branch_sequence(), second.trace.branch_sequence());
    assert_eq!(first.response, second.response);
    assert_eq!(a.sink.published(), b.sink.published());
}

#[tokio::test]
async fn test_retry_time_is_bounded() {
    let config = PipelineConfig {
        max_retries: 2,
        backoff_base_ms: 50,
        backoff_max_ms: 100,
        ..fast_config()
    };
    let llm = ScriptedLlm::new()
        .reply(PromptKind::Triage, ScriptedReply::RateLimited)
        .reply(PromptKind::Triage, ScriptedReply::RateLimited)
        .reply(PromptKind::Triage, ScriptedReply::RateLimited)
        .reply(PromptKind::Triage, ScriptedReply::RateLimited);
    let h = harness(llm, ScriptedExecutor::new(), config);
    let policy = h.pipeline.config().retry_policy();

    let started = Instant::now();
    let outcome = run(&h, "GDP of Chile").await;
    let elapsed = started.elapsed();

    assert_eq!(h.llm.calls(PromptKind::Triage), 3);
    assert_eq!(
        outcome.context.abort().map(|a| a.reason),
        Some(AbortReason::RetriesExhausted)
    );
    assert!(elapsed >= policy.total_backoff());
    assert!(elapsed < policy.total_backoff() + Duration::from_secs(1));
}

#[tokio::test]
async fn test_run_deadline_caps_hanging_stage() {
    let config = PipelineConfig {
        run_budget_ms: 200,
        ..fast_config()
    };
    let llm = ScriptedLlm::new().reply(PromptKind::Triage, ScriptedReply::Hang);
    let h = harness(llm, ScriptedExecutor::new(), config);

    let started = Instant::now();
    let outcome = run(&h, "GDP of Chile").await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(
        outcome.context.abort().map(|a| a.reason),
        Some(AbortReason::DeadlineExceeded)
    );
    assert!(outcome.response.text.starts_with(MessageKey::Timeout.text()));
}

#[tokio::test]
async fn test_cancellation_aborts_running_stage() {
    let llm = ScriptedLlm::new()
        .on_triage(DATA_TRIAGE)
        .on_intent(POINT_INTENT)
        .on_generation(sql_block(OCEANIA_SQL));
    let executor = ScriptedExecutor::new().with_delay(Duration::from_secs(10));
    let h = harness(llm, executor, fast_config());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = h
        .pipeline
        .run_with(
            RunRequest::new("What is the life expectancy in Oceania?"),
            cancel,
            None,
        )
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(outcome.final_state(), Aborted);
    let abort = outcome.context.abort().copied().unwrap();
    assert_eq!(abort.reason, AbortReason::Cancelled);
    assert_eq!(abort.stage, SqlExecution);
    assert_eq!(outcome.trace.branch_sequence().last(), Some(&Aborted));
    assert!(outcome.response.text.starts_with(MessageKey::Cancelled.text()));
}

#[tokio::test]
async fn test_schema_swap_mid_run_keeps_pinned_catalog() {
    let llm = ScriptedLlm::new()
        .on_triage(DATA_TRIAGE)
        .on_intent(POINT_INTENT)
        .on_generation(sql_block(OCEANIA_SQL))
        .with_delay(Duration::from_millis(40));
    let executor = ScriptedExecutor::new().then_ok(query_result(
        &["avg_life_expectancy"],
        vec![vec![json!(78.4567)]],
    ));
    let h = harness(llm, executor, fast_config());

    let schema = h.schema.clone();
    let swap = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        schema.replace(vec![SchemaEntry::new(
            "population",
            vec![ColumnDef::new("total", "INT")],
        )])
    });

    let outcome = run(&h, "What is the life expectancy in Oceania?").await;
    let new_version = swap.await.unwrap().unwrap();

    assert_eq!(outcome.final_state(), Completed);
    assert_eq!(outcome.context.schema().version(), 1);
    assert_eq!(
        outcome.context.selected_schema().unwrap().catalog_version,
        1
    );
    assert_eq!(new_version, 2);
    assert_eq!(h.schema.snapshot().version(), 2);
    assert!(!h.schema.snapshot().contains("life_expectancy"));
}

#[tokio::test]
async fn test_chart_failure_degrades_but_keeps_answer() {
    let h = harness_with_sink(
        gdp_trend_llm(),
        gdp_trend_executor(),
        InMemoryArtifactSink::failing(),
        fast_config(),
    );

    let outcome = run(&h, "How has the GDP of Chile evolved over time?").await;

    assert_eq!(outcome.final_state(), Aborted);
    assert_eq!(
        outcome.context.abort().map(|a| a.stage),
        Some(Visualization)
    );
    assert!(outcome.response.is_degraded());
    assert!(outcome
        .response
        .text
        .starts_with(MessageKey::VisualizationFailed.text()));
    assert!(outcome.response.text.contains("Found 3 rows."));
    assert_eq!(outcome.response.row_count, Some(3));
}
