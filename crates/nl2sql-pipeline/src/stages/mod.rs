//! Stage handlers. Each handler reads the context and returns a tagged
//! result; none of them mutate the context or decide what runs next.

pub mod formatting;
pub mod intent;
pub mod schema_selection;
pub mod sql_execution;
pub mod sql_generation;
pub mod sql_guard;
pub mod triage;
pub mod verification;
pub mod visualization;

use async_trait::async_trait;
use nl2sql_core::{ConversationContext, PipelineState, StageOutput, StageResult};
use nl2sql_llm::LlmError;

pub use formatting::{format_response, ResponseFormattingStage};
pub use intent::IntentStage;
pub use schema_selection::{
    select_tables, LexicalScorer, LlmScorer, RelevanceScorer, SchemaSelectionStage,
    SelectionLimits,
};
pub use sql_execution::SqlExecutionStage;
pub use sql_generation::{extract_sql, SqlGenerationStage};
pub use sql_guard::{GuardViolation, SqlGuard};
pub use triage::TriageStage;
pub use verification::{code_verdict, VerificationStage};
pub use visualization::{build_chart_spec, plan_chart, ChartPlan, VisualizationStage};

#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The state this handler runs in.
    fn state(&self) -> PipelineState;

    async fn run(&self, ctx: &ConversationContext) -> StageResult<StageOutput>;
}

/// Retryable for transient model failures, fatal otherwise.
pub(crate) fn llm_failure<T>(stage: &str, err: &LlmError) -> StageResult<T> {
    if err.is_retryable() {
        StageResult::retryable(format!("{}: {}", stage, err))
    } else {
        StageResult::fatal(format!("{}: {}", stage, err))
    }
}
