use async_trait::async_trait;
use nl2sql_core::{ConversationContext, PipelineState, StageOutput, StageResult};
use nl2sql_llm::{extract_json, fenced_block, LlmCapability};
use std::sync::Arc;

use super::{llm_failure, SqlGuard, StageHandler};
use crate::prompts;

pub struct SqlGenerationStage {
    llm: Arc<dyn LlmCapability>,
    guard: SqlGuard,
    dialect: String,
    history_window: usize,
}

impl SqlGenerationStage {
    pub fn new(
        llm: Arc<dyn LlmCapability>,
        dialect: impl Into<String>,
        history_window: usize,
    ) -> Self {
        let dialect = dialect.into();
        Self {
            llm,
            guard: SqlGuard::new(dialect.clone()),
            dialect,
            history_window,
        }
    }
}

/// Pull the statement out of model output: a fenced block, a `{"sql": ...}`
/// object, or the raw text.
pub fn extract_sql(raw: &str) -> Option<String> {
    let candidate = fenced_block(raw)
        .map(str::to_string)
        .or_else(|| {
            extract_json(raw)
                .and_then(|v| v.get("sql").and_then(|s| s.as_str()).map(str::to_string))
        })
        .unwrap_or_else(|| raw.to_string());

    let sql = candidate.trim().trim_end_matches(';').trim();
    if sql.is_empty() {
        None
    } else {
        Some(sql.to_string())
    }
}

#[async_trait]
impl StageHandler for SqlGenerationStage {
    fn state(&self) -> PipelineState {
        PipelineState::SqlGeneration
    }

    async fn run(&self, ctx: &ConversationContext) -> StageResult<StageOutput> {
        let Some(selection) = ctx.selected_schema() else {
            return StageResult::fatal("no schema selected before generation");
        };

        let request = prompts::sql_generation(ctx, self.history_window, &self.dialect);
        let raw = match self.llm.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => return llm_failure("sql generation", &e),
        };

        let Some(sql) = extract_sql(&raw) else {
            return StageResult::retryable("model returned no SQL");
        };

        if let Err(violation) = self.guard.check(&sql, selection) {
            log::warn!("[{}] Generated SQL rejected: {}", ctx.run_id(), violation);
            return StageResult::retryable(violation.to_string());
        }

        log::info!("[{}] Generated SQL: {}", ctx.run_id(), sql);
        StageResult::Success(StageOutput::Sql(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{context_with_selection, ScriptedLlm};
    use nl2sql_core::OutcomeTag;

    #[test]
    fn test_extract_sql_variants() {
        assert_eq!(
            extract_sql("Here:\n```sql\nSELECT year FROM gdp;\n```").as_deref(),
            Some("SELECT year FROM gdp")
        );
        assert_eq!(
            extract_sql(r#"{"sql": "SELECT year FROM gdp"}"#).as_deref(),
            Some("SELECT year FROM gdp")
        );
        assert_eq!(
            extract_sql("  SELECT 1 ; ").as_deref(),
            Some("SELECT 1")
        );
        assert_eq!(extract_sql("  "), None);
    }

    #[tokio::test]
    async fn test_guard_rejection_is_retryable() {
        let llm = ScriptedLlm::new().on_generation("```sql\nDELETE FROM gdp\n```");
        let stage = SqlGenerationStage::new(Arc::new(llm), "generic", 10);
        let ctx = context_with_selection("How many rows?");

        let result = stage.run(&ctx).await;
        assert_eq!(result.tag(), OutcomeTag::Retryable);
    }

    #[tokio::test]
    async fn test_valid_sql_succeeds() {
        let llm = ScriptedLlm::new().on_generation("```sql\nSELECT year, gdp_usd FROM gdp\n```");
        let stage = SqlGenerationStage::new(Arc::new(llm), "generic", 10);
        let ctx = context_with_selection("GDP by year");

        match stage.run(&ctx).await {
            StageResult::Success(StageOutput::Sql(sql)) => {
                assert_eq!(sql, "SELECT year, gdp_usd FROM gdp")
            }
            other => panic!("unexpected result: {:?}", other.tag()),
        }
    }
}
