use async_trait::async_trait;
use nl2sql_core::{
    ConversationContext, PipelineState, QueryResult, StageOutput, StageResult, Verdict,
    VerdictStatus,
};
use nl2sql_llm::{extract_json_as, LlmCapability};
use serde::Deserialize;
use std::sync::Arc;

use super::StageHandler;
use crate::prompts;

const EXISTENCE_PREFIXES: &[&str] = &[
    "is ", "are ", "does ", "do ", "did ", "was ", "were ", "any ", "has ", "have ", "hay ",
    "existe ", "existen ", "¿hay ", "¿existe ", "¿existen ",
];

const SINGLE_VALUE_PREFIXES: &[&str] = &[
    "what is ", "what was ", "how many ", "how much ", "cuál es ", "cual es ", "cuál fue ",
    "cuánto ", "cuanto ", "cuántos ", "cuántas ", "¿cuál es ", "¿cuánto ", "¿cuántos ",
    "¿cuántas ",
];

const GROUPING_MARKERS: &[&str] = &[
    " by ", " per ", " each ", " por ", " cada ", "trend", "over time", "evolution",
    "evolución",
];

/// Deterministic plausibility checks on a result.
pub fn code_verdict(question: &str, result: &QueryResult) -> Verdict {
    let q = question.trim().to_lowercase();

    if result.is_empty() {
        if EXISTENCE_PREFIXES.iter().any(|p| q.starts_with(p)) {
            return Verdict::uncertain("query returned no rows; the answer may be that none exist");
        }
        return Verdict::fail("query returned no rows")
            .with_suggestion("check filter values and joins against the listed columns");
    }

    let null_columns: Vec<&str> = result
        .columns
        .iter()
        .enumerate()
        .filter(|(idx, _)| result.column_values(*idx).all(|v| v.is_null()))
        .map(|(_, c)| c.name.as_str())
        .collect();
    if !null_columns.is_empty() {
        let mut verdict = Verdict::uncertain("some result columns contain only nulls");
        for column in null_columns {
            verdict = verdict.with_issue(format!("column '{}' is null in every row", column));
        }
        return verdict;
    }

    let expects_single = SINGLE_VALUE_PREFIXES.iter().any(|p| q.starts_with(p))
        && !GROUPING_MARKERS.iter().any(|m| q.contains(m));
    if expects_single && result.row_count() > 1 {
        return Verdict::uncertain(format!(
            "question expects a single value but {} rows were returned",
            result.row_count()
        ));
    }

    Verdict::pass("result shape is plausible")
}

#[derive(Deserialize)]
struct VerdictReply {
    #[serde(alias = "status")]
    verdict: String,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    issues: Vec<String>,
    #[serde(default)]
    suggestion: Option<String>,
}

pub struct VerificationStage {
    llm: Option<Arc<dyn LlmCapability>>,
}

impl VerificationStage {
    /// Code checks only.
    pub fn code() -> Self {
        Self { llm: None }
    }

    /// Code checks first; results they pass are also judged by the model.
    pub fn llm(llm: Arc<dyn LlmCapability>) -> Self {
        Self { llm: Some(llm) }
    }

    async fn model_verdict(
        &self,
        llm: &dyn LlmCapability,
        ctx: &ConversationContext,
        sql: &str,
        result: &QueryResult,
    ) -> Option<Verdict> {
        let request = prompts::verification(ctx.question(), sql, result);
        let raw = match llm.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("[{}] LLM verification unavailable: {}", ctx.run_id(), e);
                return None;
            }
        };
        let reply: VerdictReply = match extract_json_as(&raw) {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("[{}] LLM verification unusable: {}", ctx.run_id(), e);
                return None;
            }
        };
        let status = VerdictStatus::parse(&reply.verdict)?;
        Some(Verdict {
            status,
            rationale: reply.rationale,
            issues: reply.issues,
            suggestion: reply.suggestion.filter(|s| !s.trim().is_empty()),
        })
    }
}

#[async_trait]
impl StageHandler for VerificationStage {
    fn state(&self) -> PipelineState {
        PipelineState::Verification
    }

    async fn run(&self, ctx: &ConversationContext) -> StageResult<StageOutput> {
        let (Some(sql), Some(result)) = (ctx.current_sql(), ctx.current_result()) else {
            return StageResult::fatal("no result to verify");
        };

        let mut verdict = code_verdict(ctx.question(), result);
        if verdict.status != VerdictStatus::Fail {
            if let Some(llm) = &self.llm {
                if let Some(judged) = self.model_verdict(llm.as_ref(), ctx, sql, result).await {
                    verdict = judged;
                }
            }
        }

        log::info!(
            "[{}] Verification: {:?} ({})",
            ctx.run_id(),
            verdict.status,
            verdict.rationale
        );
        StageResult::Success(StageOutput::Verification(verdict))
    }
}
