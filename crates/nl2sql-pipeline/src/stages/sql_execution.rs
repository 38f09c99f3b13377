use async_trait::async_trait;
use nl2sql_core::{
    ConversationContext, ExecutionErrorKind, ExecutionLimits, PipelineState, SqlExecutor,
    StageOutput, StageResult,
};
use std::sync::Arc;

use super::{SqlGuard, StageHandler};

pub struct SqlExecutionStage {
    executor: Arc<dyn SqlExecutor>,
    guard: SqlGuard,
    limits: ExecutionLimits,
}

impl SqlExecutionStage {
    pub fn new(executor: Arc<dyn SqlExecutor>, guard: SqlGuard, limits: ExecutionLimits) -> Self {
        Self {
            executor,
            guard,
            limits,
        }
    }
}

#[async_trait]
impl StageHandler for SqlExecutionStage {
    fn state(&self) -> PipelineState {
        PipelineState::SqlExecution
    }

    async fn run(&self, ctx: &ConversationContext) -> StageResult<StageOutput> {
        let (Some(sql), Some(selection)) = (ctx.current_sql(), ctx.selected_schema()) else {
            return StageResult::fatal("no SQL to execute");
        };

        // Nothing reaches the database without passing the guard here too.
        if let Err(violation) = self.guard.check(sql, selection) {
            log::error!(
                "[{}] Refusing to execute unvalidated SQL: {}",
                ctx.run_id(),
                violation
            );
            return StageResult::fatal(format!("statement failed validation: {}", violation));
        }

        match self.executor.execute(sql, self.limits).await {
            Ok(result) if result.row_count() > self.limits.row_cap => {
                StageResult::retryable(row_cap_hint(self.limits.row_cap))
            }
            Ok(result) => {
                log::info!(
                    "[{}] Query returned {} rows, {} columns",
                    ctx.run_id(),
                    result.row_count(),
                    result.columns.len()
                );
                StageResult::Success(StageOutput::Execution(result))
            }
            Err(e) => {
                log::warn!("[{}] Query failed: {}", ctx.run_id(), e);
                match e.kind {
                    ExecutionErrorKind::Syntax => StageResult::retryable(format!(
                        "{}. Use only the listed tables and columns.",
                        e
                    )),
                    ExecutionErrorKind::Timeout => StageResult::retryable(format!(
                        "{}. Narrow the query with filters or aggregation.",
                        e
                    )),
                    ExecutionErrorKind::RowCapExceeded => {
                        StageResult::retryable(row_cap_hint(self.limits.row_cap))
                    }
                    ExecutionErrorKind::Permission
                    | ExecutionErrorKind::Connectivity
                    | ExecutionErrorKind::Other => StageResult::fatal(e.to_string()),
                }
            }
        }
    }
}

fn row_cap_hint(row_cap: usize) -> String {
    format!(
        "query returned more than {} rows. Aggregate or filter to return fewer rows.",
        row_cap
    )
}
