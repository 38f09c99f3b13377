use crate::classification::{IntentOutcome, TriageOutcome};
use crate::execution::QueryResult;
use crate::response::{FinalResponse, VisualizationOutcome};
use crate::schema::{SchemaCatalog, SchemaSelection};
use crate::stage::{OutcomeTag, StageOutput};
use crate::state::{AbortReason, PipelineState};
use crate::verdict::Verdict;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("{0} already recorded")]
    AlreadyRecorded(&'static str),

    #[error("no open SQL attempt to record {0} against")]
    NoOpenAttempt(&'static str),
}

/// A prior question/answer pair from the same conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub question: String,
    pub answer: String,
}

/// One generated query together with what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlAttempt {
    pub sql: String,
    pub result: Option<QueryResult>,
    pub execution_error: Option<String>,
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub stage: PipelineState,
    pub outcome: OutcomeTag,
    pub reason: String,
    /// Number of corrections recorded when the failure happened.
    pub round: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub from_stage: PipelineState,
    pub hint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AbortRecord {
    pub reason: AbortReason,
    /// State the run was in when it aborted.
    pub stage: PipelineState,
    /// Furthest state along the forward path the run entered.
    pub furthest_stage: PipelineState,
}

/// Per-run record of everything the stages produced.
///
/// Append-only: single-valued fields are set once and rejected on a second
/// write, SQL attempts and failures only grow. Each correction opens room
/// for exactly one more SQL attempt. Only the orchestrator holds a mutable
/// reference; stages read it.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    run_id: String,
    question: String,
    history: Vec<Turn>,
    schema: Arc<SchemaCatalog>,
    triage: Option<TriageOutcome>,
    intent: Option<IntentOutcome>,
    selected_schema: Option<SchemaSelection>,
    sql_attempts: Vec<SqlAttempt>,
    corrections: Vec<Correction>,
    failures: Vec<StageFailure>,
    visualization: Option<VisualizationOutcome>,
    final_response: Option<FinalResponse>,
    abort: Option<AbortRecord>,
}

impl ConversationContext {
    pub fn new(
        run_id: impl Into<String>,
        question: impl Into<String>,
        history: Vec<Turn>,
        schema: Arc<SchemaCatalog>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            question: question.into(),
            history,
            schema,
            triage: None,
            intent: None,
            selected_schema: None,
            sql_attempts: Vec::new(),
            corrections: Vec::new(),
            failures: Vec::new(),
            visualization: None,
            final_response: None,
            abort: None,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Schema snapshot pinned at run start.
    pub fn schema(&self) -> &Arc<SchemaCatalog> {
        &self.schema
    }

    pub fn triage(&self) -> Option<&TriageOutcome> {
        self.triage.as_ref()
    }

    pub fn intent(&self) -> Option<&IntentOutcome> {
        self.intent.as_ref()
    }

    pub fn selected_schema(&self) -> Option<&SchemaSelection> {
        self.selected_schema.as_ref()
    }

    pub fn sql_attempts(&self) -> &[SqlAttempt] {
        &self.sql_attempts
    }

    pub fn corrections(&self) -> &[Correction] {
        &self.corrections
    }

    pub fn failures(&self) -> &[StageFailure] {
        &self.failures
    }

    pub fn visualization(&self) -> Option<&VisualizationOutcome> {
        self.visualization.as_ref()
    }

    pub fn final_response(&self) -> Option<&FinalResponse> {
        self.final_response.as_ref()
    }

    pub fn abort(&self) -> Option<&AbortRecord> {
        self.abort.as_ref()
    }

    /// The attempt of the current correction round, if SQL has been
    /// generated for it.
    pub fn current_attempt(&self) -> Option<&SqlAttempt> {
        if self.sql_attempts.len() == self.corrections.len() + 1 {
            self.sql_attempts.last()
        } else {
            None
        }
    }

    pub fn current_sql(&self) -> Option<&str> {
        self.current_attempt().map(|a| a.sql.as_str())
    }

    pub fn current_result(&self) -> Option<&QueryResult> {
        self.current_attempt().and_then(|a| a.result.as_ref())
    }

    pub fn current_verdict(&self) -> Option<&Verdict> {
        self.current_attempt().and_then(|a| a.verdict.as_ref())
    }

    /// Hint left by the latest correction, while its new attempt is pending.
    pub fn pending_correction(&self) -> Option<&Correction> {
        if self.sql_attempts.len() == self.corrections.len() {
            self.corrections.last()
        } else {
            None
        }
    }

    /// Reasons SQL generation was rejected within the current round.
    pub fn generation_feedback(&self) -> Vec<&str> {
        let round = self.corrections.len();
        self.failures
            .iter()
            .filter(|f| f.stage == PipelineState::SqlGeneration && f.round == round)
            .map(|f| f.reason.as_str())
            .collect()
    }

    /// The most recent problem reported by `stage`, used as a correction hint.
    pub fn latest_problem(&self, stage: PipelineState) -> Option<String> {
        if stage == PipelineState::Verification {
            if let Some(verdict) = self.current_verdict() {
                return Some(verdict.correction_hint());
            }
        }
        self.failures
            .iter()
            .rev()
            .find(|f| f.stage == stage)
            .map(|f| f.reason.clone())
    }

    /// Record a successful stage payload.
    pub fn record(&mut self, output: StageOutput) -> Result<(), ContextError> {
        match output {
            StageOutput::Triage(t) => set_once(&mut self.triage, t, "triage"),
            StageOutput::Intent(i) => set_once(&mut self.intent, i, "intent"),
            StageOutput::Schema(s) => set_once(&mut self.selected_schema, s, "selected_schema"),
            StageOutput::Sql(sql) => {
                if self.sql_attempts.len() != self.corrections.len() {
                    return Err(ContextError::AlreadyRecorded("sql"));
                }
                self.sql_attempts.push(SqlAttempt {
                    sql,
                    result: None,
                    execution_error: None,
                    verdict: None,
                });
                Ok(())
            }
            StageOutput::Execution(result) => {
                let attempt = self.current_attempt_mut("execution_result")?;
                if attempt.result.is_some() {
                    return Err(ContextError::AlreadyRecorded("execution_result"));
                }
                attempt.result = Some(result);
                Ok(())
            }
            StageOutput::Verification(verdict) => {
                let attempt = self.current_attempt_mut("verdict")?;
                if attempt.result.is_none() {
                    return Err(ContextError::NoOpenAttempt("verdict"));
                }
                if attempt.verdict.is_some() {
                    return Err(ContextError::AlreadyRecorded("verdict"));
                }
                attempt.verdict = Some(verdict);
                Ok(())
            }
            StageOutput::Visualization(v) => set_once(&mut self.visualization, v, "visualization"),
            StageOutput::Response(r) => set_once(&mut self.final_response, r, "final_response"),
        }
    }

    /// Record a retryable or fatal stage outcome.
    pub fn push_failure(
        &mut self,
        stage: PipelineState,
        outcome: OutcomeTag,
        reason: impl Into<String>,
    ) {
        let reason = reason.into();
        if stage == PipelineState::SqlExecution {
            if let Ok(attempt) = self.current_attempt_mut("execution_error") {
                if attempt.result.is_none() && attempt.execution_error.is_none() {
                    attempt.execution_error = Some(reason.clone());
                }
            }
        }
        self.failures.push(StageFailure {
            stage,
            outcome,
            reason,
            round: self.corrections.len(),
        });
    }

    /// Close the current attempt and open a new correction round.
    pub fn push_correction(
        &mut self,
        from_stage: PipelineState,
        hint: impl Into<String>,
    ) -> Result<(), ContextError> {
        if self.current_attempt().is_none() {
            return Err(ContextError::NoOpenAttempt("correction"));
        }
        self.corrections.push(Correction {
            from_stage,
            hint: hint.into(),
        });
        Ok(())
    }

    pub fn mark_aborted(&mut self, record: AbortRecord) -> Result<(), ContextError> {
        set_once(&mut self.abort, record, "abort")
    }

    fn current_attempt_mut(&mut self, what: &'static str) -> Result<&mut SqlAttempt, ContextError> {
        if self.sql_attempts.len() != self.corrections.len() + 1 {
            return Err(ContextError::NoOpenAttempt(what));
        }
        self.sql_attempts
            .last_mut()
            .ok_or(ContextError::NoOpenAttempt(what))
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, what: &'static str) -> Result<(), ContextError> {
    if slot.is_some() {
        return Err(ContextError::AlreadyRecorded(what));
    }
    *slot = Some(value);
    Ok(())
}
