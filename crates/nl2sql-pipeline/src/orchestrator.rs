//! The run loop: invoke the stage for the current state, record its output,
//! ask the transition table where to go next, repeat until terminal.

use nl2sql_core::{
    transition, AbortReason, AbortRecord, BranchFacts, ConversationContext, ExecutionLimits,
    FinalResponse, OutcomeTag, PipelineEvent, PipelineState, SchemaIndex, SqlExecutor,
    StageOutput, StageResult, Transition, Turn,
};
use nl2sql_llm::LlmCapability;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::artifacts::ArtifactSink;
use crate::config::{PipelineConfig, ScoringMode, VerificationMode};
use crate::retry::RetryDecision;
use crate::stages::{
    format_response, IntentStage, LexicalScorer, LlmScorer, RelevanceScorer,
    ResponseFormattingStage, SchemaSelectionStage, SelectionLimits, SqlExecutionStage,
    SqlGenerationStage, SqlGuard, StageHandler, TriageStage, VerificationStage,
    VisualizationStage,
};
use crate::timer::StepTimer;
use crate::trace::RunTrace;

/// One question to answer.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub question: String,
    pub history: Vec<Turn>,
    /// Caller-supplied id; a UUID is generated when absent.
    pub run_id: Option<String>,
}

impl RunRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub response: FinalResponse,
    pub trace: RunTrace,
    pub context: ConversationContext,
}

impl RunOutcome {
    pub fn final_state(&self) -> PipelineState {
        if self.context.abort().is_some() {
            PipelineState::Aborted
        } else {
            PipelineState::Completed
        }
    }
}

struct EventSink {
    run_id: String,
    tx: Option<mpsc::Sender<PipelineEvent>>,
}

impl EventSink {
    /// Never waits on the reader; events are dropped while the channel is full.
    fn emit(&self, event: PipelineEvent) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::debug!("[{}] Event channel full, dropping {:?}", self.run_id, event);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("[{}] Event receiver dropped", self.run_id);
            }
        }
    }
}

/// Drives runs through the stage handlers.
///
/// A pipeline is shared across concurrent runs; each run owns its context
/// and pins the schema catalog that was current when it started.
pub struct Pipeline {
    stages: HashMap<PipelineState, Arc<dyn StageHandler>>,
    schema: Arc<SchemaIndex>,
    config: PipelineConfig,
}

impl Pipeline {
    /// Wire the default stage handlers from the capabilities.
    pub fn new(
        llm: Arc<dyn LlmCapability>,
        executor: Arc<dyn SqlExecutor>,
        schema: Arc<SchemaIndex>,
        sink: Arc<dyn ArtifactSink>,
        config: PipelineConfig,
    ) -> Self {
        let scorer: Arc<dyn RelevanceScorer> = match config.scoring {
            ScoringMode::Lexical => Arc::new(LexicalScorer),
            ScoringMode::Llm => Arc::new(LlmScorer::new(llm.clone())),
        };
        let verification = match config.verification_mode {
            VerificationMode::Code => VerificationStage::code(),
            VerificationMode::Llm => VerificationStage::llm(llm.clone()),
        };
        let limits = ExecutionLimits {
            timeout: config.timeouts.for_state(PipelineState::SqlExecution),
            row_cap: config.row_cap,
        };

        let handlers: Vec<Arc<dyn StageHandler>> = vec![
            Arc::new(TriageStage::new(llm.clone(), config.history_window)),
            Arc::new(IntentStage::new(llm.clone(), config.history_window)),
            Arc::new(SchemaSelectionStage::new(
                scorer,
                SelectionLimits {
                    max_tables: config.max_tables,
                    token_budget: config.schema_token_budget,
                },
            )),
            Arc::new(SqlGenerationStage::new(
                llm,
                config.sql_dialect.clone(),
                config.history_window,
            )),
            Arc::new(SqlExecutionStage::new(
                executor,
                SqlGuard::new(config.sql_dialect.clone()),
                limits,
            )),
            Arc::new(verification),
            Arc::new(VisualizationStage::new(sink, config.max_chart_categories)),
            Arc::new(ResponseFormattingStage),
        ];
        Self::from_stages(handlers, schema, config)
    }

    pub fn from_stages(
        handlers: Vec<Arc<dyn StageHandler>>,
        schema: Arc<SchemaIndex>,
        config: PipelineConfig,
    ) -> Self {
        let stages = handlers.into_iter().map(|h| (h.state(), h)).collect();
        Self {
            stages,
            schema,
            config,
        }
    }

    /// Replace the handler for the state it declares.
    pub fn with_stage(mut self, handler: Arc<dyn StageHandler>) -> Self {
        self.stages.insert(handler.state(), handler);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn schema(&self) -> &Arc<SchemaIndex> {
        &self.schema
    }

    /// Answer a question. Always returns a response, degraded on failure.
    pub async fn run(&self, question: &str, history: Vec<Turn>) -> FinalResponse {
        self.run_with(
            RunRequest::new(question).with_history(history),
            CancellationToken::new(),
            None,
        )
        .await
        .response
    }

    pub async fn run_with(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
        events: Option<mpsc::Sender<PipelineEvent>>,
    ) -> RunOutcome {
        let run_id = request
            .run_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let started = Instant::now();
        let deadline = started + self.config.run_budget();
        let policy = self.config.retry_policy();
        let events = EventSink {
            run_id: run_id.clone(),
            tx: events,
        };

        let mut ctx = ConversationContext::new(
            run_id.clone(),
            request.question,
            request.history,
            self.schema.snapshot(),
        );
        let mut trace = RunTrace::new(PipelineState::Triage);
        let mut state = PipelineState::Triage;
        let mut attempt: u32 = 0;

        log::info!(
            "[{}] Run started (catalog v{}): {}",
            run_id,
            ctx.schema().version(),
            ctx.question()
        );

        while !state.is_terminal() {
            if cancel.is_cancelled() {
                state = abort(&mut ctx, &mut trace, state, AbortReason::Cancelled, None, attempt);
                continue;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                state = abort(
                    &mut ctx,
                    &mut trace,
                    state,
                    AbortReason::DeadlineExceeded,
                    None,
                    attempt,
                );
                continue;
            }
            let Some(handler) = self.stages.get(&state).cloned() else {
                log::error!("[{}] No handler registered for {}", run_id, state);
                state = abort(
                    &mut ctx,
                    &mut trace,
                    state,
                    AbortReason::ContractViolation,
                    None,
                    attempt,
                );
                continue;
            };

            events
                .emit(PipelineEvent::StageStarted {
                    run_id: run_id.clone(),
                    stage: state,
                    attempt,
                });

            let stage_timeout = self.config.timeouts.for_state(state).min(remaining);
            let timer = StepTimer::start(state.as_str());
            let raced = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = tokio::time::timeout(stage_timeout, handler.run(&ctx)) => Some(result),
            };
            let elapsed_ms = timer.finish(&run_id);

            let result = match raced {
                None => {
                    state = abort(&mut ctx, &mut trace, state, AbortReason::Cancelled, None, attempt);
                    continue;
                }
                Some(Ok(result)) => result,
                Some(Err(_)) if Instant::now() >= deadline => {
                    state = abort(
                        &mut ctx,
                        &mut trace,
                        state,
                        AbortReason::DeadlineExceeded,
                        None,
                        attempt,
                    );
                    continue;
                }
                Some(Err(_)) => StageResult::retryable(format!(
                    "{} timed out after {}ms",
                    state,
                    stage_timeout.as_millis()
                )),
            };

            let outcome = result.tag();
            events
                .emit(PipelineEvent::StageCompleted {
                    run_id: run_id.clone(),
                    stage: state,
                    outcome,
                    elapsed_ms,
                });

            match result {
                StageResult::Success(output) => {
                    if let Err(e) = ctx.record(output) {
                        log::error!("[{}] {} output rejected: {}", run_id, state, e);
                        state = abort(
                            &mut ctx,
                            &mut trace,
                            state,
                            AbortReason::ContractViolation,
                            Some(outcome),
                            attempt,
                        );
                        continue;
                    }
                }
                StageResult::Retryable(reason) | StageResult::Fatal(reason) => {
                    log::warn!("[{}] {} {:?}: {}", run_id, state, outcome, reason);
                    ctx.push_failure(state, outcome, reason);
                }
            }

            let facts = BranchFacts::from_context(&ctx, self.config.max_corrections);
            let next = transition(state, outcome, &facts).unwrap_or_else(|e| {
                log::error!("[{}] {}", run_id, e);
                Transition::Abort(AbortReason::ContractViolation)
            });

            match next {
                Transition::Advance(to) => {
                    log::debug!("[{}] {} -> {}", run_id, state, to);
                    trace.record(state, to, Some(outcome), attempt);
                    state = to;
                    attempt = 0;
                }
                Transition::Retry => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match policy.decide(attempt, remaining) {
                        RetryDecision::RetryAfter(delay) => {
                            log::info!(
                                "[{}] Retrying {} in {}ms (retry {}/{})",
                                run_id,
                                state,
                                delay.as_millis(),
                                attempt + 1,
                                policy.max_retries()
                            );
                            events
                                .emit(PipelineEvent::StageRetrying {
                                    run_id: run_id.clone(),
                                    stage: state,
                                    attempt: attempt + 1,
                                    delay_ms: delay.as_millis() as u64,
                                });
                            trace.record(state, state, Some(outcome), attempt);
                            let cancelled = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => true,
                                _ = tokio::time::sleep(delay) => false,
                            };
                            if cancelled {
                                state = abort(
                                    &mut ctx,
                                    &mut trace,
                                    state,
                                    AbortReason::Cancelled,
                                    None,
                                    attempt,
                                );
                                continue;
                            }
                            attempt += 1;
                        }
                        RetryDecision::GiveUp => {
                            state = abort(
                                &mut ctx,
                                &mut trace,
                                state,
                                AbortReason::RetriesExhausted,
                                Some(outcome),
                                attempt,
                            );
                        }
                    }
                }
                Transition::Correct => {
                    let hint = ctx
                        .latest_problem(state)
                        .unwrap_or_else(|| "the previous query was rejected".to_string());
                    if let Err(e) = ctx.push_correction(state, hint) {
                        log::error!("[{}] Correction refused: {}", run_id, e);
                        state = abort(
                            &mut ctx,
                            &mut trace,
                            state,
                            AbortReason::ContractViolation,
                            Some(outcome),
                            attempt,
                        );
                        continue;
                    }
                    let round = ctx.corrections().len();
                    log::info!(
                        "[{}] Correction round {} from {}",
                        run_id,
                        round,
                        state
                    );
                    events
                        .emit(PipelineEvent::Correction {
                            run_id: run_id.clone(),
                            from_stage: state,
                            round,
                        });
                    trace.record(state, PipelineState::SqlGeneration, Some(outcome), attempt);
                    state = PipelineState::SqlGeneration;
                    attempt = 0;
                }
                Transition::Abort(reason) => {
                    state = abort(&mut ctx, &mut trace, state, reason, Some(outcome), attempt);
                }
            }
        }

        let response = match ctx.final_response() {
            Some(response) => response.clone(),
            None => {
                let response = format_response(&ctx);
                let _ = ctx.record(StageOutput::Response(response.clone()));
                response
            }
        };

        let total_ms = started.elapsed().as_millis();
        match ctx.abort() {
            Some(record) => {
                log::warn!(
                    "[{}] Run aborted at {} ({}) after {}ms",
                    run_id,
                    record.stage,
                    record.reason.as_str(),
                    total_ms
                );
                events
                    .emit(PipelineEvent::Aborted {
                        run_id: run_id.clone(),
                        reason: record.reason,
                        stage: record.stage,
                    });
            }
            None => {
                log::info!(
                    "[{}] Run completed in {}ms ({} SQL attempts)",
                    run_id,
                    total_ms,
                    ctx.sql_attempts().len()
                );
                events
                    .emit(PipelineEvent::Completed {
                        run_id: run_id.clone(),
                        kind: response.kind,
                    });
            }
        }

        RunOutcome {
            run_id,
            response,
            trace,
            context: ctx,
        }
    }
}

fn abort(
    ctx: &mut ConversationContext,
    trace: &mut RunTrace,
    state: PipelineState,
    reason: AbortReason,
    outcome: Option<OutcomeTag>,
    attempt: u32,
) -> PipelineState {
    let record = AbortRecord {
        reason,
        stage: state,
        furthest_stage: trace.furthest(),
    };
    if let Err(e) = ctx.mark_aborted(record) {
        log::error!("[{}] {}", ctx.run_id(), e);
    }
    log::warn!("[{}] Aborting in {}: {}", ctx.run_id(), state, reason.as_str());
    trace.record(state, PipelineState::Aborted, outcome, attempt);
    PipelineState::Aborted
}
