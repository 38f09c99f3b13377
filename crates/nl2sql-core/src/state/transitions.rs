use super::PipelineState;
use crate::classification::{IntentLabel, TriageLabel};
use crate::context::ConversationContext;
use crate::stage::OutcomeTag;
use crate::verdict::VerdictStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a run ended in `Aborted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortReason {
    /// A stage returned a fatal outcome.
    StageFailed,
    /// A stage kept returning retryable outcomes until the budget ran out.
    RetriesExhausted,
    /// The correction loop ran out of attempts after an execution failure.
    CorrectionsExhausted,
    /// Verification failed and no correction attempts remain.
    VerificationFailed,
    DeadlineExceeded,
    Cancelled,
    /// A stage produced output the context refused to record.
    ContractViolation,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::StageFailed => "stage_failed",
            AbortReason::RetriesExhausted => "retries_exhausted",
            AbortReason::CorrectionsExhausted => "corrections_exhausted",
            AbortReason::VerificationFailed => "verification_failed",
            AbortReason::DeadlineExceeded => "deadline_exceeded",
            AbortReason::Cancelled => "cancelled",
            AbortReason::ContractViolation => "contract_violation",
        }
    }
}

/// Facts read from the context that decide a branch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BranchFacts {
    pub triage: Option<TriageLabel>,
    pub intent: Option<IntentLabel>,
    pub verdict: Option<VerdictStatus>,
    pub corrections_used: usize,
    pub max_corrections: usize,
}

impl BranchFacts {
    pub fn from_context(ctx: &ConversationContext, max_corrections: usize) -> Self {
        Self {
            triage: ctx.triage().map(|t| t.label),
            intent: ctx.intent().map(|i| i.label),
            verdict: ctx.current_verdict().map(|v| v.status),
            corrections_used: ctx.corrections().len(),
            max_corrections,
        }
    }

    pub fn corrections_remaining(&self) -> bool {
        self.corrections_used < self.max_corrections
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Move to the given state.
    Advance(PipelineState),
    /// Re-run the same stage after a backoff.
    Retry,
    /// Record a correction and return to SQL generation.
    Correct,
    Abort(AbortReason),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("no transitions out of terminal state {0}")]
    TerminalState(PipelineState),
}

/// The pipeline's branch table.
///
/// Pure: the outcome tag of the stage that just ran plus the facts already
/// recorded in the context fully determine the next step.
pub fn transition(
    state: PipelineState,
    outcome: OutcomeTag,
    facts: &BranchFacts,
) -> Result<Transition, TransitionError> {
    use PipelineState::*;

    if state.is_terminal() {
        return Err(TransitionError::TerminalState(state));
    }

    let next = match (state, outcome) {
        (_, OutcomeTag::Fatal) => Transition::Abort(AbortReason::StageFailed),

        (SqlExecution, OutcomeTag::Retryable) => {
            if facts.corrections_remaining() {
                Transition::Correct
            } else {
                Transition::Abort(AbortReason::CorrectionsExhausted)
            }
        }
        (_, OutcomeTag::Retryable) => Transition::Retry,

        (Triage, OutcomeTag::Success) => match facts.triage {
            Some(TriageLabel::DataQuestion) => Transition::Advance(Intent),
            Some(TriageLabel::General) | Some(TriageLabel::OutOfScope) => {
                Transition::Advance(ResponseFormatting)
            }
            None => Transition::Abort(AbortReason::ContractViolation),
        },
        (Intent, OutcomeTag::Success) => Transition::Advance(SchemaSelection),
        (SchemaSelection, OutcomeTag::Success) => Transition::Advance(SqlGeneration),
        (SqlGeneration, OutcomeTag::Success) => Transition::Advance(SqlExecution),
        (SqlExecution, OutcomeTag::Success) => Transition::Advance(Verification),
        (Verification, OutcomeTag::Success) => match facts.verdict {
            Some(VerdictStatus::Fail) => {
                if facts.corrections_remaining() {
                    Transition::Correct
                } else {
                    Transition::Abort(AbortReason::VerificationFailed)
                }
            }
            Some(VerdictStatus::Pass) | Some(VerdictStatus::Uncertain) => {
                if facts.intent.map(|i| i.wants_visualization()).unwrap_or(false) {
                    Transition::Advance(Visualization)
                } else {
                    Transition::Advance(ResponseFormatting)
                }
            }
            None => Transition::Abort(AbortReason::ContractViolation),
        },
        (Visualization, OutcomeTag::Success) => Transition::Advance(ResponseFormatting),
        (ResponseFormatting, OutcomeTag::Success) => Transition::Advance(Completed),

        (Completed, _) | (Aborted, _) => return Err(TransitionError::TerminalState(state)),
    };

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    fn data_facts() -> BranchFacts {
        BranchFacts {
            triage: Some(TriageLabel::DataQuestion),
            intent: Some(IntentLabel::NivelPuntual),
            verdict: None,
            corrections_used: 0,
            max_corrections: 1,
        }
    }

    #[test]
    fn test_forward_path_for_point_lookup() {
        let mut facts = data_facts();
        let path = [
            (Triage, Intent),
            (Intent, SchemaSelection),
            (SchemaSelection, SqlGeneration),
            (SqlGeneration, SqlExecution),
            (SqlExecution, Verification),
        ];
        for (from, to) in path {
            assert_eq!(
                transition(from, OutcomeTag::Success, &facts).unwrap(),
                Transition::Advance(to)
            );
        }

        facts.verdict = Some(VerdictStatus::Pass);
        assert_eq!(
            transition(Verification, OutcomeTag::Success, &facts).unwrap(),
            Transition::Advance(ResponseFormatting)
        );
        assert_eq!(
            transition(ResponseFormatting, OutcomeTag::Success, &facts).unwrap(),
            Transition::Advance(Completed)
        );
    }

    #[test]
    fn test_visualization_only_when_intent_asks_for_it() {
        let mut facts = data_facts();
        facts.verdict = Some(VerdictStatus::Uncertain);
        facts.intent = Some(IntentLabel::RequiereViz);
        assert_eq!(
            transition(Verification, OutcomeTag::Success, &facts).unwrap(),
            Transition::Advance(Visualization)
        );
        assert_eq!(
            transition(Visualization, OutcomeTag::Success, &facts).unwrap(),
            Transition::Advance(ResponseFormatting)
        );
    }

    #[test]
    fn test_non_data_triage_skips_to_formatting() {
        for label in [TriageLabel::General, TriageLabel::OutOfScope] {
            let facts = BranchFacts {
                triage: Some(label),
                ..Default::default()
            };
            assert_eq!(
                transition(Triage, OutcomeTag::Success, &facts).unwrap(),
                Transition::Advance(ResponseFormatting)
            );
        }
    }

    #[test]
    fn test_failed_verification_corrects_then_aborts() {
        let mut facts = data_facts();
        facts.verdict = Some(VerdictStatus::Fail);
        assert_eq!(
            transition(Verification, OutcomeTag::Success, &facts).unwrap(),
            Transition::Correct
        );

        facts.corrections_used = 1;
        assert_eq!(
            transition(Verification, OutcomeTag::Success, &facts).unwrap(),
            Transition::Abort(AbortReason::VerificationFailed)
        );
    }

    #[test]
    fn test_retryable_execution_enters_correction_loop() {
        let mut facts = data_facts();
        assert_eq!(
            transition(SqlExecution, OutcomeTag::Retryable, &facts).unwrap(),
            Transition::Correct
        );
        facts.corrections_used = 1;
        assert_eq!(
            transition(SqlExecution, OutcomeTag::Retryable, &facts).unwrap(),
            Transition::Abort(AbortReason::CorrectionsExhausted)
        );
    }

    #[test]
    fn test_retryable_elsewhere_retries_and_fatal_aborts() {
        let facts = data_facts();
        for state in PipelineState::STAGES {
            if state != SqlExecution {
                assert_eq!(
                    transition(state, OutcomeTag::Retryable, &facts).unwrap(),
                    Transition::Retry
                );
            }
            assert_eq!(
                transition(state, OutcomeTag::Fatal, &facts).unwrap(),
                Transition::Abort(AbortReason::StageFailed)
            );
        }
    }

    #[test]
    fn test_terminal_states_have_no_transitions() {
        let facts = data_facts();
        assert!(transition(Completed, OutcomeTag::Success, &facts).is_err());
        assert!(transition(Aborted, OutcomeTag::Fatal, &facts).is_err());
    }
}
