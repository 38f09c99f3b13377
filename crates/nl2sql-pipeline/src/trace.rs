use nl2sql_core::{OutcomeTag, PipelineState};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceStep {
    pub from: PipelineState,
    pub to: PipelineState,
    /// `None` for orchestrator-initiated moves such as cancellation.
    pub outcome: Option<OutcomeTag>,
    /// Retry number of the invocation that produced this step.
    pub attempt: u32,
}

/// Ordered record of every state change in a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunTrace {
    steps: Vec<TraceStep>,
    entered: Vec<PipelineState>,
}

impl RunTrace {
    pub fn new(initial: PipelineState) -> Self {
        Self {
            steps: Vec::new(),
            entered: vec![initial],
        }
    }

    pub fn record(
        &mut self,
        from: PipelineState,
        to: PipelineState,
        outcome: Option<OutcomeTag>,
        attempt: u32,
    ) {
        self.steps.push(TraceStep {
            from,
            to,
            outcome,
            attempt,
        });
        if from != to {
            self.entered.push(to);
        }
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    /// States in the order they were entered, starting with the initial state.
    pub fn branch_sequence(&self) -> &[PipelineState] {
        &self.entered
    }

    /// Furthest non-terminal state along the forward path.
    pub fn furthest(&self) -> PipelineState {
        self.entered
            .iter()
            .filter(|s| !s.is_terminal())
            .max_by_key(|s| s.order())
            .copied()
            .unwrap_or(PipelineState::Triage)
    }

    pub fn visited(&self, state: PipelineState) -> bool {
        self.entered.contains(&state)
    }
}
