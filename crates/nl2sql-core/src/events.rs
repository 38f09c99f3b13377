use crate::response::ResponseKind;
use crate::stage::OutcomeTag;
use crate::state::{AbortReason, PipelineState};
use serde::{Deserialize, Serialize};

/// Progress notifications emitted while a run advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted {
        run_id: String,
        stage: PipelineState,
        attempt: u32,
    },

    StageCompleted {
        run_id: String,
        stage: PipelineState,
        outcome: OutcomeTag,
        elapsed_ms: u64,
    },

    StageRetrying {
        run_id: String,
        stage: PipelineState,
        attempt: u32,
        delay_ms: u64,
    },

    /// The run returned to SQL generation with a correction hint.
    Correction {
        run_id: String,
        from_stage: PipelineState,
        round: usize,
    },

    Completed {
        run_id: String,
        kind: ResponseKind,
    },

    Aborted {
        run_id: String,
        reason: AbortReason,
        stage: PipelineState,
    },
}

impl PipelineEvent {
    pub fn run_id(&self) -> &str {
        match self {
            PipelineEvent::StageStarted { run_id, .. }
            | PipelineEvent::StageCompleted { run_id, .. }
            | PipelineEvent::StageRetrying { run_id, .. }
            | PipelineEvent::Correction { run_id, .. }
            | PipelineEvent::Completed { run_id, .. }
            | PipelineEvent::Aborted { run_id, .. } => run_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineEvent::Completed { .. } | PipelineEvent::Aborted { .. }
        )
    }
}
