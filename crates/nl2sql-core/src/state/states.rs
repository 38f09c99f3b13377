use serde::{Deserialize, Serialize};
use std::fmt;

/// Orchestrator position. Eight stage states plus two terminals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Triage,
    Intent,
    SchemaSelection,
    SqlGeneration,
    SqlExecution,
    Verification,
    Visualization,
    ResponseFormatting,
    Completed,
    Aborted,
}

impl PipelineState {
    pub const STAGES: [PipelineState; 8] = [
        PipelineState::Triage,
        PipelineState::Intent,
        PipelineState::SchemaSelection,
        PipelineState::SqlGeneration,
        PipelineState::SqlExecution,
        PipelineState::Verification,
        PipelineState::Visualization,
        PipelineState::ResponseFormatting,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Completed | PipelineState::Aborted)
    }

    /// Position along the forward path; terminals sort last.
    pub fn order(&self) -> u8 {
        match self {
            PipelineState::Triage => 0,
            PipelineState::Intent => 1,
            PipelineState::SchemaSelection => 2,
            PipelineState::SqlGeneration => 3,
            PipelineState::SqlExecution => 4,
            PipelineState::Verification => 5,
            PipelineState::Visualization => 6,
            PipelineState::ResponseFormatting => 7,
            PipelineState::Completed | PipelineState::Aborted => 8,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Triage => "triage",
            PipelineState::Intent => "intent",
            PipelineState::SchemaSelection => "schema_selection",
            PipelineState::SqlGeneration => "sql_generation",
            PipelineState::SqlExecution => "sql_execution",
            PipelineState::Verification => "verification",
            PipelineState::Visualization => "visualization",
            PipelineState::ResponseFormatting => "response_formatting",
            PipelineState::Completed => "completed",
            PipelineState::Aborted => "aborted",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
