//! User-facing wording. Nothing here may carry internal error detail.

use nl2sql_core::{AbortReason, AbortRecord, PipelineState, QueryResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKey {
    GenerationFailed,
    ValidationFailed,
    ExecutionFailed,
    EmptyResults,
    Timeout,
    VisualizationFailed,
    Cancelled,
    Unknown,
}

impl MessageKey {
    /// Pick the message for an aborted run. `result` is the last query
    /// result, if any.
    pub fn for_abort(abort: &AbortRecord, result: Option<&QueryResult>) -> Self {
        match abort.reason {
            AbortReason::Cancelled => MessageKey::Cancelled,
            AbortReason::DeadlineExceeded => MessageKey::Timeout,
            AbortReason::ContractViolation => MessageKey::Unknown,
            AbortReason::VerificationFailed | AbortReason::CorrectionsExhausted
                if result.is_some_and(QueryResult::is_empty) =>
            {
                MessageKey::EmptyResults
            }
            AbortReason::VerificationFailed => MessageKey::ValidationFailed,
            AbortReason::CorrectionsExhausted => MessageKey::ExecutionFailed,
            AbortReason::StageFailed | AbortReason::RetriesExhausted => match abort.stage {
                PipelineState::SqlGeneration => MessageKey::GenerationFailed,
                PipelineState::SqlExecution => MessageKey::ExecutionFailed,
                PipelineState::Verification => MessageKey::ValidationFailed,
                PipelineState::Visualization => MessageKey::VisualizationFailed,
                _ => MessageKey::Unknown,
            },
        }
    }

    pub fn text(&self) -> &'static str {
        match self {
            MessageKey::GenerationFailed => {
                "I couldn't turn your question into a database query."
            }
            MessageKey::ValidationFailed => {
                "I ran a query, but I couldn't confirm that the result answers your question."
            }
            MessageKey::ExecutionFailed => "The database couldn't run the query for your question.",
            MessageKey::EmptyResults => "I couldn't find any data matching your question.",
            MessageKey::Timeout => "Answering your question took longer than allowed.",
            MessageKey::VisualizationFailed => "I found the data, but I couldn't create the chart.",
            MessageKey::Cancelled => "The request was cancelled before an answer was ready.",
            MessageKey::Unknown => "Something went wrong while answering your question.",
        }
    }
}

/// How far a run got, in the user's terms.
pub fn stage_phrase(state: PipelineState) -> &'static str {
    match state {
        PipelineState::Triage => "understanding your question",
        PipelineState::Intent => "working out what kind of answer you need",
        PipelineState::SchemaSelection => "finding the relevant data",
        PipelineState::SqlGeneration => "writing the query",
        PipelineState::SqlExecution => "running the query",
        PipelineState::Verification => "checking the result",
        PipelineState::Visualization => "building the chart",
        PipelineState::ResponseFormatting | PipelineState::Completed => "preparing the answer",
        PipelineState::Aborted => "starting",
    }
}

pub const GENERAL_REPLY: &str = "Hello! I answer questions about the data in the statistical \
database: figures, trends and comparisons. What would you like to know?";

pub const OUT_OF_SCOPE_REPLY: &str = "Sorry, I can only help with questions about the data in \
the statistical database.";

pub const CLARIFICATION_REPLY: &str = "Could you tell me a bit more about what you'd like to \
know? For example, which indicator, which country or region and which period.";

pub const RETRY_SUGGESTION: &str = "You could try rephrasing or narrowing the question.";
