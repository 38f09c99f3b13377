use crate::classification::{IntentOutcome, TriageOutcome};
use crate::execution::QueryResult;
use crate::response::{FinalResponse, VisualizationOutcome};
use crate::schema::SchemaSelection;
use crate::verdict::Verdict;
use serde::{Deserialize, Serialize};

/// Outcome of a single stage invocation.
///
/// `Retryable` and `Fatal` carry an internal reason. It is logged and may be
/// fed back to the model as a correction hint, but never shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult<T> {
    Success(T),
    Retryable(String),
    Fatal(String),
}

impl<T> StageResult<T> {
    pub fn retryable(reason: impl Into<String>) -> Self {
        StageResult::Retryable(reason.into())
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        StageResult::Fatal(reason.into())
    }

    pub fn tag(&self) -> OutcomeTag {
        match self {
            StageResult::Success(_) => OutcomeTag::Success,
            StageResult::Retryable(_) => OutcomeTag::Retryable,
            StageResult::Fatal(_) => OutcomeTag::Fatal,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StageResult<U> {
        match self {
            StageResult::Success(v) => StageResult::Success(f(v)),
            StageResult::Retryable(r) => StageResult::Retryable(r),
            StageResult::Fatal(r) => StageResult::Fatal(r),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeTag {
    Success,
    Retryable,
    Fatal,
}

/// Typed payload of a successful stage, one variant per stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Triage(TriageOutcome),
    Intent(IntentOutcome),
    Schema(SchemaSelection),
    Sql(String),
    Execution(QueryResult),
    Verification(Verdict),
    Visualization(VisualizationOutcome),
    Response(FinalResponse),
}

impl StageOutput {
    pub fn kind(&self) -> &'static str {
        match self {
            StageOutput::Triage(_) => "triage",
            StageOutput::Intent(_) => "intent",
            StageOutput::Schema(_) => "schema",
            StageOutput::Sql(_) => "sql",
            StageOutput::Execution(_) => "execution",
            StageOutput::Verification(_) => "verification",
            StageOutput::Visualization(_) => "visualization",
            StageOutput::Response(_) => "response",
        }
    }
}
