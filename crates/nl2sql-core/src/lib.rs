//! Core data model for the NL-to-SQL pipeline.
//!
//! This crate owns the per-run [`ConversationContext`], the schema catalog
//! and its hot-swappable index, the stage contract, and the pure transition
//! function that drives the orchestrator. It performs no I/O of its own
//! except loading a catalog file through [`schema::JsonFileSchemaSource`].

pub mod classification;
pub mod context;
pub mod events;
pub mod execution;
pub mod response;
pub mod schema;
pub mod stage;
pub mod state;
pub mod verdict;

pub use classification::{IntentLabel, IntentOutcome, TriageLabel, TriageOutcome};
pub use context::{
    AbortRecord, ContextError, ConversationContext, Correction, SqlAttempt, StageFailure, Turn,
};
pub use events::PipelineEvent;
pub use execution::{
    ColumnMeta, ExecutionError, ExecutionErrorKind, ExecutionLimits, QueryResult, SqlExecutor,
};
pub use response::{ChartArtifact, ChartType, FinalResponse, ResponseKind, VisualizationOutcome};
pub use schema::{
    ColumnDef, ForeignKey, OmittedJoin, OmissionReason, SchemaCatalog, SchemaEntry, SchemaError,
    SchemaIndex, SchemaSelection, SchemaSource,
};
pub use stage::{OutcomeTag, StageOutput, StageResult};
pub use state::{transition, AbortReason, BranchFacts, PipelineState, Transition, TransitionError};
pub use verdict::{Verdict, VerdictStatus};
