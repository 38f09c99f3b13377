//! Stage handlers and the orchestrator that turns a natural-language
//! question into a verified, formatted answer.
//!
//! [`Pipeline::run`] always returns a [`nl2sql_core::FinalResponse`]; failures
//! surface as degraded responses, never as errors.

pub mod artifacts;
pub mod config;
pub mod messages;
pub mod orchestrator;
pub mod prompts;
pub mod retry;
pub mod stages;
pub mod test_utils;
pub mod timer;
pub mod trace;

pub use artifacts::{ArtifactError, ArtifactSink, ChartSpec, DataPoint, FileArtifactSink};
pub use config::{ConfigError, PipelineConfig, ScoringMode, StageTimeouts, VerificationMode};
pub use orchestrator::{Pipeline, RunOutcome, RunRequest};
pub use retry::{RetryDecision, RetryPolicy};
pub use stages::StageHandler;
pub use trace::{RunTrace, TraceStep};
