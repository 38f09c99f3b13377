//! Language-model capability used by the pipeline stages.
//!
//! Stages depend only on [`LlmCapability`]; [`OpenAiCompatClient`] is the
//! production implementation talking to any `/chat/completions` endpoint.

pub mod json;
pub mod provider;
pub mod providers;

pub use json::{extract_json, extract_json_as, fenced_block};
pub use provider::{CompletionRequest, LlmCapability, LlmError, Result};
pub use providers::openai::OpenAiCompatClient;
