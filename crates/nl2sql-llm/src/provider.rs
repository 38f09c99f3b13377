use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Malformed model output: {0}")]
    MalformedOutput(String),

    #[error("Empty response from model")]
    EmptyResponse,
}

impl LlmError {
    /// Timeouts, rate limits, server errors and malformed output are
    /// transient; rejected credentials and client errors are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Http(e) => !e.is_builder(),
            LlmError::Api { status, .. } => *status >= 500 || *status == 408,
            LlmError::Auth(_) => false,
            LlmError::Json(_)
            | LlmError::RateLimited(_)
            | LlmError::Timeout(_)
            | LlmError::MalformedOutput(_)
            | LlmError::EmptyResponse => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, LlmError>;

/// A single-shot completion: system instructions plus one user prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Ask the endpoint for a JSON object response.
    pub json_output: bool,
    /// Override the client's default model.
    pub model: Option<String>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            max_tokens: None,
            temperature: Some(0.0),
            json_output: false,
            model: None,
        }
    }

    pub fn json(mut self) -> Self {
        self.json_output = true;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[async_trait]
pub trait LlmCapability: Send + Sync {
    /// Complete the request and return the raw text of the first choice.
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Model identifier used when the request does not override it.
    fn model(&self) -> &str;
}
