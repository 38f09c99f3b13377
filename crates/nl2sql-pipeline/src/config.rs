use nl2sql_core::PipelineState;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    /// Deterministic plausibility checks only.
    #[default]
    Code,
    /// Ask the model, falling back to the code checks when it is unavailable.
    Llm,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Token overlap between the question and table/column names.
    #[default]
    Lexical,
    /// Model-assigned relevance scores.
    Llm,
}

/// Per-stage deadlines in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(default = "default_triage_ms")]
    pub triage_ms: u64,
    #[serde(default = "default_intent_ms")]
    pub intent_ms: u64,
    #[serde(default = "default_schema_selection_ms")]
    pub schema_selection_ms: u64,
    #[serde(default = "default_sql_generation_ms")]
    pub sql_generation_ms: u64,
    #[serde(default = "default_sql_execution_ms")]
    pub sql_execution_ms: u64,
    #[serde(default = "default_verification_ms")]
    pub verification_ms: u64,
    #[serde(default = "default_visualization_ms")]
    pub visualization_ms: u64,
    #[serde(default = "default_response_formatting_ms")]
    pub response_formatting_ms: u64,
}

fn default_triage_ms() -> u64 {
    15_000
}

fn default_intent_ms() -> u64 {
    15_000
}

fn default_schema_selection_ms() -> u64 {
    15_000
}

fn default_sql_generation_ms() -> u64 {
    60_000
}

fn default_sql_execution_ms() -> u64 {
    50_000
}

fn default_verification_ms() -> u64 {
    20_000
}

fn default_visualization_ms() -> u64 {
    15_000
}

fn default_response_formatting_ms() -> u64 {
    5_000
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            triage_ms: default_triage_ms(),
            intent_ms: default_intent_ms(),
            schema_selection_ms: default_schema_selection_ms(),
            sql_generation_ms: default_sql_generation_ms(),
            sql_execution_ms: default_sql_execution_ms(),
            verification_ms: default_verification_ms(),
            visualization_ms: default_visualization_ms(),
            response_formatting_ms: default_response_formatting_ms(),
        }
    }
}

impl StageTimeouts {
    pub fn for_state(&self, state: PipelineState) -> Duration {
        let ms = match state {
            PipelineState::Triage => self.triage_ms,
            PipelineState::Intent => self.intent_ms,
            PipelineState::SchemaSelection => self.schema_selection_ms,
            PipelineState::SqlGeneration => self.sql_generation_ms,
            PipelineState::SqlExecution => self.sql_execution_ms,
            PipelineState::Verification => self.verification_ms,
            PipelineState::Visualization => self.visualization_ms,
            PipelineState::ResponseFormatting => self.response_formatting_ms,
            PipelineState::Completed | PipelineState::Aborted => 0,
        };
        Duration::from_millis(ms)
    }

    /// Same deadline for every stage.
    pub fn uniform(ms: u64) -> Self {
        Self {
            triage_ms: ms,
            intent_ms: ms,
            schema_selection_ms: ms,
            sql_generation_ms: ms,
            sql_execution_ms: ms,
            verification_ms: ms,
            visualization_ms: ms,
            response_formatting_ms: ms,
        }
    }
}

/// Pipeline configuration. Every field has a default, so an empty YAML
/// document is a valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Retries per stage invocation before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Wall-clock budget for a whole run
    #[serde(default = "default_run_budget_ms")]
    pub run_budget_ms: u64,
    /// Returns to SQL generation allowed per run
    #[serde(default = "default_max_corrections")]
    pub max_corrections: usize,
    #[serde(default)]
    pub timeouts: StageTimeouts,
    /// Maximum rows a query may return
    #[serde(default = "default_row_cap")]
    pub row_cap: usize,
    #[serde(default = "default_max_tables")]
    pub max_tables: usize,
    /// Approximate prompt tokens the selected schema may occupy
    #[serde(default = "default_schema_token_budget")]
    pub schema_token_budget: usize,
    #[serde(default)]
    pub scoring: ScoringMode,
    #[serde(default)]
    pub verification_mode: VerificationMode,
    #[serde(default = "default_max_chart_categories")]
    pub max_chart_categories: usize,
    /// Prior turns rendered into prompts
    #[serde(default = "default_history_window")]
    pub history_window: usize,
    /// sqlparser dialect name used by the static guard
    #[serde(default = "default_sql_dialect")]
    pub sql_dialect: String,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Public prefix for artifact URIs; file paths are used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_base_url: Option<String>,
}

fn default_max_retries() -> u32 {
    2
}

fn default_backoff_base_ms() -> u64 {
    250
}

fn default_backoff_max_ms() -> u64 {
    4_000
}

fn default_run_budget_ms() -> u64 {
    120_000
}

fn default_max_corrections() -> usize {
    1
}

fn default_row_cap() -> usize {
    5_000
}

fn default_max_tables() -> usize {
    8
}

fn default_schema_token_budget() -> usize {
    6_000
}

fn default_max_chart_categories() -> usize {
    10
}

fn default_history_window() -> usize {
    10
}

fn default_sql_dialect() -> String {
    "generic".to_string()
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("artifacts")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            run_budget_ms: default_run_budget_ms(),
            max_corrections: default_max_corrections(),
            timeouts: StageTimeouts::default(),
            row_cap: default_row_cap(),
            max_tables: default_max_tables(),
            schema_token_budget: default_schema_token_budget(),
            scoring: ScoringMode::default(),
            verification_mode: VerificationMode::default(),
            max_chart_categories: default_max_chart_categories(),
            history_window: default_history_window(),
            sql_dialect: default_sql_dialect(),
            artifact_dir: default_artifact_dir(),
            artifact_base_url: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = if raw.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.row_cap == 0 {
            return Err(ConfigError::Invalid("row_cap must be positive".to_string()));
        }
        if self.max_tables == 0 {
            return Err(ConfigError::Invalid("max_tables must be positive".to_string()));
        }
        if self.max_chart_categories < 2 {
            return Err(ConfigError::Invalid(
                "max_chart_categories must be at least 2".to_string(),
            ));
        }
        if self.backoff_base_ms > self.backoff_max_ms {
            return Err(ConfigError::Invalid(
                "backoff_base_ms exceeds backoff_max_ms".to_string(),
            ));
        }
        if sqlparser::dialect::dialect_from_str(&self.sql_dialect).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown sql_dialect '{}'",
                self.sql_dialect
            )));
        }
        Ok(())
    }

    pub fn run_budget(&self) -> Duration {
        Duration::from_millis(self.run_budget_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}
