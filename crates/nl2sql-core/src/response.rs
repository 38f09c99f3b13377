use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Line,
    Bar,
    StackedBar,
    Pie,
    Scatter,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Bar => "bar",
            ChartType::StackedBar => "stacked_bar",
            ChartType::Pie => "pie",
            ChartType::Scatter => "scatter",
        }
    }
}

/// Reference to a published chart specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartArtifact {
    pub id: String,
    pub chart_type: ChartType,
    pub title: String,
    pub uri: String,
    pub point_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VisualizationOutcome {
    Artifact { artifact: ChartArtifact },
    Skipped { reason: String },
}

impl VisualizationOutcome {
    pub fn artifact(&self) -> Option<&ChartArtifact> {
        match self {
            VisualizationOutcome::Artifact { artifact } => Some(artifact),
            VisualizationOutcome::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseKind {
    /// A verified answer to a data question.
    Answer,
    /// Reply to a greeting or an out-of-scope question.
    NonData,
    /// The run aborted; the text explains what could not be done.
    Degraded,
}

/// The user-facing result of a run. Never carries raw error detail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalResponse {
    pub kind: ResponseKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<ChartArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
}

impl FinalResponse {
    pub fn is_degraded(&self) -> bool {
        self.kind == ResponseKind::Degraded
    }
}
