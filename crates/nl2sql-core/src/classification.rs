use serde::{Deserialize, Serialize};

/// Triage decision for an incoming question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageLabel {
    DataQuestion,
    General,
    OutOfScope,
}

impl TriageLabel {
    /// Parse a label emitted by the classifier.
    ///
    /// Unrecognised labels resolve to `DataQuestion` so that an ambiguous
    /// classification still reaches the data path instead of being rejected.
    pub fn parse_lenient(raw: &str) -> Self {
        if Self::requests_clarification(raw) {
            return TriageLabel::General;
        }
        match normalize(raw).as_str() {
            "general" | "greeting" | "chitchat" | "small_talk" => TriageLabel::General,
            "out_of_scope" | "outofscope" | "off_topic" | "unsupported" => TriageLabel::OutOfScope,
            // Follow-ups and chart requests are data questions read with the history window.
            "data_question" | "follow_up" | "viz_request" => TriageLabel::DataQuestion,
            _ => TriageLabel::DataQuestion,
        }
    }

    /// Whether the classifier found the question too vague to query. Such
    /// questions are answered as `General` with a clarifying question.
    pub fn requests_clarification(raw: &str) -> bool {
        matches!(
            normalize(raw).as_str(),
            "needs_clarification" | "clarification" | "clarify"
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriageLabel::DataQuestion => "data_question",
            TriageLabel::General => "general",
            TriageLabel::OutOfScope => "out_of_scope",
        }
    }

    pub fn is_data_question(&self) -> bool {
        matches!(self, TriageLabel::DataQuestion)
    }
}

/// Shape of answer a data question calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    /// A point lookup answered by a value or a small table.
    NivelPuntual,
    /// A trend, comparison or distribution that benefits from a chart.
    RequiereViz,
}

impl IntentLabel {
    /// Parse an intent label. Unknown labels fall back to `NivelPuntual`.
    pub fn parse_lenient(raw: &str) -> Self {
        match normalize(raw).as_str() {
            "requiere_viz" | "requiere_visualizacion" | "requires_viz" | "visualization"
            | "chart" => IntentLabel::RequiereViz,
            _ => IntentLabel::NivelPuntual,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::NivelPuntual => "nivel_puntual",
            IntentLabel::RequiereViz => "requiere_viz",
        }
    }

    pub fn wants_visualization(&self) -> bool {
        matches!(self, IntentLabel::RequiereViz)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub label: TriageLabel,
    pub reasoning: String,
    /// Reply drafted by the classifier for non-data questions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drafted_reply: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentOutcome {
    pub label: IntentLabel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub reasoning: String,
}

fn normalize(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .to_lowercase()
        .replace([' ', '-'], "_")
}
