use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Pass,
    Fail,
    Uncertain,
}

impl VerdictStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "pass" | "ok" | "valid" => Some(VerdictStatus::Pass),
            "fail" | "failed" | "invalid" => Some(VerdictStatus::Fail),
            "uncertain" | "unknown" | "unsure" => Some(VerdictStatus::Uncertain),
            _ => None,
        }
    }
}

/// Plausibility judgement of a query result against the question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub status: VerdictStatus,
    pub rationale: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Verdict {
    pub fn pass(rationale: impl Into<String>) -> Self {
        Self::with_status(VerdictStatus::Pass, rationale)
    }

    pub fn fail(rationale: impl Into<String>) -> Self {
        Self::with_status(VerdictStatus::Fail, rationale)
    }

    pub fn uncertain(rationale: impl Into<String>) -> Self {
        Self::with_status(VerdictStatus::Uncertain, rationale)
    }

    fn with_status(status: VerdictStatus, rationale: impl Into<String>) -> Self {
        Self {
            status,
            rationale: rationale.into(),
            issues: Vec::new(),
            suggestion: None,
        }
    }

    pub fn with_issue(mut self, issue: impl Into<String>) -> Self {
        self.issues.push(issue.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Pass and Uncertain both let the run continue.
    pub fn allows_progress(&self) -> bool {
        self.status != VerdictStatus::Fail
    }

    /// Text handed back to SQL generation when this verdict triggers a correction.
    pub fn correction_hint(&self) -> String {
        let mut hint = self.rationale.clone();
        for issue in &self.issues {
            hint.push_str("\n- ");
            hint.push_str(issue);
        }
        if let Some(suggestion) = &self.suggestion {
            hint.push_str("\nSuggestion: ");
            hint.push_str(suggestion);
        }
        hint
    }
}
