use async_trait::async_trait;
use nl2sql_core::{
    ConversationContext, PipelineState, StageOutput, StageResult, TriageLabel, TriageOutcome,
};
use nl2sql_llm::{extract_json_as, LlmCapability};
use serde::Deserialize;
use std::sync::Arc;

use super::{llm_failure, StageHandler};
use crate::messages;
use crate::prompts;

#[derive(Deserialize)]
struct TriageReply {
    #[serde(alias = "classification", alias = "category")]
    label: String,
    #[serde(default)]
    reasoning: String,
    #[serde(default, alias = "response", alias = "drafted_reply")]
    reply: Option<String>,
}

pub struct TriageStage {
    llm: Arc<dyn LlmCapability>,
    history_window: usize,
}

impl TriageStage {
    pub fn new(llm: Arc<dyn LlmCapability>, history_window: usize) -> Self {
        Self {
            llm,
            history_window,
        }
    }
}

#[async_trait]
impl StageHandler for TriageStage {
    fn state(&self) -> PipelineState {
        PipelineState::Triage
    }

    async fn run(&self, ctx: &ConversationContext) -> StageResult<StageOutput> {
        let request = prompts::triage(ctx, self.history_window);
        let raw = match self.llm.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => return llm_failure("triage", &e),
        };

        let reply: TriageReply = match extract_json_as(&raw) {
            Ok(reply) => reply,
            Err(e) => return StageResult::retryable(format!("triage output unusable: {}", e)),
        };

        let label = TriageLabel::parse_lenient(&reply.label);
        log::info!("[{}] Triage: {} ({})", ctx.run_id(), label.as_str(), reply.label);

        let mut drafted_reply = reply.reply.filter(|r| !r.trim().is_empty());
        if drafted_reply.is_none() && TriageLabel::requests_clarification(&reply.label) {
            drafted_reply = Some(messages::CLARIFICATION_REPLY.to_string());
        }

        StageResult::Success(StageOutput::Triage(TriageOutcome {
            label,
            reasoning: reply.reasoning,
            drafted_reply,
        }))
    }
}
