use async_trait::async_trait;
use nl2sql_core::{
    ConversationContext, IntentLabel, IntentOutcome, PipelineState, StageOutput, StageResult,
};
use nl2sql_llm::{extract_json_as, LlmCapability};
use serde::Deserialize;
use std::sync::Arc;

use super::{llm_failure, StageHandler};
use crate::prompts;

#[derive(Deserialize)]
struct IntentReply {
    #[serde(alias = "label")]
    intent: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    reasoning: String,
}

pub struct IntentStage {
    llm: Arc<dyn LlmCapability>,
    history_window: usize,
}

impl IntentStage {
    pub fn new(llm: Arc<dyn LlmCapability>, history_window: usize) -> Self {
        Self {
            llm,
            history_window,
        }
    }
}

#[async_trait]
impl StageHandler for IntentStage {
    fn state(&self) -> PipelineState {
        PipelineState::Intent
    }

    async fn run(&self, ctx: &ConversationContext) -> StageResult<StageOutput> {
        let request = prompts::intent(ctx, self.history_window);
        let raw = match self.llm.complete(&request).await {
            Ok(raw) => raw,
            Err(e) => return llm_failure("intent", &e),
        };

        let reply: IntentReply = match extract_json_as(&raw) {
            Ok(reply) => reply,
            Err(e) => return StageResult::retryable(format!("intent output unusable: {}", e)),
        };

        let label = IntentLabel::parse_lenient(&reply.intent);
        log::info!("[{}] Intent: {}", ctx.run_id(), label.as_str());

        StageResult::Success(StageOutput::Intent(IntentOutcome {
            label,
            title: reply
                .title
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty()),
            reasoning: reply.reasoning,
        }))
    }
}
