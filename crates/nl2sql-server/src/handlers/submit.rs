use actix_web::{web, HttpResponse, Responder};
use nl2sql_core::{FinalResponse, Turn};
use nl2sql_pipeline::RunRequest;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub question: String,
    #[serde(default)]
    pub history: Vec<Turn>,
    #[serde(default)]
    pub run_id: Option<String>,
}

#[derive(Serialize)]
struct SubmitResponse {
    run_id: String,
    final_state: &'static str,
    path: Vec<&'static str>,
    response: FinalResponse,
}

pub async fn handler(state: web::Data<AppState>, req: web::Json<SubmitRequest>) -> impl Responder {
    let req = req.into_inner();
    if req.question.trim().is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new("question must not be empty"));
    }

    let mut request = RunRequest::new(req.question).with_history(req.history);
    if let Some(run_id) = req.run_id {
        request = request.with_run_id(run_id);
    }

    // Dropping this future (client disconnect) drops the guard and cancels the run.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcome = state.pipeline.run_with(request, cancel, None).await;
    log::info!(
        "[{}] Submit finished: {} ({:?})",
        outcome.run_id,
        outcome.final_state(),
        outcome.response.kind
    );

    HttpResponse::Ok().json(SubmitResponse {
        final_state: outcome.final_state().as_str(),
        path: outcome
            .trace
            .branch_sequence()
            .iter()
            .map(|s| s.as_str())
            .collect(),
        run_id: outcome.run_id,
        response: outcome.response,
    })
}
