use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

pub async fn handler() -> impl Responder {
    HttpResponse::Ok().body("OK")
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    catalog_version: u64,
    tables: usize,
    uptime_secs: i64,
}

/// Ready once a non-empty schema catalog is loaded.
pub async fn ready(state: web::Data<AppState>) -> impl Responder {
    let catalog = state.schema().snapshot();
    let body = ReadyResponse {
        ready: !catalog.is_empty(),
        catalog_version: catalog.version(),
        tables: catalog.len(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    };
    if body.ready {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
