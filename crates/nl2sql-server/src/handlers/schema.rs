use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use nl2sql_core::{SchemaEntry, SchemaError};
use serde::Serialize;

use super::ErrorResponse;
use crate::state::AppState;

#[derive(Serialize)]
struct SchemaResponse<'a> {
    version: u64,
    loaded_at: DateTime<Utc>,
    tables: &'a [SchemaEntry],
}

pub async fn get_schema(state: web::Data<AppState>) -> impl Responder {
    let catalog = state.schema().snapshot();
    HttpResponse::Ok().json(SchemaResponse {
        version: catalog.version(),
        loaded_at: catalog.loaded_at(),
        tables: catalog.entries(),
    })
}

#[derive(Serialize)]
struct ReloadResponse {
    version: u64,
    tables: usize,
}

/// Rebuild the catalog from its source and swap it in. Runs already in
/// flight keep the catalog they started with.
pub async fn reload(state: web::Data<AppState>) -> impl Responder {
    match state.schema().reload(state.schema_source.as_ref()).await {
        Ok(version) => {
            let tables = state.schema().snapshot().len();
            log::info!("Schema reloaded: version {} with {} tables", version, tables);
            HttpResponse::Ok().json(ReloadResponse { version, tables })
        }
        Err(e) => {
            log::error!("Schema reload failed: {}", e);
            let body = ErrorResponse::new(e.to_string());
            match e {
                SchemaError::Invalid(_)
                | SchemaError::DuplicateTable(_)
                | SchemaError::EmptyCatalog => HttpResponse::UnprocessableEntity().json(body),
                SchemaError::Io(_) | SchemaError::Parse(_) | SchemaError::Source(_) => {
                    HttpResponse::BadGateway().json(body)
                }
            }
        }
    }
}
