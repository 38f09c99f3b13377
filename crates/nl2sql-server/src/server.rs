use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::io;

use crate::handlers;
use crate::state::AppState;

/// Mount the `/api/v1` routes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/submit", web::post().to(handlers::submit::handler))
            .route("/health", web::get().to(handlers::health::handler))
            .route("/ready", web::get().to(handlers::health::ready))
            .route("/schema", web::get().to(handlers::schema::get_schema))
            .route("/schema/reload", web::post().to(handlers::schema::reload)),
    );
}

pub async fn run_server(port: u16, state: AppState) -> io::Result<()> {
    let state = web::Data::new(state);
    log::info!("Listening on 0.0.0.0:{}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(configure)
    })
    .bind(format!("0.0.0.0:{}", port))?
    .run()
    .await
}
