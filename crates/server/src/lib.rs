#![forbid(unsafe_code)]

//! HTTP surface of the progress service.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{App, HttpServer, web};
use tracing::info;

use progress_core::model::UserId;
use services::ProgressService;

pub use config::{ServerConfig, ServerConfigError};
pub use error::ApiError;

/// Shared state of every worker.
pub struct AppState {
    pub service: Arc<ProgressService>,
    pub tokens: HashMap<String, UserId>,
}

impl AppState {
    #[must_use]
    pub fn new(service: Arc<ProgressService>, tokens: HashMap<String, UserId>) -> Self {
        Self { service, tokens }
    }
}

/// Malformed or unknown-field JSON bodies become 400s.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into())
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .route("/health", web::get().to(handlers::health))
        .route("/formations/{slug}", web::get().to(handlers::get_formation))
        .route(
            "/formations/{slug}/progress",
            web::get().to(handlers::get_formation_progress),
        )
        .route("/formations/{slug}/enroll", web::post().to(handlers::enroll))
        .route("/lessons/{id}", web::get().to(handlers::get_lesson))
        .route(
            "/lessons/{id}/progress",
            web::get().to(handlers::get_lesson_progress),
        )
        .route(
            "/lessons/{id}/progress",
            web::post().to(handlers::upsert_lesson_progress),
        )
        .route(
            "/chapters/{id}/lessons",
            web::get().to(handlers::get_chapter_lessons),
        )
        .route("/progress-dashboard", web::get().to(handlers::dashboard));
}

/// Serve until the process is stopped.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound.
pub async fn serve(config: ServerConfig, service: Arc<ProgressService>) -> std::io::Result<()> {
    if config.tokens.is_empty() {
        tracing::warn!("no PROGRESS_TOKENS configured; every progress call will be rejected");
    }
    let state = web::Data::new(AppState::new(service, config.tokens));
    info!(bind = %config.bind, "progress server listening");

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(configure_routes)
    })
    .bind(&config.bind)?
    .run()
    .await
}
