//! # tl-api
//!
//! The web routing layer for the Tipline triage engine.

pub mod error;
pub mod handlers;
pub mod middleware;

use actix_web::web;

/// Configures the triage routes.
///
/// # Developer Note
/// We use a scoped configuration to allow the main binary to mount
/// the API under different paths if needed (e.g., /api/v1/).
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("")
            .route("/health", web::get().to(handlers::health))
            .route("/stats", web::get().to(handlers::stats))
            // Intake and per-tip review tooling
            .route("/tips", web::post().to(handlers::submit_tip))
            .route("/tips/{id}/verification", web::get().to(handlers::get_verification))
            .route("/tips/{id}/overrides", web::post().to(handlers::override_subscores))
            .route("/tips/{id}/analysis", web::post().to(handlers::merge_analysis))
            .route("/tips/{id}/resolution", web::post().to(handlers::record_resolution))
            // Review queue
            .route("/queue", web::get().to(handlers::list_queue))
            .route("/queue/claim", web::post().to(handlers::claim))
            .route("/queue/release", web::post().to(handlers::release))
            .route("/queue/{id}", web::get().to(handlers::get_queue_item))
            .route("/review", web::post().to(handlers::submit_review))
            // Tipster reputation and moderation
            .route("/tipsters", web::get().to(handlers::list_tipsters))
            .route("/tipsters/{id}", web::get().to(handlers::get_tipster))
            .route("/tipsters/{id}/action", web::post().to(handlers::tipster_action)),
    );
}
