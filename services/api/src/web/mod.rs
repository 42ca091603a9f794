pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod webhook;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

pub use middleware::require_identity;
pub use state::AppState;

/// Builds the API router: public routes plus the identity-protected routes.
pub fn build_router(app_state: Arc<AppState>) -> Router {
    // Public routes (no identity required)
    let public_routes = Router::new()
        .route("/health", get(rest::health_handler))
        .route("/subscription/events", post(webhook::subscription_event_handler));

    // Protected routes (verified identity required)
    let protected_routes = Router::new()
        .route("/content", get(rest::list_content_handler))
        .route("/content/generate", post(rest::generate_handler))
        .route("/content/{id}", get(rest::get_content_handler))
        .route("/content/{id}/submit", post(rest::submit_handler))
        .route("/content/{id}/results", get(rest::results_handler))
        .route("/answers/{id}/review", post(rest::review_handler))
        .route("/dashboard", get(rest::dashboard_handler))
        .route("/progress", get(rest::progress_handler))
        .route("/progress/history/{subject}", get(rest::history_handler))
        .route("/progress/analytics/{subject}", get(rest::analytics_handler))
        .route("/quota", get(rest::quota_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_identity,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .with_state(app_state)
}
