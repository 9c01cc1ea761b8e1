use crate::handlers;
use crate::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        // Client sessions
        .route("/api/sessions", post(handlers::sessions::create_session))
        .route(
            "/api/sessions/:id",
            get(handlers::sessions::get_session).delete(handlers::sessions::delete_session),
        )
        .route("/api/sessions/:id/events", get(handlers::sessions::session_events))
        .route("/api/sessions/:id/login", post(handlers::sessions::submit_login))
        .route("/api/sessions/:id/otp", post(handlers::sessions::submit_otp))
        .route("/api/sessions/:id/otp/:index", put(handlers::sessions::enter_digit))
        .route(
            "/api/sessions/:id/otp/:index/backspace",
            post(handlers::sessions::backspace),
        )
        .route("/api/sessions/:id/restart", post(handlers::sessions::restart))
        // Administrator console
        .route("/api/admin/records", get(handlers::admin::list_records))
        .route("/api/admin/records/live", get(handlers::admin::live_records))
        .route(
            "/api/admin/records/:id",
            axum::routing::delete(handlers::admin::reject),
        )
        .route(
            "/api/admin/records/:id/enable-otp",
            post(handlers::admin::enable_otp_input),
        )
        .route("/api/admin/records/:id/approve", post(handlers::admin::approve))
        .route("/api/admin/records/:id/reveal", post(handlers::admin::toggle_secret))
        .with_state(state)
}
