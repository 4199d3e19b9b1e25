//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router carries the real-time channel (`/api/ws`), the read-only
//! world views, persona CRUD, and the health check. Requests are traced with
//! `TraceLayer`; CORS is open because browser clients are served elsewhere.

pub mod personas;
pub mod world;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::frame::ErrorCode;
use crate::state::AppState;

/// JSON error body paired with an HTTP status.
pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/personas", get(personas::list_personas).post(personas::create_persona))
        .route("/api/personas/overview", get(world::persona_overview))
        .route("/api/personas/{id}", get(personas::get_persona))
        .route("/api/robots", get(world::list_robots))
        .route("/api/robots/{id}", get(world::get_robot))
        .route("/api/batteries", get(world::list_batteries))
        .route("/api/hub/stats", get(world::hub_stats))
        .route("/healthz", get(healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build an `ApiError` carrying the error's code and message.
pub(crate) fn api_error(status: StatusCode, err: &(impl ErrorCode + ?Sized)) -> ApiError {
    (
        status,
        Json(serde_json::json!({
            "code": err.error_code(),
            "message": err.to_string(),
            "retryable": err.retryable(),
        })),
    )
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
