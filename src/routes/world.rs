//! Read-only world views: robots, batteries, persona overview, hub stats.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;

use super::{ApiError, api_error};
use crate::db::{Battery, Robot, RobotId, StoreError};
use crate::hub::HubStats;
use crate::services::robot::{self, PersonaOverview, RobotError};
use crate::state::AppState;

/// `GET /api/robots` — robots with their live state.
pub async fn list_robots(State(state): State<AppState>) -> Result<Json<Vec<Robot>>, ApiError> {
    let robots = state.store.list_robots().await.map_err(|e| store_error(&e))?;
    Ok(Json(robots))
}

/// `GET /api/robots/{id}`.
pub async fn get_robot(State(state): State<AppState>, Path(id): Path<RobotId>) -> Result<Json<Robot>, ApiError> {
    match state.store.find_robot(id).await {
        Ok(Some(robot)) => Ok(Json(robot)),
        Ok(None) => Err(api_error(StatusCode::NOT_FOUND, &RobotError::NotFound(id))),
        Err(e) => Err(store_error(&e)),
    }
}

/// `GET /api/batteries`.
pub async fn list_batteries(State(state): State<AppState>) -> Result<Json<Vec<Battery>>, ApiError> {
    let batteries = state
        .store
        .list_batteries()
        .await
        .map_err(|e| store_error(&e))?;
    Ok(Json(batteries))
}

/// `GET /api/personas/overview` — each persona with the robots it drives.
pub async fn persona_overview(State(state): State<AppState>) -> Result<Json<Vec<PersonaOverview>>, ApiError> {
    let overview = robot::persona_overview(&state).await.map_err(|e| {
        tracing::error!(error = %e, "world: overview failed");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, &e)
    })?;
    Ok(Json(overview))
}

/// `GET /api/hub/stats` — live connections, registered robots, retained chat.
pub async fn hub_stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats().await)
}

fn store_error(err: &StoreError) -> ApiError {
    tracing::error!(error = %err, "world: store failure");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, err)
}

#[cfg(test)]
#[path = "world_test.rs"]
mod tests;
