//! Persona REST routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::LOCATION;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use super::{ApiError, api_error};
use crate::db::{NewPersona, Persona};
use crate::services::persona::{self, PersonaError};
use crate::state::AppState;

/// Create body. Every field is optional on the wire so missing required
/// fields surface as validation errors (400) rather than body rejections.
#[derive(Debug, Default, Deserialize)]
pub struct CreatePersonaBody {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub tags: Option<String>,
}

impl From<CreatePersonaBody> for NewPersona {
    fn from(body: CreatePersonaBody) -> Self {
        Self { name: body.name, description: body.description, instructions: body.instructions, tags: body.tags }
    }
}

/// `GET /api/personas` — list personas by id.
pub async fn list_personas(State(state): State<AppState>) -> Result<Json<Vec<Persona>>, ApiError> {
    let personas = persona::list_personas(&state)
        .await
        .map_err(|e| persona_error(&e))?;
    Ok(Json(personas))
}

/// `GET /api/personas/{id}`.
pub async fn get_persona(State(state): State<AppState>, Path(id): Path<i32>) -> Result<Json<Persona>, ApiError> {
    let persona = persona::get_persona(&state, id)
        .await
        .map_err(|e| persona_error(&e))?;
    Ok(Json(persona))
}

/// `POST /api/personas` — 201 with `Location` and the new id.
pub async fn create_persona(
    State(state): State<AppState>,
    Json(body): Json<CreatePersonaBody>,
) -> Result<Response, ApiError> {
    let created = persona::create_persona(&state, &NewPersona::from(body))
        .await
        .map_err(|e| persona_error(&e))?;

    let location = format!("/api/personas/{}", created.id);
    Ok((StatusCode::CREATED, [(LOCATION, location)], Json(serde_json::json!({ "id": created.id }))).into_response())
}

pub(crate) fn persona_error_to_status(err: &PersonaError) -> StatusCode {
    match err {
        PersonaError::InvalidId(_) | PersonaError::Required { .. } | PersonaError::TooLong { .. } => {
            StatusCode::BAD_REQUEST
        }
        PersonaError::NotFound(_) => StatusCode::NOT_FOUND,
        PersonaError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn persona_error(err: &PersonaError) -> ApiError {
    if matches!(err, PersonaError::Store(_)) {
        tracing::error!(error = %err, "personas: store failure");
    }
    api_error(persona_error_to_status(err), err)
}

#[cfg(test)]
#[path = "personas_test.rs"]
mod tests;
