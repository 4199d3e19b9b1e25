//! Persona service — validated access to behavioral profiles.

use tracing::info;

use crate::db::{NewPersona, Persona, StoreError};
use crate::state::AppState;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_TAGS_LEN: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum PersonaError {
    #[error("invalid persona id: {0}")]
    InvalidId(i32),
    #[error("persona not found: {0}")]
    NotFound(i32),
    #[error("{field} is required")]
    Required { field: &'static str },
    #[error("{field} must be at most {max} characters")]
    TooLong { field: &'static str, max: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl crate::frame::ErrorCode for PersonaError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidId(_) => "E_INVALID_ID",
            Self::NotFound(_) => "E_PERSONA_NOT_FOUND",
            Self::Required { .. } | Self::TooLong { .. } => "E_VALIDATION",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

/// Check required fields and length limits (in characters).
///
/// # Errors
///
/// Returns the first violated rule.
pub fn validate(persona: &NewPersona) -> Result<(), PersonaError> {
    if persona.name.trim().is_empty() {
        return Err(PersonaError::Required { field: "name" });
    }
    check_len("name", &persona.name, MAX_NAME_LEN)?;
    if persona.instructions.trim().is_empty() {
        return Err(PersonaError::Required { field: "instructions" });
    }
    if let Some(description) = &persona.description {
        check_len("description", description, MAX_DESCRIPTION_LEN)?;
    }
    if let Some(tags) = &persona.tags {
        check_len("tags", tags, MAX_TAGS_LEN)?;
    }
    Ok(())
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), PersonaError> {
    if value.chars().count() > max {
        return Err(PersonaError::TooLong { field, max });
    }
    Ok(())
}

/// # Errors
///
/// Returns a store error if the query fails.
pub async fn list_personas(state: &AppState) -> Result<Vec<Persona>, PersonaError> {
    Ok(state.store.list_personas().await?)
}

/// # Errors
///
/// Returns `InvalidId` for non-positive ids and `NotFound` for unknown ones.
pub async fn get_persona(state: &AppState, id: i32) -> Result<Persona, PersonaError> {
    if id <= 0 {
        return Err(PersonaError::InvalidId(id));
    }
    state
        .store
        .find_persona(id)
        .await?
        .ok_or(PersonaError::NotFound(id))
}

/// # Errors
///
/// Returns a validation error or a store error.
pub async fn create_persona(state: &AppState, persona: &NewPersona) -> Result<Persona, PersonaError> {
    validate(persona)?;
    let created = state.store.create_persona(persona).await?;
    info!(persona_id = created.id, name = %created.name, "persona: created");
    Ok(created)
}

#[cfg(test)]
#[path = "persona_test.rs"]
mod tests;
