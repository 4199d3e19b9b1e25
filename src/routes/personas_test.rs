use super::*;
use crate::state::test_helpers;
use std::sync::Arc;

fn body(name: &str, instructions: &str) -> CreatePersonaBody {
    CreatePersonaBody { name: name.into(), instructions: instructions.into(), ..CreatePersonaBody::default() }
}

#[test]
fn persona_error_to_status_maps_each_variant() {
    assert_eq!(persona_error_to_status(&PersonaError::InvalidId(0)), StatusCode::BAD_REQUEST);
    assert_eq!(persona_error_to_status(&PersonaError::Required { field: "name" }), StatusCode::BAD_REQUEST);
    assert_eq!(
        persona_error_to_status(&PersonaError::TooLong { field: "tags", max: 200 }),
        StatusCode::BAD_REQUEST
    );
    assert_eq!(persona_error_to_status(&PersonaError::NotFound(4)), StatusCode::NOT_FOUND);
}

#[test]
fn create_body_tolerates_missing_fields() {
    let parsed: CreatePersonaBody = serde_json::from_str(r#"{"description":"quiet"}"#).unwrap();
    assert!(parsed.name.is_empty());
    assert!(parsed.instructions.is_empty());
    assert_eq!(parsed.description.as_deref(), Some("quiet"));
}

#[tokio::test]
async fn list_returns_seeded_personas() {
    let state = test_helpers::test_app_state();
    let Json(personas) = list_personas(State(state)).await.unwrap();
    let ids: Vec<i32> = personas.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[tokio::test]
async fn get_known_unknown_and_invalid_ids() {
    let state = test_helpers::test_app_state();

    let Json(persona) = get_persona(State(state.clone()), Path(1)).await.unwrap();
    assert_eq!(persona.id, 1);

    let (status, Json(err)) = get_persona(State(state.clone()), Path(99)).await.unwrap_err();
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "E_PERSONA_NOT_FOUND");

    let (status, Json(err)) = get_persona(State(state), Path(0)).await.unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "E_INVALID_ID");
}

#[tokio::test]
async fn create_returns_201_with_location() {
    let state = test_helpers::test_app_state();

    let response = create_persona(State(state.clone()), Json(body("Guard", "Stay alert.")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers().get(LOCATION).unwrap().to_str().unwrap();
    assert_eq!(location, "/api/personas/3");

    let Json(created) = get_persona(State(state), Path(3)).await.unwrap();
    assert_eq!(created.name, "Guard");
}

#[tokio::test]
async fn create_rejects_missing_instructions() {
    let state = test_helpers::test_app_state();
    let (status, Json(err)) = create_persona(State(state), Json(body("Guard", "")))
        .await
        .unwrap_err();
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "E_VALIDATION");
    assert_eq!(err["message"], "instructions is required");
}

#[tokio::test]
async fn store_failure_is_500() {
    let state = test_helpers::test_app_state_with_store(Arc::new(test_helpers::FailingStore));
    let (status, Json(err)) = list_personas(State(state)).await.unwrap_err();
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err["code"], "E_STORE");
    assert_eq!(err["retryable"], true);
}
