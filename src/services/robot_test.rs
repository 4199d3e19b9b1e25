use std::sync::Arc;

use super::*;
use crate::db::MemoryStore;
use crate::frame::{ErrorCode, now_ms};
use crate::state::test_helpers;

fn state_at(robot_id: RobotId, x: f32, y: f32, z: f32) -> RobotState {
    RobotState { robot_id, health: 100.0, energy: 50.0, max_energy: 100.0, happiness: 50, x, y, z }
}

fn robot_at(id: RobotId, persona_id: i32, x: f32, y: f32, z: f32) -> Robot {
    Robot {
        id,
        persona_id,
        preset_id: 1,
        group_id: None,
        instructions: None,
        length: 1.0,
        state: Some(state_at(id, x, y, z)),
    }
}

fn state_with(store: MemoryStore) -> AppState {
    test_helpers::test_app_state_with_store(Arc::new(store))
}

// =============================================================================
// geometry
// =============================================================================

#[test]
fn nearby_excludes_self_far_and_stateless_robots() {
    let mut stateless = robot_at(4, 1, 1.0, 0.0, 0.0);
    stateless.state = None;
    let robots = vec![
        robot_at(1, 1, 0.0, 0.0, 0.0),
        robot_at(2, 1, 6.0, 0.0, 8.0),
        robot_at(3, 1, 0.0, 0.0, 10.5),
        stateless,
        robot_at(5, 2, 3.0, 0.0, 0.0),
    ];

    let nearby = nearby_robots(&robots, &state_at(1, 0.0, 0.0, 0.0), CHAT_RANGE);

    assert_eq!(nearby.iter().map(|n| n.id).collect::<Vec<_>>(), vec![5, 2]);
    assert!((nearby[1].distance - 10.0).abs() < 1e-5);
    assert_eq!(nearby[0].persona_id, 2);
}

#[test]
fn step_moves_fixed_distance_along_direction() {
    let mut s = state_at(1, 0.0, 0.0, 0.0);
    step_towards(&mut s, 30.0, 0.0, 40.0);
    assert!((s.x - 1.2).abs() < 1e-5);
    assert!((s.z - 1.6).abs() < 1e-5);
    assert!(s.y.abs() < f32::EPSILON);
}

#[test]
fn step_stops_at_a_close_target() {
    let mut s = state_at(1, 0.0, 0.0, 0.0);
    step_towards(&mut s, 0.5, 0.0, 0.0);
    assert!((s.x - 0.5).abs() < f32::EPSILON);

    step_towards(&mut s, 0.5, 0.0, 0.0);
    assert!((s.x - 0.5).abs() < f32::EPSILON);
}

// =============================================================================
// attack
// =============================================================================

#[tokio::test]
async fn attack_in_range_damages_target() {
    let state = test_helpers::test_app_state();

    let hit = attack(&state, 1, 2).await.unwrap();

    assert_eq!(hit.target_id, 2);
    assert!((hit.previous_health - 100.0).abs() < f32::EPSILON);
    assert!((hit.health - 90.0).abs() < f32::EPSILON);
    assert!((hit.distance - 50f32.sqrt()).abs() < 1e-5);
    let target = state.store.find_robot_state(2).await.unwrap().unwrap();
    assert!((target.health - 90.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn attack_floors_health_at_zero() {
    let mut weak = robot_at(2, 1, 1.0, 0.0, 0.0);
    if let Some(s) = weak.state.as_mut() {
        s.health = 4.0;
    }
    let state = state_with(MemoryStore::new().with_robot(robot_at(1, 1, 0.0, 0.0, 0.0)).with_robot(weak));

    let hit = attack(&state, 1, 2).await.unwrap();
    assert!(hit.health.abs() < f32::EPSILON);
    let again = attack(&state, 1, 2).await.unwrap();
    assert!(again.previous_health.abs() < f32::EPSILON);
    assert!(again.health.abs() < f32::EPSILON);
}

#[tokio::test]
async fn attack_out_of_range_changes_nothing() {
    let state = state_with(
        MemoryStore::new()
            .with_robot(robot_at(1, 1, 0.0, 0.0, 0.0))
            .with_robot(robot_at(2, 1, 15.5, 0.0, 0.0)),
    );

    let err = attack(&state, 1, 2).await.unwrap_err();

    assert_eq!(err.error_code(), "E_OUT_OF_RANGE");
    assert!(err.to_string().contains("15.5 units"));
    let target = state.store.find_robot_state(2).await.unwrap().unwrap();
    assert!((target.health - 100.0).abs() < f32::EPSILON);
}

#[tokio::test]
async fn attack_at_exact_range_lands() {
    let state = state_with(
        MemoryStore::new()
            .with_robot(robot_at(1, 1, 0.0, 0.0, 0.0))
            .with_robot(robot_at(2, 1, 0.0, 0.0, ATTACK_RANGE)),
    );
    assert!(attack(&state, 1, 2).await.is_ok());
}

#[tokio::test]
async fn attack_rejects_self_and_unknown_robots() {
    let state = test_helpers::test_app_state();

    assert!(matches!(attack(&state, 1, 1).await, Err(RobotError::SelfTarget(1))));
    assert!(matches!(attack(&state, 1, 99).await, Err(RobotError::NotFound(99))));
    assert!(matches!(attack(&state, 99, 1).await, Err(RobotError::NotFound(99))));
}

// =============================================================================
// walk and happiness
// =============================================================================

#[tokio::test]
async fn walk_steps_and_spends_energy() {
    let state = test_helpers::test_app_state();

    let change = walk_towards(&state, 1, 10.0, 0.0, 0.0).await.unwrap();

    assert!((change.after.x - WALK_STEP).abs() < f32::EPSILON);
    assert!((change.before.energy - change.after.energy - WALK_ENERGY_COST).abs() < f32::EPSILON);
    assert_eq!(state.store.find_robot_state(1).await.unwrap(), Some(change.after));
}

#[tokio::test]
async fn walk_energy_floors_at_zero() {
    let mut tired = robot_at(1, 1, 0.0, 0.0, 0.0);
    if let Some(s) = tired.state.as_mut() {
        s.energy = 0.2;
    }
    let state = state_with(MemoryStore::new().with_robot(tired));

    let change = walk_towards(&state, 1, 0.0, 0.0, 0.0).await.unwrap();
    assert!(change.after.energy.abs() < f32::EPSILON);
    assert!(change.after.x.abs() < f32::EPSILON);
}

#[tokio::test]
async fn walk_rejects_non_finite_target_and_unknown_robot() {
    let state = test_helpers::test_app_state();
    let err = walk_towards(&state, 1, f32::INFINITY, 0.0, 0.0).await.unwrap_err();
    assert_eq!(err.error_code(), "E_INVALID_POSITION");
    assert!(matches!(walk_towards(&state, 42, 1.0, 0.0, 0.0).await, Err(RobotError::NotFound(42))));
}

#[tokio::test]
async fn happiness_is_clamped_and_truncated() {
    let state = test_helpers::test_app_state();

    assert_eq!(set_happiness(&state, 1, 150.0).await.unwrap().after.happiness, 100);
    assert_eq!(set_happiness(&state, 1, -5.0).await.unwrap().after.happiness, 0);
    let change = set_happiness(&state, 1, 42.9).await.unwrap();
    assert_eq!(change.before.happiness, 0);
    assert_eq!(change.after.happiness, 42);
    assert!(matches!(set_happiness(&state, 1, f32::NAN).await, Err(RobotError::NotFinite)));
}

// =============================================================================
// chat data and overview
// =============================================================================

#[tokio::test]
async fn chat_data_keeps_latest_relevant_messages() {
    let state = test_helpers::test_app_state();
    state.hub.record_message(ChatMessage::new(2, "not for you", vec![3], now_ms()));
    state.hub.record_message(ChatMessage::new(2, "hello one", vec![1], now_ms()));
    for i in 0..CHAT_DATA_LIMIT {
        state.hub.record_message(ChatMessage::new(1, format!("msg {i}"), vec![2], now_ms()));
    }

    let data = chat_data(&state, 1).await.unwrap();

    assert_eq!(data.robot.id, 1);
    assert_eq!(data.nearby.iter().map(|n| n.id).collect::<Vec<_>>(), vec![2]);
    assert_eq!(data.messages.len(), CHAT_DATA_LIMIT);
    assert_eq!(data.messages[0].text, "msg 0");
    assert_eq!(data.messages.last().map(|m| m.text.as_str()), Some("msg 9"));
    assert!(data.messages.iter().all(|m| m.text != "not for you"));
}

#[tokio::test]
async fn chat_data_for_unknown_robot_fails() {
    let state = test_helpers::test_app_state();
    let err = chat_data(&state, 9).await.unwrap_err();
    assert_eq!(err.error_code(), "E_ROBOT_NOT_FOUND");
    assert!(!err.retryable());
}

#[tokio::test]
async fn overview_groups_robots_by_persona() {
    let state = state_with(MemoryStore::seeded().with_robot(robot_at(3, 1, 20.0, 0.0, 0.0)));

    let overview = persona_overview(&state).await.unwrap();

    assert_eq!(overview.len(), 2);
    assert_eq!(overview[0].persona.name, "Curious Explorer");
    assert_eq!(overview[0].robot_count, 2);
    assert_eq!(overview[0].robots.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);
    assert_eq!(overview[1].robot_count, 1);

    let json = serde_json::to_value(&overview[1]).unwrap();
    assert_eq!(json["name"], "Helper");
    assert_eq!(json["robots"][0]["id"], 2);
}

#[tokio::test]
async fn store_failures_are_retryable() {
    let state = test_helpers::test_app_state_with_store(Arc::new(test_helpers::FailingStore));
    let err = persona_overview(&state).await.unwrap_err();
    assert_eq!(err.error_code(), "E_STORE");
    assert!(err.retryable());
    assert!(attack(&state, 1, 2).await.unwrap_err().retryable());
}
