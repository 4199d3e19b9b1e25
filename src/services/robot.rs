//! Robot action service — server-authoritative moves on persisted robot state.
//!
//! DESIGN
//! ======
//! Clients may relay their own `robot:*` events, but these actions are decided
//! here against the stored world: an attack is range-checked, a walk advances
//! a fixed step, happiness is clamped. Every mutation goes through
//! `WorldStore::update_robot_state`, so concurrent actions on one robot apply
//! in sequence instead of overwriting each other.
//!
//! Broadcasting the result belongs to the dispatch layer.

use serde::Serialize;
use tracing::{debug, info};

use crate::db::{Persona, Robot, RobotId, RobotState, StateChange, StateUpdate, StoreError};
use crate::hub::ChatMessage;
use crate::state::AppState;

pub const ATTACK_RANGE: f32 = 15.0;
pub const ATTACK_DAMAGE: f32 = 10.0;
pub const WALK_STEP: f32 = 2.0;
pub const WALK_ENERGY_COST: f32 = 0.5;
/// Robots within this distance hear each other's chat.
pub const CHAT_RANGE: f32 = 10.0;
pub const CHAT_DATA_LIMIT: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    #[error("robot not found or has no state: {0}")]
    NotFound(RobotId),
    #[error("target is too far away ({distance:.1} units, max range is {max})")]
    OutOfRange { distance: f32, max: f32 },
    #[error("a robot cannot target itself: {0}")]
    SelfTarget(RobotId),
    #[error("value must be finite")]
    NotFinite,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl crate::frame::ErrorCode for RobotError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "E_ROBOT_NOT_FOUND",
            Self::OutOfRange { .. } => "E_OUT_OF_RANGE",
            Self::SelfTarget(_) => "E_INVALID_TARGET",
            Self::NotFinite => "E_INVALID_POSITION",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attack {
    pub attacker_id: RobotId,
    pub target_id: RobotId,
    pub damage: f32,
    pub distance: f32,
    pub previous_health: f32,
    pub health: f32,
}

/// Another robot within chat range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NearbyRobot {
    pub id: RobotId,
    pub persona_id: i32,
    pub group_id: Option<i32>,
    pub distance: f32,
    pub state: RobotState,
}

/// What a robot needs to hold a conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatData {
    pub robot: Robot,
    pub nearby: Vec<NearbyRobot>,
    /// Most recent last, at most `CHAT_DATA_LIMIT`.
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonaOverview {
    #[serde(flatten)]
    pub persona: Persona,
    pub robot_count: usize,
    pub robots: Vec<Robot>,
}

// =============================================================================
// GEOMETRY
// =============================================================================

/// Robots other than `of` that have state and stand within `range`
/// (inclusive), nearest first.
#[must_use]
pub fn nearby_robots(robots: &[Robot], of: &RobotState, range: f32) -> Vec<NearbyRobot> {
    let mut nearby: Vec<NearbyRobot> = robots
        .iter()
        .filter(|r| r.id != of.robot_id)
        .filter_map(|r| {
            let state = r.state.as_ref()?;
            let distance = of.distance_to(state);
            (distance <= range).then(|| NearbyRobot {
                id: r.id,
                persona_id: r.persona_id,
                group_id: r.group_id,
                distance,
                state: state.clone(),
            })
        })
        .collect();
    nearby.sort_by(|a, b| a.distance.total_cmp(&b.distance).then(a.id.cmp(&b.id)));
    nearby
}

/// Move `state` up to `WALK_STEP` toward the target without passing it.
pub fn step_towards(state: &mut RobotState, x: f32, y: f32, z: f32) {
    let (dx, dy, dz) = (x - state.x, y - state.y, z - state.z);
    let length = (dx * dx + dy * dy + dz * dz).sqrt();
    if length > 0.0 {
        let step = length.min(WALK_STEP) / length;
        state.x += dx * step;
        state.y += dy * step;
        state.z += dz * step;
    }
}

// =============================================================================
// ACTIONS
// =============================================================================

/// Deal `ATTACK_DAMAGE` to `target_id` if it is within `ATTACK_RANGE` of
/// `attacker_id`. Health never drops below zero.
///
/// # Errors
///
/// Returns `SelfTarget`, `NotFound` for either robot, `OutOfRange`, or a
/// store error.
pub async fn attack(state: &AppState, attacker_id: RobotId, target_id: RobotId) -> Result<Attack, RobotError> {
    if attacker_id == target_id {
        return Err(RobotError::SelfTarget(attacker_id));
    }
    let attacker = robot_state(state, attacker_id).await?;
    let target = robot_state(state, target_id).await?;

    let distance = attacker.distance_to(&target);
    if distance > ATTACK_RANGE {
        debug!(attacker_id, target_id, distance, "robot: attack out of range");
        return Err(RobotError::OutOfRange { distance, max: ATTACK_RANGE });
    }

    let change = update(state, target_id, &|s: &mut RobotState| {
        s.health = (s.health - ATTACK_DAMAGE).max(0.0);
    })
    .await?;
    info!(attacker_id, target_id, health = change.after.health, "robot: attacked");

    Ok(Attack {
        attacker_id,
        target_id,
        damage: ATTACK_DAMAGE,
        distance,
        previous_health: change.before.health,
        health: change.after.health,
    })
}

/// Step `robot_id` toward the target and charge `WALK_ENERGY_COST`, floored
/// at zero. A robot already at the target stays put but still pays.
///
/// # Errors
///
/// Returns `NotFinite` for a non-finite target, `NotFound`, or a store error.
pub async fn walk_towards(state: &AppState, robot_id: RobotId, x: f32, y: f32, z: f32) -> Result<StateChange, RobotError> {
    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return Err(RobotError::NotFinite);
    }
    let change = update(state, robot_id, &|s: &mut RobotState| {
        step_towards(s, x, y, z);
        s.energy = (s.energy - WALK_ENERGY_COST).max(0.0);
    })
    .await?;
    debug!(robot_id, x = change.after.x, y = change.after.y, z = change.after.z, "robot: walked");
    Ok(change)
}

/// Set happiness, clamped to [0, 100] and truncated to a whole number.
///
/// # Errors
///
/// Returns `NotFinite` for NaN or infinite input, `NotFound`, or a store error.
#[allow(clippy::cast_possible_truncation)]
pub async fn set_happiness(state: &AppState, robot_id: RobotId, happiness: f32) -> Result<StateChange, RobotError> {
    if !happiness.is_finite() {
        return Err(RobotError::NotFinite);
    }
    let level = happiness.clamp(0.0, 100.0) as i32;
    let change = update(state, robot_id, &|s: &mut RobotState| s.happiness = level).await?;
    info!(robot_id, happiness = level, "robot: happiness updated");
    Ok(change)
}

/// The robot, its neighbours within `CHAT_RANGE`, and the latest chat it sent
/// or could see.
///
/// # Errors
///
/// Returns `NotFound` for an unknown robot or a store error.
pub async fn chat_data(state: &AppState, robot_id: RobotId) -> Result<ChatData, RobotError> {
    let robots = state.store.list_robots().await?;
    let robot = robots
        .iter()
        .find(|r| r.id == robot_id)
        .cloned()
        .ok_or(RobotError::NotFound(robot_id))?;
    let nearby = robot
        .state
        .as_ref()
        .map(|s| nearby_robots(&robots, s, CHAT_RANGE))
        .unwrap_or_default();

    let mut messages: Vec<ChatMessage> = state
        .hub
        .recent_messages()
        .into_iter()
        .filter(|m| m.from_robot_id == robot_id || m.visible_to.contains(&robot_id))
        .collect();
    let skip = messages.len().saturating_sub(CHAT_DATA_LIMIT);
    messages.drain(..skip);

    Ok(ChatData { robot, nearby, messages })
}

/// Every persona with the robots it drives.
///
/// # Errors
///
/// Returns a store error if either listing fails.
pub async fn persona_overview(state: &AppState) -> Result<Vec<PersonaOverview>, RobotError> {
    let personas = state.store.list_personas().await?;
    let robots = state.store.list_robots().await?;

    Ok(personas
        .into_iter()
        .map(|persona| {
            let robots: Vec<Robot> = robots.iter().filter(|r| r.persona_id == persona.id).cloned().collect();
            PersonaOverview { robot_count: robots.len(), robots, persona }
        })
        .collect())
}

async fn robot_state(state: &AppState, robot_id: RobotId) -> Result<RobotState, RobotError> {
    state
        .store
        .find_robot_state(robot_id)
        .await?
        .ok_or(RobotError::NotFound(robot_id))
}

async fn update(
    state: &AppState,
    robot_id: RobotId,
    apply: StateUpdate<'_>,
) -> Result<StateChange, RobotError> {
    state
        .store
        .update_robot_state(robot_id, apply)
        .await?
        .ok_or(RobotError::NotFound(robot_id))
}

#[cfg(test)]
#[path = "robot_test.rs"]
mod tests;
