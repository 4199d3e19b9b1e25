//! In-memory `WorldStore`.
//!
//! Used when no `DATABASE_URL` is configured and as the store behind tests.
//! The lock is a plain `std::sync::Mutex`; it is never held across an await.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{
    Battery, BatteryId, Drained, NewPersona, Persona, Robot, RobotId, RobotState, StateChange, StateUpdate, StoreError,
    WorldStore,
};
use crate::frame::now_ms;

#[derive(Default)]
struct MemoryWorld {
    batteries: BTreeMap<i32, Battery>,
    robots: BTreeMap<RobotId, Robot>,
    personas: BTreeMap<i32, Persona>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryWorld>,
}

impl MemoryStore {
    /// An empty world.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The baseline demo world: two personas, two robots, three batteries.
    #[must_use]
    pub fn seeded() -> Self {
        let now = now_ms();
        let persona = |id: i32, name: &str, instructions: &str, tags: &str| Persona {
            id,
            name: name.into(),
            description: None,
            instructions: instructions.into(),
            tags: Some(tags.into()),
            created_at: now,
            updated_at: now,
        };
        let robot = |id: RobotId, persona_id: i32, instructions: &str, length: f32, state: RobotState| Robot {
            id,
            persona_id,
            preset_id: persona_id,
            group_id: Some(1),
            instructions: Some(instructions.into()),
            length,
            state: Some(state),
        };
        let battery = |id: i32, x: f32, z: f32, energy: f32| Battery { id, x, y: 0.0, z, energy, last_respawn_at: now };

        Self::new()
            .with_persona(persona(1, "Curious Explorer", "Explore and learn.", "curious,explorer"))
            .with_persona(persona(2, "Helper", "Assist users.", "helpful"))
            .with_robot(robot(
                1,
                1,
                "Explorer robot for testing",
                1.5,
                RobotState {
                    robot_id: 1,
                    health: 100.0,
                    energy: 80.0,
                    max_energy: 100.0,
                    happiness: 75,
                    x: 0.0,
                    y: 0.0,
                    z: 0.0,
                },
            ))
            .with_robot(robot(
                2,
                2,
                "Helper robot for testing",
                1.8,
                RobotState {
                    robot_id: 2,
                    health: 100.0,
                    energy: 90.0,
                    max_energy: 100.0,
                    happiness: 85,
                    x: 5.0,
                    y: 0.0,
                    z: 5.0,
                },
            ))
            .with_battery(battery(1, 10.0, 5.0, 50.0))
            .with_battery(battery(2, -10.0, -5.0, 75.0))
            .with_battery(battery(3, 0.0, 15.0, 100.0))
    }

    #[must_use]
    pub fn with_battery(self, battery: Battery) -> Self {
        self.world().batteries.insert(battery.id, battery);
        self
    }

    #[must_use]
    pub fn with_robot(self, robot: Robot) -> Self {
        self.world().robots.insert(robot.id, robot);
        self
    }

    #[must_use]
    pub fn with_persona(self, persona: Persona) -> Self {
        self.world().personas.insert(persona.id, persona);
        self
    }

    fn world(&self) -> MutexGuard<'_, MemoryWorld> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl WorldStore for MemoryStore {
    async fn list_batteries(&self) -> Result<Vec<Battery>, StoreError> {
        Ok(self.world().batteries.values().cloned().collect())
    }

    async fn save_batteries(&self, batteries: &[Battery]) -> Result<(), StoreError> {
        let mut world = self.world();
        for battery in batteries {
            world.batteries.insert(battery.id, battery.clone());
        }
        Ok(())
    }

    async fn find_robot_state(&self, robot_id: RobotId) -> Result<Option<RobotState>, StoreError> {
        Ok(self
            .world()
            .robots
            .get(&robot_id)
            .and_then(|r| r.state.clone()))
    }

    async fn apply_collection(
        &self,
        robot_id: RobotId,
        battery_id: BatteryId,
        now_ms: i64,
    ) -> Result<Option<Drained>, StoreError> {
        let mut guard = self.world();
        let world = &mut *guard;
        let Some(battery) = world.batteries.get_mut(&battery_id).filter(|b| !b.is_depleted()) else {
            return Ok(None);
        };
        let Some(robot) = world.robots.get_mut(&robot_id).and_then(|r| r.state.as_mut()) else {
            return Ok(None);
        };

        let energy_before = robot.energy;
        robot.energy = (robot.energy + battery.energy).min(robot.max_energy);
        battery.energy = 0.0;
        battery.last_respawn_at = now_ms;
        Ok(Some(Drained { energy_before, energy_after: robot.energy }))
    }

    async fn update_robot_state(
        &self,
        robot_id: RobotId,
        update: StateUpdate<'_>,
    ) -> Result<Option<StateChange>, StoreError> {
        let mut world = self.world();
        let Some(state) = world.robots.get_mut(&robot_id).and_then(|r| r.state.as_mut()) else {
            return Ok(None);
        };
        let before = state.clone();
        update(state);
        state.robot_id = robot_id;
        Ok(Some(StateChange { before, after: state.clone() }))
    }

    async fn list_robots(&self) -> Result<Vec<Robot>, StoreError> {
        Ok(self.world().robots.values().cloned().collect())
    }

    async fn find_robot(&self, robot_id: RobotId) -> Result<Option<Robot>, StoreError> {
        Ok(self.world().robots.get(&robot_id).cloned())
    }

    async fn list_personas(&self) -> Result<Vec<Persona>, StoreError> {
        Ok(self.world().personas.values().cloned().collect())
    }

    async fn find_persona(&self, persona_id: i32) -> Result<Option<Persona>, StoreError> {
        Ok(self.world().personas.get(&persona_id).cloned())
    }

    async fn create_persona(&self, persona: &NewPersona) -> Result<Persona, StoreError> {
        let mut world = self.world();
        let id = world.personas.keys().next_back().map_or(1, |last| last + 1);
        let now = now_ms();
        let created = Persona {
            id,
            name: persona.name.clone(),
            description: persona.description.clone(),
            instructions: persona.instructions.clone(),
            tags: persona.tags.clone(),
            created_at: now,
            updated_at: now,
        };
        world.personas.insert(id, created.clone());
        Ok(created)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
