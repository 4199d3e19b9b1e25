//! Postgres-backed `WorldStore`.

use sqlx::PgPool;

use super::{
    Battery, BatteryId, Drained, NewPersona, Persona, Robot, RobotId, RobotState, StateChange, StateUpdate, StoreError,
    WorldStore,
};
use crate::frame::now_ms;

type RobotRow = (
    i32,
    i32,
    i32,
    Option<i32>,
    Option<String>,
    f32,
    Option<f32>,
    Option<f32>,
    Option<f32>,
    Option<i32>,
    Option<f32>,
    Option<f32>,
    Option<f32>,
);

type StateRow = (f32, f32, f32, i32, f32, f32, f32);

type PersonaRow = (i32, String, Option<String>, String, Option<String>, i64, i64);

const ROBOT_SELECT: &str = "SELECT r.id, r.persona_id, r.preset_id, r.group_id, r.instructions, r.length, \
     s.health, s.energy, s.max_energy, s.happiness, s.x, s.y, s.z \
     FROM robots r LEFT JOIN robot_states s ON s.robot_id = r.id";

const PERSONA_SELECT: &str = "SELECT id, name, description, instructions, tags, created_at, updated_at FROM personas";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl WorldStore for PgStore {
    async fn list_batteries(&self) -> Result<Vec<Battery>, StoreError> {
        let rows = sqlx::query_as::<_, (i32, f32, f32, f32, f32, i64)>(
            "SELECT id, x, y, z, energy, last_respawn_at FROM batteries ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, x, y, z, energy, last_respawn_at)| Battery { id, x, y, z, energy, last_respawn_at })
            .collect())
    }

    async fn save_batteries(&self, batteries: &[Battery]) -> Result<(), StoreError> {
        if batteries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for battery in batteries {
            sqlx::query("UPDATE batteries SET x = $2, y = $3, z = $4, energy = $5, last_respawn_at = $6 WHERE id = $1")
                .bind(battery.id)
                .bind(battery.x)
                .bind(battery.y)
                .bind(battery.z)
                .bind(battery.energy)
                .bind(battery.last_respawn_at)
                .execute(tx.as_mut())
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_robot_state(&self, robot_id: RobotId) -> Result<Option<RobotState>, StoreError> {
        let row = sqlx::query_as::<_, StateRow>(
            "SELECT health, energy, max_energy, happiness, x, y, z FROM robot_states WHERE robot_id = $1",
        )
        .bind(robot_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| state_from_row(robot_id, row)))
    }

    async fn apply_collection(
        &self,
        robot_id: RobotId,
        battery_id: BatteryId,
        now_ms: i64,
    ) -> Result<Option<Drained>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Battery row first, then robot row: every collection locks in this order.
        let Some((battery_energy,)) = sqlx::query_as::<_, (f32,)>(
            "SELECT energy FROM batteries WHERE id = $1 AND energy > 0 FOR UPDATE",
        )
        .bind(battery_id)
        .fetch_optional(tx.as_mut())
        .await?
        else {
            return Ok(None);
        };

        let Some((energy_before, max_energy)) = sqlx::query_as::<_, (f32, f32)>(
            "SELECT energy, max_energy FROM robot_states WHERE robot_id = $1 FOR UPDATE",
        )
        .bind(robot_id)
        .fetch_optional(tx.as_mut())
        .await?
        else {
            return Ok(None);
        };

        let energy_after = (energy_before + battery_energy).min(max_energy);
        let drained = sqlx::query("UPDATE batteries SET energy = 0, last_respawn_at = $2 WHERE id = $1 AND energy > 0")
            .bind(battery_id)
            .bind(now_ms)
            .execute(tx.as_mut())
            .await?;
        if drained.rows_affected() != 1 {
            return Ok(None);
        }
        sqlx::query("UPDATE robot_states SET energy = $2 WHERE robot_id = $1")
            .bind(robot_id)
            .bind(energy_after)
            .execute(tx.as_mut())
            .await?;

        tx.commit().await?;
        Ok(Some(Drained { energy_before, energy_after }))
    }

    async fn update_robot_state(
        &self,
        robot_id: RobotId,
        update: StateUpdate<'_>,
    ) -> Result<Option<StateChange>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query_as::<_, StateRow>(
            "SELECT health, energy, max_energy, happiness, x, y, z FROM robot_states WHERE robot_id = $1 FOR UPDATE",
        )
        .bind(robot_id)
        .fetch_optional(tx.as_mut())
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let before = state_from_row(robot_id, row);
        let mut after = before.clone();
        update(&mut after);
        after.robot_id = robot_id;

        sqlx::query(
            "UPDATE robot_states SET health = $2, energy = $3, max_energy = $4, happiness = $5, x = $6, y = $7, z = $8 \
             WHERE robot_id = $1",
        )
        .bind(robot_id)
        .bind(after.health)
        .bind(after.energy)
        .bind(after.max_energy)
        .bind(after.happiness)
        .bind(after.x)
        .bind(after.y)
        .bind(after.z)
        .execute(tx.as_mut())
        .await?;

        tx.commit().await?;
        Ok(Some(StateChange { before, after }))
    }

    async fn list_robots(&self) -> Result<Vec<Robot>, StoreError> {
        let rows = sqlx::query_as::<_, RobotRow>(&format!("{ROBOT_SELECT} ORDER BY r.id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(robot_from_row).collect())
    }

    async fn find_robot(&self, robot_id: RobotId) -> Result<Option<Robot>, StoreError> {
        let row = sqlx::query_as::<_, RobotRow>(&format!("{ROBOT_SELECT} WHERE r.id = $1"))
            .bind(robot_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(robot_from_row))
    }

    async fn list_personas(&self) -> Result<Vec<Persona>, StoreError> {
        let rows = sqlx::query_as::<_, PersonaRow>(&format!("{PERSONA_SELECT} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(persona_from_row).collect())
    }

    async fn find_persona(&self, persona_id: i32) -> Result<Option<Persona>, StoreError> {
        let row = sqlx::query_as::<_, PersonaRow>(&format!("{PERSONA_SELECT} WHERE id = $1"))
            .bind(persona_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(persona_from_row))
    }

    async fn create_persona(&self, persona: &NewPersona) -> Result<Persona, StoreError> {
        let now = now_ms();
        let id: i32 = sqlx::query_scalar(
            "INSERT INTO personas (name, description, instructions, tags, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $5) RETURNING id",
        )
        .bind(&persona.name)
        .bind(&persona.description)
        .bind(&persona.instructions)
        .bind(&persona.tags)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(Persona {
            id,
            name: persona.name.clone(),
            description: persona.description.clone(),
            instructions: persona.instructions.clone(),
            tags: persona.tags.clone(),
            created_at: now,
            updated_at: now,
        })
    }
}

fn robot_from_row(row: RobotRow) -> Robot {
    let (id, persona_id, preset_id, group_id, instructions, length, health, energy, max_energy, happiness, x, y, z) = row;
    // LEFT JOIN: a robot without a state row yields all-NULL state columns.
    let state = match (health, energy, max_energy, happiness) {
        (Some(health), Some(energy), Some(max_energy), Some(happiness)) => Some(RobotState {
            robot_id: id,
            health,
            energy,
            max_energy,
            happiness,
            x: x.unwrap_or_default(),
            y: y.unwrap_or_default(),
            z: z.unwrap_or_default(),
        }),
        _ => None,
    };
    Robot { id, persona_id, preset_id, group_id, instructions, length, state }
}

fn state_from_row(robot_id: RobotId, row: StateRow) -> RobotState {
    let (health, energy, max_energy, happiness, x, y, z) = row;
    RobotState { robot_id, health, energy, max_energy, happiness, x, y, z }
}

fn persona_from_row(row: PersonaRow) -> Persona {
    let (id, name, description, instructions, tags, created_at, updated_at) = row;
    Persona { id, name, description, instructions, tags, created_at, updated_at }
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
