//! Persistence — world entities and the store seam.
//!
//! DESIGN
//! ======
//! Handlers and the battery loop talk to a `WorldStore` trait object, never
//! to a pool directly. `PgStore` backs it with Postgres (migrations embedded
//! from `src/db/migrations`); `MemoryStore` keeps a seeded world in memory
//! for pool-less runs and for tests.

pub mod memory;
pub mod postgres;

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub type RobotId = i32;
pub type BatteryId = i32;

// =============================================================================
// ENTITIES
// =============================================================================

/// A collectible energy cell. `energy <= 0` means depleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Battery {
    pub id: BatteryId,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub energy: f32,
    /// Milliseconds since Unix epoch of the last respawn or collection.
    pub last_respawn_at: i64,
}

impl Battery {
    #[must_use]
    pub fn is_depleted(&self) -> bool {
        self.energy <= 0.0
    }

    /// Euclidean distance to a point.
    #[must_use]
    pub fn distance_to(&self, x: f32, y: f32, z: f32) -> f32 {
        let (dx, dy, dz) = (self.x - x, self.y - y, self.z - z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Live vitals and position of a robot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotState {
    pub robot_id: RobotId,
    pub health: f32,
    pub energy: f32,
    pub max_energy: f32,
    pub happiness: i32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl RobotState {
    #[must_use]
    pub fn distance_to(&self, other: &RobotState) -> f32 {
        let (dx, dy, dz) = (self.x - other.x, self.y - other.y, self.z - other.z);
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Robot {
    pub id: RobotId,
    pub persona_id: i32,
    pub preset_id: i32,
    pub group_id: Option<i32>,
    pub instructions: Option<String>,
    pub length: f32,
    pub state: Option<RobotState>,
}

/// A named behavioral profile used to flavor generated chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub instructions: String,
    pub tags: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewPersona {
    pub name: String,
    pub description: Option<String>,
    pub instructions: String,
    pub tags: Option<String>,
}

/// Robot energy around a won collection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drained {
    pub energy_before: f32,
    pub energy_after: f32,
}

/// A robot's state on either side of an update.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub before: RobotState,
    pub after: RobotState,
}

/// An in-place edit of a robot's state, applied by the store under its lock.
pub type StateUpdate<'a> = &'a (dyn Fn(&mut RobotState) + Send + Sync);

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl crate::frame::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Database(_) => "E_STORE",
        }
    }

    fn retryable(&self) -> bool {
        true
    }
}

// =============================================================================
// STORE SEAM
// =============================================================================

/// Persistence accessor shared by request handlers and the battery loop.
///
/// Plain saves resolve last-write-wins. `apply_collection` and
/// `update_robot_state` are read-modify-write units: concurrent callers are
/// serialized per row and each sees the other's result.
#[async_trait::async_trait]
pub trait WorldStore: Send + Sync {
    async fn list_batteries(&self) -> Result<Vec<Battery>, StoreError>;

    /// Persist the given batteries (position, energy, respawn time) by id.
    async fn save_batteries(&self, batteries: &[Battery]) -> Result<(), StoreError>;

    async fn find_robot_state(&self, robot_id: RobotId) -> Result<Option<RobotState>, StoreError>;

    /// Drain `battery_id` into `robot_id` as one unit: the robot gains the
    /// battery's energy (capped at its maximum) and the battery drops to zero
    /// with `last_respawn_at = now_ms`.
    ///
    /// Returns `Ok(None)` and writes nothing when the battery is already
    /// depleted or unknown, or the robot has no state. Of two concurrent
    /// collections of one battery, exactly one wins.
    async fn apply_collection(
        &self,
        robot_id: RobotId,
        battery_id: BatteryId,
        now_ms: i64,
    ) -> Result<Option<Drained>, StoreError>;

    /// Apply `update` to a robot's state as one read-modify-write. Returns
    /// `Ok(None)` when the robot has no state.
    async fn update_robot_state(
        &self,
        robot_id: RobotId,
        update: StateUpdate<'_>,
    ) -> Result<Option<StateChange>, StoreError>;

    async fn list_robots(&self) -> Result<Vec<Robot>, StoreError>;

    async fn find_robot(&self, robot_id: RobotId) -> Result<Option<Robot>, StoreError>;

    async fn list_personas(&self) -> Result<Vec<Persona>, StoreError>;

    async fn find_persona(&self, persona_id: i32) -> Result<Option<Persona>, StoreError>;

    async fn create_persona(&self, persona: &NewPersona) -> Result<Persona, StoreError>;
}

// =============================================================================
// POOL
// =============================================================================

/// Initialize the PostgreSQL connection pool and run migrations.
///
/// # Errors
///
/// Returns an error if the connection or migrations fail.
pub async fn init_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    sqlx::migrate!("src/db/migrations").run(&pool).await?;

    Ok(pool)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
