//! Battery service — respawn loop and collection.
//!
//! DESIGN
//! ======
//! A single background task owns respawning. It waits a start-up delay, then
//! ticks every loop period: each battery depleted for longer than the respawn
//! interval gets fresh energy and a random ground position, is persisted, and
//! is announced to every connection as `battery:spawned`.
//!
//! Collection runs on the caller's request path. It drains the nearest
//! charged battery in range into the robot, capped at the robot's max energy.
//! The drain itself is a single conditional store write: of two robots racing
//! for one battery, only the first gets its energy. Respawn only writes
//! depleted batteries, which collection never touches.
//!
//! ERROR HANDLING
//! ==============
//! A failed tick is logged and retried after the shorter error back-off. The
//! loop only exits on the shutdown signal, which every sleep observes.

use std::time::Duration;

use rand::Rng;
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::BatteryConfig;
use crate::db::{Battery, BatteryId, RobotId, StoreError};
use crate::frame::{Frame, now_ms};
use crate::hub::{Audience, data};
use crate::state::AppState;

// =============================================================================
// TYPES
// =============================================================================

pub const MIN_SPAWN_ENERGY: i32 = 25;
pub const MAX_SPAWN_ENERGY: i32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum BatteryError {
    #[error("position must be finite: ({x}, {y}, {z})")]
    InvalidPosition { x: f32, y: f32, z: f32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl crate::frame::ErrorCode for BatteryError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidPosition { .. } => "E_INVALID_POSITION",
            Self::Store(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Store(e) if e.retryable())
    }
}

/// A successful collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub robot_id: RobotId,
    pub battery_id: BatteryId,
    /// Energy actually added to the robot after capping.
    pub gained: f32,
    pub robot_energy: f32,
}

// =============================================================================
// RESPAWN
// =============================================================================

/// Whether `battery` is due for respawn at `now_ms`: depleted, and depleted
/// for strictly longer than `interval`.
#[must_use]
pub fn is_due(battery: &Battery, now_ms: i64, interval: Duration) -> bool {
    let interval_ms = i64::try_from(interval.as_millis()).unwrap_or(i64::MAX);
    battery.is_depleted() && now_ms.saturating_sub(battery.last_respawn_at) > interval_ms
}

/// Give `battery` fresh energy in [25, 100] and a random ground position with
/// integer x and z in `[-half_extent, half_extent]`.
#[allow(clippy::cast_precision_loss)]
pub fn respawn(battery: &mut Battery, rng: &mut impl Rng, half_extent: i32, now_ms: i64) {
    let half = half_extent.abs();
    battery.energy = rng.random_range(MIN_SPAWN_ENERGY..=MAX_SPAWN_ENERGY) as f32;
    battery.x = rng.random_range(-half..=half) as f32;
    battery.y = 0.0;
    battery.z = rng.random_range(-half..=half) as f32;
    battery.last_respawn_at = now_ms;
}

/// Respawn every due battery in place and return the respawned copies.
pub fn select_respawns(batteries: &mut [Battery], rng: &mut impl Rng, cfg: &BatteryConfig, now_ms: i64) -> Vec<Battery> {
    let mut respawned = Vec::new();
    for battery in batteries.iter_mut() {
        if is_due(battery, now_ms, cfg.respawn_interval) {
            respawn(battery, rng, cfg.spawn_half_extent, now_ms);
            respawned.push(battery.clone());
        }
    }
    respawned
}

/// One respawn tick: load, respawn what is due, persist, announce.
///
/// # Errors
///
/// Returns a store error if loading or saving fails. Nothing is announced
/// unless the save succeeded.
pub async fn process_batteries(state: &AppState) -> Result<Vec<Battery>, BatteryError> {
    process_batteries_at(state, now_ms()).await
}

pub(crate) async fn process_batteries_at(state: &AppState, now_ms: i64) -> Result<Vec<Battery>, BatteryError> {
    let mut batteries = state.store.list_batteries().await?;
    let respawned = {
        let mut rng = rand::rng();
        select_respawns(&mut batteries, &mut rng, &state.battery, now_ms)
    };
    if respawned.is_empty() {
        return Ok(respawned);
    }

    state.store.save_batteries(&respawned).await?;
    for battery in &respawned {
        let frame = Frame::request(
            "battery:spawned",
            data(json!({
                "battery_id": battery.id,
                "x": battery.x,
                "y": battery.y,
                "z": battery.z,
                "energy": battery.energy,
            })),
        );
        state.hub.publish(&Audience::All, &frame).await;
        info!(battery_id = battery.id, energy = battery.energy, x = battery.x, z = battery.z, "battery: respawned");
    }
    Ok(respawned)
}

/// Run the respawn loop until `shutdown` flips to `true` or its sender drops.
pub async fn run_respawn_loop(state: AppState, mut shutdown: watch::Receiver<bool>) {
    let cfg = state.battery;
    info!(
        startup_delay = ?cfg.startup_delay,
        loop_period = ?cfg.loop_period,
        respawn_interval = ?cfg.respawn_interval,
        "battery: respawn loop starting"
    );

    if !sleep_or_shutdown(cfg.startup_delay, &mut shutdown).await {
        info!("battery: respawn loop stopped before first tick");
        return;
    }

    loop {
        let pause = match process_batteries(&state).await {
            Ok(respawned) => {
                debug!(respawned = respawned.len(), "battery: tick complete");
                cfg.loop_period
            }
            Err(e) => {
                error!(error = %e, backoff = ?cfg.error_backoff, "battery: respawn tick failed");
                cfg.error_backoff
            }
        };
        if !sleep_or_shutdown(pause, &mut shutdown).await {
            break;
        }
    }
    info!("battery: respawn loop stopped");
}

/// Spawn the respawn loop on the runtime.
pub fn spawn_respawn_task(state: AppState, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    tokio::spawn(run_respawn_loop(state, shutdown))
}

/// Sleep for `duration`. Returns `false` as soon as shutdown is signalled.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        () = tokio::time::sleep(duration) => true,
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
    }
}

// =============================================================================
// COLLECTION
// =============================================================================

/// The nearest charged battery within `range` (inclusive) of the point.
/// Ties go to the lowest battery id.
#[must_use]
pub fn nearest_in_range(batteries: &[Battery], x: f32, y: f32, z: f32, range: f32) -> Option<&Battery> {
    batteries
        .iter()
        .filter(|b| !b.is_depleted())
        .map(|b| (b.distance_to(x, y, z), b))
        .filter(|(d, _)| *d <= range)
        .min_by(|(da, a), (db, b)| da.total_cmp(db).then(a.id.cmp(&b.id)))
        .map(|(_, b)| b)
}

/// Drain the nearest charged battery within range into `robot_id`.
///
/// Returns `Ok(None)` when the robot has no state, nothing is in range, or a
/// concurrent collection drained the battery first.
///
/// # Errors
///
/// Returns `InvalidPosition` for non-finite coordinates and a store error if
/// loading or saving fails.
pub async fn collect_battery(
    state: &AppState,
    robot_id: RobotId,
    x: f32,
    y: f32,
    z: f32,
) -> Result<Option<Collection>, BatteryError> {
    if !(x.is_finite() && y.is_finite() && z.is_finite()) {
        return Err(BatteryError::InvalidPosition { x, y, z });
    }

    let batteries = state.store.list_batteries().await?;
    let Some(battery) = nearest_in_range(&batteries, x, y, z, state.battery.collect_range) else {
        debug!(robot_id, x, y, z, "battery: collect found nothing in range");
        return Ok(None);
    };
    let battery_id = battery.id;

    let Some(drained) = state.store.apply_collection(robot_id, battery_id, now_ms()).await? else {
        debug!(robot_id, battery_id, "battery: collect lost the battery or robot has no state");
        return Ok(None);
    };
    info!(robot_id, battery_id, energy = drained.energy_after, "battery: collected");

    Ok(Some(Collection {
        robot_id,
        battery_id,
        gained: drained.energy_after - drained.energy_before,
        robot_energy: drained.energy_after,
    }))
}

#[cfg(test)]
#[path = "battery_test.rs"]
mod tests;
