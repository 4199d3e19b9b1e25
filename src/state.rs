//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor and
//! cloned into the battery loop. It holds the world store, the hub (registry,
//! groups, chat log), the optional persona-chat AI, and the battery knobs.
//! Clone is required by Axum; every field is Arc-wrapped or Copy.

use std::sync::Arc;

use crate::config::BatteryConfig;
use crate::db::WorldStore;
use crate::hub::Hub;
use crate::services::ai::RobotAi;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn WorldStore>,
    pub hub: Hub,
    /// Persona-flavoured chat. `None` when AI is disabled or unconfigured.
    pub ai: Option<Arc<RobotAi>>,
    pub battery: BatteryConfig,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn WorldStore>, hub: Hub, ai: Option<Arc<RobotAi>>, battery: BatteryConfig) -> Self {
        Self { store, hub, ai, battery }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
#[path = "state_helpers_test.rs"]
pub mod test_helpers;

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
