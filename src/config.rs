//! Runtime configuration parsed from environment variables.
//!
//! Every knob has a default matching the hub's documented behavior, so an
//! empty environment yields a working in-memory server on port 7038.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 7038;
pub const DEFAULT_CHAT_MIN_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_CHAT_MESSAGE_TTL_SECS: u64 = 300;
pub const DEFAULT_BATTERY_STARTUP_DELAY_SECS: u64 = 5;
pub const DEFAULT_BATTERY_RESPAWN_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_BATTERY_LOOP_PERIOD_SECS: u64 = 30;
pub const DEFAULT_BATTERY_ERROR_BACKOFF_SECS: u64 = 10;
pub const DEFAULT_BATTERY_COLLECT_RANGE: f32 = 2.0;
pub const DEFAULT_BATTERY_SPAWN_HALF_EXTENT: i32 = 20;
pub const DEFAULT_WS_CHANNEL_CAPACITY: usize = 256;

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Hub-level knobs: chat gating and message retention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubConfig {
    pub chat_min_interval: Duration,
    pub message_ttl: Duration,
    pub channel_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            chat_min_interval: Duration::from_millis(DEFAULT_CHAT_MIN_INTERVAL_MS),
            message_ttl: Duration::from_secs(DEFAULT_CHAT_MESSAGE_TTL_SECS),
            channel_capacity: DEFAULT_WS_CHANNEL_CAPACITY,
        }
    }
}

/// Battery lifecycle knobs: respawn policy, loop cadence, collection range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryConfig {
    pub startup_delay: Duration,
    pub respawn_interval: Duration,
    pub loop_period: Duration,
    pub error_backoff: Duration,
    pub collect_range: f32,
    pub spawn_half_extent: i32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            startup_delay: Duration::from_secs(DEFAULT_BATTERY_STARTUP_DELAY_SECS),
            respawn_interval: Duration::from_secs(DEFAULT_BATTERY_RESPAWN_INTERVAL_SECS),
            loop_period: Duration::from_secs(DEFAULT_BATTERY_LOOP_PERIOD_SECS),
            error_backoff: Duration::from_secs(DEFAULT_BATTERY_ERROR_BACKOFF_SECS),
            collect_range: DEFAULT_BATTERY_COLLECT_RANGE,
            spawn_half_extent: DEFAULT_BATTERY_SPAWN_HALF_EXTENT,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    /// `None` runs against the seeded in-memory store.
    pub database_url: Option<String>,
    /// Persona-flavoured chat via the LLM gateway (`AI_ENABLED`).
    pub ai_enabled: bool,
    pub hub: HubConfig,
    pub battery: BatteryConfig,
}

impl AppConfig {
    /// Build the config from environment variables.
    ///
    /// Unparseable values fall back to their defaults rather than failing
    /// start-up; an empty `DATABASE_URL` counts as unset.
    #[must_use]
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let hub = HubConfig {
            chat_min_interval: Duration::from_millis(env_parse("CHAT_MIN_INTERVAL_MS", DEFAULT_CHAT_MIN_INTERVAL_MS)),
            message_ttl: Duration::from_secs(env_parse("CHAT_MESSAGE_TTL_SECS", DEFAULT_CHAT_MESSAGE_TTL_SECS)),
            channel_capacity: env_parse("WS_CHANNEL_CAPACITY", DEFAULT_WS_CHANNEL_CAPACITY).max(1),
        };

        let battery = BatteryConfig {
            startup_delay: Duration::from_secs(env_parse(
                "BATTERY_STARTUP_DELAY_SECS",
                DEFAULT_BATTERY_STARTUP_DELAY_SECS,
            )),
            respawn_interval: Duration::from_secs(env_parse(
                "BATTERY_RESPAWN_INTERVAL_SECS",
                DEFAULT_BATTERY_RESPAWN_INTERVAL_SECS,
            )),
            loop_period: Duration::from_secs(env_parse("BATTERY_LOOP_PERIOD_SECS", DEFAULT_BATTERY_LOOP_PERIOD_SECS)),
            error_backoff: Duration::from_secs(env_parse(
                "BATTERY_ERROR_BACKOFF_SECS",
                DEFAULT_BATTERY_ERROR_BACKOFF_SECS,
            )),
            collect_range: env_parse("BATTERY_COLLECT_RANGE", DEFAULT_BATTERY_COLLECT_RANGE),
            spawn_half_extent: env_parse("BATTERY_SPAWN_HALF_EXTENT", DEFAULT_BATTERY_SPAWN_HALF_EXTENT).abs(),
        };

        Self {
            port: env_parse("PORT", DEFAULT_PORT),
            database_url,
            ai_enabled: env_parse("AI_ENABLED", false),
            hub,
            battery,
        }
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
