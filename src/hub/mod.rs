//! Hub — connection registry, robot groups, and fan-out.
//!
//! DESIGN
//! ======
//! One `Hub` value per process, cloned into every handler through
//! `AppState`. It owns:
//! - the registry: connection id → session record (robot, name, outbound
//!   channel, last accepted chat time);
//! - the robot groups: robot id → connections registered as that robot;
//! - the recent chat log (`MessageStore`), pruned on every append.
//!
//! All fan-out goes through `publish(audience, frame)`. Delivery is
//! `try_send` per recipient: a full or closed channel is skipped, never
//! awaited.
//!
//! LOCKING
//! =======
//! Registry and groups share one `tokio::sync::RwLock`. The message log sits
//! behind a `std::sync::Mutex` that is never held across an await. Neither
//! lock is held while the other is taken.

pub mod messages;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::db::RobotId;
use crate::frame::{Data, Frame, now_ms};
use crate::rate_limit::{RateLimitError, RateLimiter};

pub use messages::{ChatMessage, MessageStore};

// =============================================================================
// TYPES
// =============================================================================

/// Who receives a published frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    /// Every live connection.
    All,
    /// A single connection (usually the caller).
    Connection(Uuid),
    /// Every connection registered as one of these robots. A connection in
    /// several listed groups receives the frame once.
    Groups(Vec<RobotId>),
}

/// Public snapshot of a connection's session record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub connection_id: Uuid,
    pub robot_id: Option<RobotId>,
    pub robot_name: Option<String>,
    /// Milliseconds since Unix epoch.
    pub connected_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub robots: Vec<RobotId>,
    pub recent_messages: usize,
}

struct Connection {
    robot_id: Option<RobotId>,
    robot_name: Option<String>,
    connected_at: i64,
    last_message_at: Option<Instant>,
    tx: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct Registry {
    connections: HashMap<Uuid, Connection>,
    groups: HashMap<RobotId, HashSet<Uuid>>,
}

impl Registry {
    fn leave_group(&mut self, robot_id: RobotId, connection_id: Uuid) {
        if let Some(members) = self.groups.get_mut(&robot_id) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.groups.remove(&robot_id);
            }
        }
    }
}

#[derive(Clone)]
pub struct Hub {
    registry: Arc<RwLock<Registry>>,
    messages: Arc<Mutex<MessageStore>>,
    limiter: RateLimiter,
    channel_capacity: usize,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

impl Hub {
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            messages: Arc::new(Mutex::new(MessageStore::new(config.message_ttl))),
            limiter: RateLimiter::new(config.chat_min_interval),
            channel_capacity: config.channel_capacity,
        }
    }

    /// Bound for per-connection outbound channels.
    #[must_use]
    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }

    /// Register a fresh session for a transport connection.
    pub async fn connect(&self, connection_id: Uuid, tx: mpsc::Sender<Frame>) -> Session {
        let connected_at = now_ms();
        let mut registry = self.registry.write().await;
        registry.connections.insert(
            connection_id,
            Connection { robot_id: None, robot_name: None, connected_at, last_message_at: None, tx },
        );
        info!(%connection_id, connections = registry.connections.len(), "hub: connection opened");
        Session { connection_id, robot_id: None, robot_name: None, connected_at }
    }

    /// Remove a session and its group membership. Announces
    /// `robot:disconnected` to everyone left when a robot was registered.
    /// Unknown ids are a silent no-op.
    pub async fn disconnect(&self, connection_id: Uuid) -> Option<RobotId> {
        let robot_id = {
            let mut registry = self.registry.write().await;
            let conn = registry.connections.remove(&connection_id)?;
            if let Some(robot_id) = conn.robot_id {
                registry.leave_group(robot_id, connection_id);
            }
            info!(%connection_id, robot_id = ?conn.robot_id, connections = registry.connections.len(), "hub: connection closed");
            conn.robot_id
        };

        if let Some(robot_id) = robot_id {
            let frame = Frame::request("robot:disconnected", data(json!({ "robot_id": robot_id })));
            self.publish(&Audience::All, &frame).await;
        }
        robot_id
    }

    /// Bind a connection to a robot and join that robot's group. Announces
    /// `robot:connected` to everyone. Returns `false` for unknown connections.
    pub async fn register_robot(&self, connection_id: Uuid, robot_id: RobotId, name: &str) -> bool {
        {
            let mut registry = self.registry.write().await;
            let Some(conn) = registry.connections.get_mut(&connection_id) else {
                return false;
            };
            let previous = conn.robot_id.replace(robot_id);
            conn.robot_name = Some(name.to_owned());
            if let Some(previous) = previous.filter(|p| *p != robot_id) {
                registry.leave_group(previous, connection_id);
            }
            registry.groups.entry(robot_id).or_default().insert(connection_id);
            info!(%connection_id, robot_id, robot_name = name, "hub: robot registered");
        }

        let frame = Frame::request("robot:connected", data(json!({ "robot_id": robot_id, "name": name })));
        self.publish(&Audience::All, &frame).await;
        true
    }

    #[cfg(test)]
    pub async fn session(&self, connection_id: Uuid) -> Option<Session> {
        let registry = self.registry.read().await;
        registry.connections.get(&connection_id).map(|conn| Session {
            connection_id,
            robot_id: conn.robot_id,
            robot_name: conn.robot_name.clone(),
            connected_at: conn.connected_at,
        })
    }

    pub async fn stats(&self) -> HubStats {
        let (connections, robots) = {
            let registry = self.registry.read().await;
            let robots: BTreeSet<RobotId> = registry.groups.keys().copied().collect();
            (registry.connections.len(), robots.into_iter().collect())
        };
        HubStats { connections, robots, recent_messages: self.messages().iter().count() }
    }
}

// =============================================================================
// CHAT
// =============================================================================

impl Hub {
    /// Gate a chat send from `connection_id`. On acceptance the session's
    /// last-message time advances. Connections without a session pass.
    ///
    /// # Errors
    ///
    /// Returns `RateLimitError::TooSoon` when the previous accepted send is
    /// within the minimum interval.
    pub async fn check_chat_rate(&self, connection_id: Uuid) -> Result<(), RateLimitError> {
        self.check_chat_rate_at(connection_id, Instant::now()).await
    }

    pub(crate) async fn check_chat_rate_at(&self, connection_id: Uuid, now: Instant) -> Result<(), RateLimitError> {
        let mut registry = self.registry.write().await;
        let Some(conn) = registry.connections.get_mut(&connection_id) else {
            return Ok(());
        };
        self.limiter.check_and_record_at(&mut conn.last_message_at, now)
    }

    /// Append to the recent chat log, pruning expired entries first.
    pub fn record_message(&self, message: ChatMessage) {
        let pruned = self.messages().push(message, now_ms());
        if pruned > 0 {
            debug!(pruned, "hub: expired chat messages pruned");
        }
    }

    #[must_use]
    pub fn recent_messages(&self) -> Vec<ChatMessage> {
        self.messages().iter().cloned().collect()
    }

    fn messages(&self) -> MutexGuard<'_, MessageStore> {
        self.messages.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// =============================================================================
// FAN-OUT
// =============================================================================

impl Hub {
    /// Deliver `frame` to `audience`. Returns the number of connections the
    /// frame was queued for.
    pub async fn publish(&self, audience: &Audience, frame: &Frame) -> usize {
        let registry = self.registry.read().await;
        let targets: Vec<Uuid> = match audience {
            Audience::All => registry.connections.keys().copied().collect(),
            Audience::Connection(id) => vec![*id],
            Audience::Groups(robot_ids) => {
                let mut ids = HashSet::new();
                for robot_id in robot_ids {
                    if let Some(members) = registry.groups.get(robot_id) {
                        ids.extend(members.iter().copied());
                    }
                }
                ids.into_iter().collect()
            }
        };

        let mut delivered = 0;
        for id in targets {
            let Some(conn) = registry.connections.get(&id) else {
                continue;
            };
            // Best-effort: if a client's channel is full or closed, skip it.
            if conn.tx.try_send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(syscall = %frame.syscall, delivered, "hub: published");
        delivered
    }
}

/// Convert a JSON object literal into frame data. Non-objects yield empty data.
#[must_use]
pub fn data(value: serde_json::Value) -> Data {
    match value {
        serde_json::Value::Object(map) => map.into_iter().collect(),
        _ => Data::new(),
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
