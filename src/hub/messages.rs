//! Time-windowed log of recent chat messages.
//!
//! The log is pruned on every append; nothing else bounds its size. Entries
//! older than the TTL are dropped whether or not they were ever delivered.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::db::RobotId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub from_robot_id: RobotId,
    pub text: String,
    /// Milliseconds since Unix epoch.
    pub ts: i64,
    pub visible_to: Vec<RobotId>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(from_robot_id: RobotId, text: impl Into<String>, visible_to: Vec<RobotId>, ts: i64) -> Self {
        Self { id: Uuid::new_v4(), from_robot_id, text: text.into(), ts, visible_to }
    }
}

#[derive(Debug)]
pub struct MessageStore {
    ttl_ms: i64,
    messages: VecDeque<ChatMessage>,
}

impl MessageStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self { ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX), messages: VecDeque::new() }
    }

    /// Drop every message older than the TTL as of `now_ms`. Returns how many
    /// were removed.
    pub fn prune(&mut self, now_ms: i64) -> usize {
        let before = self.messages.len();
        let ttl_ms = self.ttl_ms;
        self.messages
            .retain(|m| now_ms.saturating_sub(m.ts) <= ttl_ms);
        before - self.messages.len()
    }

    /// Prune, then append.
    pub fn push(&mut self, message: ChatMessage, now_ms: i64) -> usize {
        let pruned = self.prune(now_ms);
        self.messages.push_back(message);
        pruned
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }
}

#[cfg(test)]
#[path = "messages_test.rs"]
mod tests;
