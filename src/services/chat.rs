//! Chat service — gate, optionally rewrite, and log robot chat.
//!
//! The caller's connection is rate limited first; a rejected send is neither
//! rewritten nor logged. Delivery to the `visible_to` groups belongs to the
//! dispatch layer.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::RobotId;
use crate::frame::{Data, now_ms};
use crate::hub::{ChatMessage, data};
use crate::rate_limit::RateLimitError;
use crate::services::robot::{CHAT_RANGE, nearby_robots};
use crate::state::AppState;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub from_robot_id: RobotId,
    pub text: String,
    #[serde(default)]
    pub visible_to: Vec<RobotId>,
    /// Rewrite the text in the sender's persona voice before delivery.
    #[serde(default)]
    pub enhance: bool,
}

/// Accept a chat send from `connection_id` and log it.
///
/// # Errors
///
/// Returns `RateLimitError` when the connection sent too recently.
pub async fn send_chat(state: &AppState, connection_id: Uuid, req: ChatRequest) -> Result<ChatMessage, RateLimitError> {
    state.hub.check_chat_rate(connection_id).await?;

    let text = if req.enhance { enhance_text(state, &req).await } else { req.text };
    let message = ChatMessage::new(req.from_robot_id, text, req.visible_to, now_ms());
    state.hub.record_message(message.clone());
    debug!(%connection_id, from_robot_id = message.from_robot_id, recipients = ?message.visible_to, "chat: accepted");
    Ok(message)
}

async fn enhance_text(state: &AppState, req: &ChatRequest) -> String {
    let Some(ai) = &state.ai else {
        debug!(robot_id = req.from_robot_id, "chat: enhance requested but AI disabled");
        return req.text.clone();
    };

    let robots = match state.store.list_robots().await {
        Ok(robots) => robots,
        Err(e) => {
            warn!(robot_id = req.from_robot_id, error = %e, "chat: robot lookup failed");
            return req.text.clone();
        }
    };
    let Some(robot) = robots.iter().find(|r| r.id == req.from_robot_id) else {
        debug!(robot_id = req.from_robot_id, "chat: enhance skipped, unknown robot");
        return req.text.clone();
    };
    let nearby = robot
        .state
        .as_ref()
        .map_or(0, |s| nearby_robots(&robots, s, CHAT_RANGE).len());
    let persona = match state.store.find_persona(robot.persona_id).await {
        Ok(Some(persona)) => persona,
        Ok(None) => {
            debug!(robot_id = robot.id, persona_id = robot.persona_id, "chat: enhance skipped, unknown persona");
            return req.text.clone();
        }
        Err(e) => {
            warn!(robot_id = robot.id, error = %e, "chat: persona lookup failed");
            return req.text.clone();
        }
    };

    ai.enhance(robot.id, &persona, robot.state.as_ref(), nearby, &req.text)
        .await
}

/// Payload of a `chat:message` notification.
#[must_use]
pub fn message_data(message: &ChatMessage) -> Data {
    data(json!({
        "id": message.id,
        "from_robot_id": message.from_robot_id,
        "text": message.text,
        "ts": message.ts,
        "visible_to": message.visible_to,
    }))
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
