//! AI service — persona-flavoured rewrites of robot chat.
//!
//! DESIGN
//! ======
//! `RobotAi` turns a robot's outgoing chat text into an in-character line.
//! The persona supplies the system prompt. A second system message headed
//! `Current context:` carries the nearby-robot count and the robot's vitals.
//! The robot's recent turns (bounded per robot) give the model continuity.
//!
//! ERROR HANDLING
//! ==============
//! `enhance` never fails. A gateway error or an empty reply is logged at
//! `warn` and the original text is returned verbatim.

use std::collections::{HashMap, VecDeque};
use std::fmt::Write;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::db::{Persona, RobotId, RobotState};
use crate::llm::LlmChat;
use crate::llm::types::{Message, Sampling};

/// Messages of history kept per robot.
pub const HISTORY_LIMIT: usize = 10;

pub struct RobotAi {
    llm: Arc<dyn LlmChat>,
    sampling: Sampling,
    history: Mutex<HashMap<RobotId, VecDeque<Message>>>,
}

impl RobotAi {
    #[must_use]
    pub fn new(llm: Arc<dyn LlmChat>, sampling: Sampling) -> Self {
        Self { llm, sampling, history: Mutex::new(HashMap::new()) }
    }

    /// Rewrite `text` in the voice of `persona`. Falls back to `text` on any
    /// failure.
    pub async fn enhance(
        &self,
        robot_id: RobotId,
        persona: &Persona,
        state: Option<&RobotState>,
        nearby_robots: usize,
        text: &str,
    ) -> String {
        let system = build_system_prompt(persona);
        let mut messages = vec![Message::system(build_context(state, nearby_robots))];
        messages.extend(self.history_for(robot_id));
        messages.push(Message::user(text));

        match self.llm.chat(&self.sampling, &system, &messages).await {
            Ok(resp) => {
                let reply = resp.text.trim();
                if reply.is_empty() {
                    warn!(robot_id, "ai: empty reply, using original text");
                    return text.to_string();
                }
                info!(robot_id, persona = %persona.name, output_tokens = resp.output_tokens, "ai: chat enhanced");
                self.remember(robot_id, text, reply);
                reply.to_string()
            }
            Err(e) => {
                warn!(robot_id, error = %e, "ai: gateway failed, using original text");
                text.to_string()
            }
        }
    }

    /// Snapshot of a robot's remembered turns, oldest first.
    #[must_use]
    pub fn history_for(&self, robot_id: RobotId) -> Vec<Message> {
        self.history()
            .get(&robot_id)
            .map(|turns| turns.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn remember(&self, robot_id: RobotId, prompt: &str, reply: &str) {
        let mut history = self.history();
        let turns = history.entry(robot_id).or_default();
        turns.push_back(Message::user(prompt));
        turns.push_back(Message::assistant(reply));
        while turns.len() > HISTORY_LIMIT {
            turns.pop_front();
        }
    }

    fn history(&self) -> MutexGuard<'_, HashMap<RobotId, VecDeque<Message>>> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) fn build_system_prompt(persona: &Persona) -> String {
    format!(
        "You are {}, a robot. {}\nKeep responses under 50 words.",
        persona.name, persona.instructions
    )
}

pub(crate) fn build_context(state: Option<&RobotState>, nearby_robots: usize) -> String {
    let mut out = String::from("Current context:");
    let _ = write!(out, "\nnearby_robots: {nearby_robots}");
    if let Some(s) = state {
        let _ = write!(out, "\nhealth: {}", s.health);
        let _ = write!(out, "\nenergy: {}", s.energy);
        let _ = write!(out, "\nhappiness: {}", s.happiness);
    }
    out
}

#[cfg(test)]
#[path = "ai_test.rs"]
mod tests;
