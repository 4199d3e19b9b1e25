//! WebSocket handler — robot event relay.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection ID, registers it with the hub, and
//! enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//!   (`robot`, `chat`, `range`, `battery`, `action`)
//! - Hub notifications addressed to this connection → forward to client
//!
//! Handler functions validate the payload, call services, and return an
//! `Outcome`. The dispatch layer owns all outbound concerns: the ack to the
//! sender and notifications to other audiences through the hub.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → hub connect → send `session:connected` with `connection_id` and `connected_at`
//! 2. Client sends frames → dispatch → handler returns Outcome
//! 3. Dispatch applies Outcome (ack / publish / both)
//! 4. Close → hub disconnect (publishes `robot:disconnected` if registered)

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{BatteryId, RobotId, RobotState};
use crate::frame::{Data, Frame, Status};
use crate::hub::{Audience, data};
use crate::services;
use crate::state::AppState;

// =============================================================================
// OUTCOME
// =============================================================================

/// A notification for some audience, produced by a handler.
struct Notice {
    audience: Audience,
    frame: Frame,
}

/// Result returned by handler functions. The dispatch layer uses this to
/// decide who receives what; handlers never send frames directly.
enum Outcome {
    /// Publish notices, then ack the sender with an empty done.
    Publish(Vec<Notice>),
    /// Publish notices with no ack to the sender.
    Notify(Vec<Notice>),
    /// Send done+data to sender only.
    Reply(Data),
    /// Send empty done to sender only.
    Done,
    /// Publish notices, then ack the sender with reply data.
    ReplyAndPublish { reply: Data, notices: Vec<Notice> },
}

// =============================================================================
// PAYLOADS
// =============================================================================

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    robot_id: RobotId,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct PositionPayload {
    robot_id: RobotId,
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Deserialize, Serialize)]
struct AttackPayload {
    attacker_id: RobotId,
    target_id: RobotId,
    damage: f32,
}

#[derive(Debug, Deserialize, Serialize)]
struct VitalsPayload {
    health: f32,
    energy: f32,
    max_energy: f32,
    happiness: i32,
    x: f32,
    y: f32,
    z: f32,
}

impl From<&RobotState> for VitalsPayload {
    fn from(s: &RobotState) -> Self {
        Self {
            health: s.health,
            energy: s.energy,
            max_energy: s.max_energy,
            happiness: s.happiness,
            x: s.x,
            y: s.y,
            z: s.z,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct StatePayload {
    robot_id: RobotId,
    state: VitalsPayload,
}

#[derive(Debug, Deserialize, Serialize)]
struct GroupSwitchPayload {
    robot_id: RobotId,
    #[serde(default)]
    new_group_id: Option<i32>,
    #[serde(default)]
    old_group_id: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RangePayload {
    robot_id: RobotId,
    other_id: RobotId,
}

#[derive(Debug, Deserialize, Serialize)]
struct CollectedPayload {
    robot_id: RobotId,
    battery_id: BatteryId,
}

#[derive(Debug, Deserialize)]
struct CollectPayload {
    robot_id: RobotId,
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Deserialize)]
struct ActionAttackPayload {
    attacker_id: RobotId,
    target_id: RobotId,
}

#[derive(Debug, Deserialize)]
struct WalkPayload {
    robot_id: RobotId,
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Debug, Deserialize)]
struct HappinessPayload {
    robot_id: RobotId,
    happiness: f32,
}

#[derive(Debug, Deserialize)]
struct RobotIdPayload {
    robot_id: RobotId,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();

    // Per-connection channel for hub notifications.
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.hub.channel_capacity());
    let session = state.hub.connect(connection_id, client_tx).await;

    let welcome = Frame::request("session:connected", Data::new())
        .with_data("connection_id", connection_id.to_string())
        .with_data("connected_at", session.connected_at);
    if send_frame(&mut socket, &welcome).await.is_ok() {
        info!(%connection_id, "ws: client connected");

        loop {
            tokio::select! {
                msg = socket.recv() => {
                    let Some(Ok(msg)) = msg else { break };
                    match msg {
                        Message::Text(text) => {
                            if dispatch_frame(&state, &mut socket, connection_id, &text).await.is_err() {
                                break;
                            }
                        }
                        Message::Close(_) => break,
                        _ => {}
                    }
                }
                Some(frame) = client_rx.recv() => {
                    if send_frame(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    state.hub.disconnect(connection_id).await;
    info!(%connection_id, "ws: client disconnected");
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

async fn dispatch_frame(state: &AppState, socket: &mut WebSocket, connection_id: Uuid, text: &str) -> Result<(), ()> {
    for frame in process_inbound_text(state, connection_id, text).await {
        send_frame(socket, &frame).await?;
    }
    Ok(())
}

/// Parse and process one inbound text frame and return frames for the sender.
///
/// Notifications for other audiences are published through the hub before
/// this returns, so tests can drive dispatch without a socket.
async fn process_inbound_text(state: &AppState, connection_id: Uuid, text: &str) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%connection_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };

    // Stamp the connection as `from`.
    req.from = Some(connection_id.to_string());

    if req.syscall == "robot:position" {
        debug!(%connection_id, id = %req.id, "ws: recv position");
    } else {
        info!(%connection_id, id = %req.id, syscall = %req.syscall, status = ?req.status, "ws: recv frame");
    }

    let prefix = req.prefix();
    let result = match prefix {
        "robot" => handle_robot(state, connection_id, &req).await,
        "chat" => handle_chat(state, connection_id, &req).await,
        "range" => handle_range(&req),
        "battery" => handle_battery(state, &req).await,
        "action" => handle_action(state, &req).await,
        _ => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Publish(notices)) => {
            publish_all(state, notices).await;
            vec![req.done()]
        }
        Ok(Outcome::Notify(notices)) => {
            publish_all(state, notices).await;
            vec![]
        }
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::ReplyAndPublish { reply, notices }) => {
            publish_all(state, notices).await;
            vec![req.done_with(reply)]
        }
        Err(err_frame) => vec![err_frame],
    }
}

async fn publish_all(state: &AppState, notices: Vec<Notice>) {
    for notice in notices {
        state.hub.publish(&notice.audience, &notice.frame).await;
    }
}

// =============================================================================
// ROBOT HANDLERS
// =============================================================================

async fn handle_robot(state: &AppState, connection_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "register" => {
            let p: RegisterPayload = parse(req)?;
            let name = p.name.unwrap_or_else(|| format!("robot-{}", p.robot_id));
            if !state.hub.register_robot(connection_id, p.robot_id, &name).await {
                return Err(req.error("connection is not open"));
            }
            Ok(Outcome::Done)
        }
        "position" => {
            let p: PositionPayload = parse(req)?;
            if !(p.x.is_finite() && p.y.is_finite() && p.z.is_finite()) {
                return Err(req.error("position must be finite"));
            }
            Ok(Outcome::Publish(vec![notice(req, Audience::All, "robot:position_updated", to_data(&p))]))
        }
        "attack" => {
            let p: AttackPayload = parse(req)?;
            Ok(Outcome::Publish(vec![notice(req, Audience::All, "robot:attacked", to_data(&p))]))
        }
        "state" => {
            let p: StatePayload = parse(req)?;
            Ok(Outcome::Publish(vec![notice(req, Audience::All, "robot:state_updated", to_data(&p))]))
        }
        "switch_group" => {
            let p: GroupSwitchPayload = parse(req)?;
            Ok(Outcome::Publish(vec![notice(req, Audience::All, "robot:group_changed", to_data(&p))]))
        }
        op => Err(req.error(format!("unknown robot op: {op}"))),
    }
}

// =============================================================================
// CHAT HANDLERS
// =============================================================================

async fn handle_chat(state: &AppState, connection_id: Uuid, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "send" => {
            let chat: services::chat::ChatRequest = parse(req)?;
            if chat.text.trim().is_empty() {
                return Err(req.error("text must not be empty"));
            }
            let audience = Audience::Groups(chat.visible_to.clone());

            match services::chat::send_chat(state, connection_id, chat).await {
                Ok(message) => {
                    let reply = data(json!({ "id": message.id, "text": message.text }));
                    let notices = vec![notice(req, audience, "chat:message", services::chat::message_data(&message))];
                    Ok(Outcome::ReplyAndPublish { reply, notices })
                }
                Err(limited) => {
                    debug!(%connection_id, retry_after_ms = limited.retry_after_ms(), "ws: chat rate limited");
                    let frame = Frame::request("chat:rate_limited", data(json!({ "retry_after_ms": limited.retry_after_ms() })))
                        .with_parent(req.id);
                    Ok(Outcome::Notify(vec![Notice { audience: Audience::Connection(connection_id), frame }]))
                }
            }
        }
        op => Err(req.error(format!("unknown chat op: {op}"))),
    }
}

// =============================================================================
// RANGE HANDLERS
// =============================================================================

/// Each robot's group learns about the other robot.
fn handle_range(req: &Frame) -> Result<Outcome, Frame> {
    let syscall = match req.op() {
        "enter" => "range:entered",
        "leave" => "range:left",
        op => return Err(req.error(format!("unknown range op: {op}"))),
    };
    let p: RangePayload = parse(req)?;

    Ok(Outcome::Publish(vec![
        notice(req, Audience::Groups(vec![p.robot_id]), syscall, data(json!({ "robot_id": p.other_id }))),
        notice(req, Audience::Groups(vec![p.other_id]), syscall, data(json!({ "robot_id": p.robot_id }))),
    ]))
}

// =============================================================================
// BATTERY HANDLERS
// =============================================================================

async fn handle_battery(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "collected" => {
            let p: CollectedPayload = parse(req)?;
            Ok(Outcome::Publish(vec![notice(req, Audience::All, "battery:collected", to_data(&p))]))
        }
        "collect" => {
            let p: CollectPayload = parse(req)?;
            match services::battery::collect_battery(state, p.robot_id, p.x, p.y, p.z).await {
                Ok(Some(c)) => {
                    let reply = data(json!({
                        "collected": true,
                        "battery_id": c.battery_id,
                        "gained": c.gained,
                        "energy": c.robot_energy,
                    }));
                    let payload = CollectedPayload { robot_id: c.robot_id, battery_id: c.battery_id };
                    let notices = vec![notice(req, Audience::All, "battery:collected", to_data(&payload))];
                    Ok(Outcome::ReplyAndPublish { reply, notices })
                }
                Ok(None) => Ok(Outcome::Reply(data(json!({ "collected": false })))),
                Err(e) => Err(req.error_from(&e)),
            }
        }
        op => Err(req.error(format!("unknown battery op: {op}"))),
    }
}

// =============================================================================
// ACTION HANDLERS
// =============================================================================

/// Server-decided moves. Results are announced with the same syscalls clients
/// use to relay their own events.
async fn handle_action(state: &AppState, req: &Frame) -> Result<Outcome, Frame> {
    match req.op() {
        "attack" => {
            let p: ActionAttackPayload = parse(req)?;
            let hit = services::robot::attack(state, p.attacker_id, p.target_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            let payload = AttackPayload { attacker_id: hit.attacker_id, target_id: hit.target_id, damage: hit.damage };
            Ok(Outcome::ReplyAndPublish {
                reply: to_data(&hit),
                notices: vec![notice(req, Audience::All, "robot:attacked", to_data(&payload))],
            })
        }
        "walk" => {
            let p: WalkPayload = parse(req)?;
            let change = services::robot::walk_towards(state, p.robot_id, p.x, p.y, p.z)
                .await
                .map_err(|e| req.error_from(&e))?;
            let s = &change.after;
            let position = PositionPayload { robot_id: p.robot_id, x: s.x, y: s.y, z: s.z };
            let reply = data(json!({
                "x": s.x,
                "y": s.y,
                "z": s.z,
                "energy": s.energy,
                "energy_used": change.before.energy - s.energy,
            }));
            Ok(Outcome::ReplyAndPublish {
                reply,
                notices: vec![notice(req, Audience::All, "robot:position_updated", to_data(&position))],
            })
        }
        "happiness" => {
            let p: HappinessPayload = parse(req)?;
            let change = services::robot::set_happiness(state, p.robot_id, p.happiness)
                .await
                .map_err(|e| req.error_from(&e))?;
            let reply = data(json!({
                "previous_happiness": change.before.happiness,
                "happiness": change.after.happiness,
            }));
            let payload = StatePayload { robot_id: p.robot_id, state: VitalsPayload::from(&change.after) };
            Ok(Outcome::ReplyAndPublish {
                reply,
                notices: vec![notice(req, Audience::All, "robot:state_updated", to_data(&payload))],
            })
        }
        "chat_data" => {
            let p: RobotIdPayload = parse(req)?;
            let chat = services::robot::chat_data(state, p.robot_id)
                .await
                .map_err(|e| req.error_from(&e))?;
            Ok(Outcome::Reply(to_data(&chat)))
        }
        op => Err(req.error(format!("unknown action op: {op}"))),
    }
}

// =============================================================================
// HELPERS
// =============================================================================

/// Deserialize the request data into a typed payload.
fn parse<T: DeserializeOwned>(req: &Frame) -> Result<T, Frame> {
    let value = serde_json::Value::Object(req.data.clone().into_iter().collect());
    serde_json::from_value(value).map_err(|e| req.error(format!("invalid {} payload: {e}", req.syscall)))
}

fn to_data(payload: &impl Serialize) -> Data {
    data(serde_json::to_value(payload).unwrap_or_default())
}

/// A notification frame stamped with the originating connection.
fn notice(req: &Frame, audience: Audience, syscall: &str, data: Data) -> Notice {
    let mut frame = Frame::request(syscall, data);
    frame.from.clone_from(&req.from);
    Notice { audience, frame }
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame
            .data
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let message = frame
            .data
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    } else if frame.syscall.starts_with("robot:position") {
        debug!(id = %frame.id, syscall = %frame.syscall, "ws: send frame");
    } else {
        info!(id = %frame.id, syscall = %frame.syscall, status = ?frame.status, "ws: send frame");
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
