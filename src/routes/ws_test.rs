use super::*;
use crate::state::test_helpers;
use futures::{SinkExt, StreamExt};
use tokio::time::{Duration, timeout};
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn request_text(syscall: &str, value: serde_json::Value) -> (Uuid, String) {
    let req = Frame::request(syscall, data(value));
    (req.id, serde_json::to_string(&req).unwrap())
}

async fn connect(state: &AppState) -> (Uuid, mpsc::Receiver<Frame>) {
    let connection_id = Uuid::new_v4();
    let (tx, rx) = mpsc::channel(state.hub.channel_capacity());
    state.hub.connect(connection_id, tx).await;
    (connection_id, rx)
}

/// Connect and bind a robot, discarding the `robot:connected` notices it causes.
async fn connect_robot(state: &AppState, robot_id: RobotId, peers: &mut [&mut mpsc::Receiver<Frame>]) -> (Uuid, mpsc::Receiver<Frame>) {
    let (connection_id, mut rx) = connect(state).await;
    state.hub.register_robot(connection_id, robot_id, "bot").await;
    drain(&mut rx);
    for peer in peers.iter_mut() {
        drain(peer);
    }
    (connection_id, rx)
}

fn drain(rx: &mut mpsc::Receiver<Frame>) {
    while rx.try_recv().is_ok() {}
}

async fn recv_notice(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("notice receive timed out")
        .expect("notice channel closed unexpectedly")
}

async fn assert_no_notice(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected no notice frame"
    );
}

// =============================================================================
// DISPATCH
// =============================================================================

#[tokio::test]
async fn invalid_json_returns_gateway_error() {
    let state = test_helpers::test_app_state();
    let (id, _rx) = connect(&state).await;

    let frames = process_inbound_text(&state, id, "{not json").await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].syscall, "gateway:error");
    assert!(frames[0].data["message"].as_str().unwrap().starts_with("invalid json"));
}

#[tokio::test]
async fn unknown_prefix_and_op_return_errors() {
    let state = test_helpers::test_app_state();
    let (id, _rx) = connect(&state).await;

    let (_, text) = request_text("board:join", json!({}));
    let frames = process_inbound_text(&state, id, &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].data["message"], "unknown prefix: board");

    let (_, text) = request_text("robot:dance", json!({}));
    let frames = process_inbound_text(&state, id, &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].data["message"], "unknown robot op: dance");
}

// =============================================================================
// ROBOT
// =============================================================================

#[tokio::test]
async fn register_announces_robot_and_disconnect_announces_departure() {
    let state = test_helpers::test_app_state();
    let (watcher, mut watcher_rx) = connect(&state).await;
    let (sender, _sender_rx) = connect(&state).await;

    let (req_id, text) = request_text("robot:register", json!({ "robot_id": 5, "name": "Sparky" }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].parent_id, Some(req_id));

    let connected = recv_notice(&mut watcher_rx).await;
    assert_eq!(connected.syscall, "robot:connected");
    assert_eq!(connected.data["robot_id"], 5);
    assert_eq!(connected.data["name"], "Sparky");

    assert_eq!(state.hub.disconnect(sender).await, Some(5));
    let gone = recv_notice(&mut watcher_rx).await;
    assert_eq!(gone.syscall, "robot:disconnected");
    assert_eq!(gone.data["robot_id"], 5);

    assert!(state.hub.session(watcher).await.is_some());
}

#[tokio::test]
async fn position_is_relayed_to_everyone_including_sender() {
    let state = test_helpers::test_app_state();
    let (sender, mut sender_rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    let (_, text) = request_text("robot:position", json!({ "robot_id": 1, "x": 1.5, "y": 0.0, "z": -2.0 }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Done);

    for rx in [&mut sender_rx, &mut peer_rx] {
        let notice = recv_notice(rx).await;
        assert_eq!(notice.syscall, "robot:position_updated");
        assert_eq!(notice.status, Status::Request);
        assert_eq!(notice.data["robot_id"], 1);
        assert_eq!(notice.data["x"], 1.5);
        assert_eq!(notice.data["z"], -2.0);
        assert_eq!(notice.from.as_deref(), Some(sender.to_string().as_str()));
    }
}

#[tokio::test]
async fn malformed_position_is_rejected_without_relay() {
    let state = test_helpers::test_app_state();
    let (sender, _sender_rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    let (_, text) = request_text("robot:position", json!({ "robot_id": 1, "x": 1.0 }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert!(
        frames[0].data["message"]
            .as_str()
            .unwrap()
            .starts_with("invalid robot:position payload")
    );
    assert_no_notice(&mut peer_rx).await;
}

#[tokio::test]
async fn attack_and_state_are_relayed_to_all() {
    let state = test_helpers::test_app_state();
    let (sender, _sender_rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    let (_, text) = request_text("robot:attack", json!({ "attacker_id": 1, "target_id": 2, "damage": 12.5 }));
    process_inbound_text(&state, sender, &text).await;
    let attacked = recv_notice(&mut peer_rx).await;
    assert_eq!(attacked.syscall, "robot:attacked");
    assert_eq!(attacked.data["target_id"], 2);
    assert_eq!(attacked.data["damage"], 12.5);

    let vitals = json!({ "health": 90.0, "energy": 40.0, "max_energy": 100.0, "happiness": 60, "x": 1.0, "y": 0.0, "z": 2.0 });
    let (_, text) = request_text("robot:state", json!({ "robot_id": 2, "state": vitals }));
    process_inbound_text(&state, sender, &text).await;
    let updated = recv_notice(&mut peer_rx).await;
    assert_eq!(updated.syscall, "robot:state_updated");
    assert_eq!(updated.data["robot_id"], 2);
    assert_eq!(updated.data["state"]["happiness"], 60);
    assert_eq!(updated.data["state"]["energy"], 40.0);
}

#[tokio::test]
async fn switch_group_relays_optional_ids_as_null() {
    let state = test_helpers::test_app_state();
    let (sender, mut sender_rx) = connect(&state).await;

    let (_, text) = request_text("robot:switch_group", json!({ "robot_id": 1, "new_group_id": 4 }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Done);

    let changed = recv_notice(&mut sender_rx).await;
    assert_eq!(changed.syscall, "robot:group_changed");
    assert_eq!(changed.data["new_group_id"], 4);
    assert!(changed.data["old_group_id"].is_null());
}

// =============================================================================
// CHAT
// =============================================================================

#[tokio::test]
async fn chat_reaches_only_visible_robots() {
    let state = test_helpers::test_app_state();
    let (sender, mut sender_rx) = connect_robot(&state, 1, &mut []).await;
    let (_r2, mut rx2) = connect_robot(&state, 2, &mut [&mut sender_rx]).await;
    let (_r3, mut rx3) = connect_robot(&state, 3, &mut [&mut sender_rx, &mut rx2]).await;

    let (_, text) = request_text("chat:send", json!({ "from_robot_id": 1, "text": "hello", "visible_to": [2] }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].data["text"], "hello");

    let message = recv_notice(&mut rx2).await;
    assert_eq!(message.syscall, "chat:message");
    assert_eq!(message.data["from_robot_id"], 1);
    assert_eq!(message.data["text"], "hello");
    assert_eq!(message.data["visible_to"], json!([2]));

    assert_no_notice(&mut rx3).await;
    assert_no_notice(&mut sender_rx).await;
    assert_eq!(state.hub.recent_messages().len(), 1);
}

#[tokio::test]
async fn second_chat_within_interval_is_rate_limited() {
    let state = test_helpers::test_app_state();
    let (sender, mut sender_rx) = connect_robot(&state, 1, &mut []).await;
    let (_r2, mut rx2) = connect_robot(&state, 2, &mut [&mut sender_rx]).await;

    let (_, first) = request_text("chat:send", json!({ "from_robot_id": 1, "text": "one", "visible_to": [2] }));
    process_inbound_text(&state, sender, &first).await;
    assert_eq!(recv_notice(&mut rx2).await.data["text"], "one");

    let (req_id, second) = request_text("chat:send", json!({ "from_robot_id": 1, "text": "two", "visible_to": [2] }));
    let frames = process_inbound_text(&state, sender, &second).await;
    assert!(frames.is_empty());

    let limited = recv_notice(&mut sender_rx).await;
    assert_eq!(limited.syscall, "chat:rate_limited");
    assert_eq!(limited.parent_id, Some(req_id));
    assert!(limited.data["retry_after_ms"].as_u64().unwrap() > 0);

    assert_no_notice(&mut rx2).await;
    assert_eq!(state.hub.recent_messages().len(), 1);
}

#[tokio::test]
async fn chat_requires_text() {
    let state = test_helpers::test_app_state();
    let (sender, _rx) = connect(&state).await;

    let (_, text) = request_text("chat:send", json!({ "from_robot_id": 1, "text": "   " }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert!(state.hub.recent_messages().is_empty());
}

// =============================================================================
// RANGE
// =============================================================================

#[tokio::test]
async fn range_enter_notifies_each_robot_about_the_other() {
    let state = test_helpers::test_app_state();
    let (sender, mut rx1) = connect_robot(&state, 1, &mut []).await;
    let (_r2, mut rx2) = connect_robot(&state, 2, &mut [&mut rx1]).await;

    let (_, text) = request_text("range:enter", json!({ "robot_id": 1, "other_id": 2 }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Done);

    let to_first = recv_notice(&mut rx1).await;
    assert_eq!(to_first.syscall, "range:entered");
    assert_eq!(to_first.data["robot_id"], 2);

    let to_second = recv_notice(&mut rx2).await;
    assert_eq!(to_second.syscall, "range:entered");
    assert_eq!(to_second.data["robot_id"], 1);

    let (_, text) = request_text("range:leave", json!({ "robot_id": 1, "other_id": 2 }));
    process_inbound_text(&state, sender, &text).await;
    assert_eq!(recv_notice(&mut rx1).await.syscall, "range:left");
    assert_eq!(recv_notice(&mut rx2).await.syscall, "range:left");
}

// =============================================================================
// BATTERY
// =============================================================================

#[tokio::test]
async fn collect_drains_battery_and_announces_once() {
    let state = test_helpers::test_app_state();
    let (sender, mut sender_rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    // Battery 1 sits at (10, 0, 5) with 50 energy; robot 1 has 80/100.
    let (_, text) = request_text("battery:collect", json!({ "robot_id": 1, "x": 10.0, "y": 0.0, "z": 5.0 }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].data["collected"], true);
    assert_eq!(frames[0].data["battery_id"], 1);
    assert_eq!(frames[0].data["energy"], 100.0);

    for rx in [&mut sender_rx, &mut peer_rx] {
        let collected = recv_notice(rx).await;
        assert_eq!(collected.syscall, "battery:collected");
        assert_eq!(collected.data["robot_id"], 1);
        assert_eq!(collected.data["battery_id"], 1);
    }

    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].data["collected"], false);
    assert_no_notice(&mut peer_rx).await;
}

#[tokio::test]
async fn collected_is_relayed_verbatim() {
    let state = test_helpers::test_app_state();
    let (sender, _sender_rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    let (_, text) = request_text("battery:collected", json!({ "robot_id": 2, "battery_id": 3 }));
    process_inbound_text(&state, sender, &text).await;

    let relayed = recv_notice(&mut peer_rx).await;
    assert_eq!(relayed.syscall, "battery:collected");
    assert_eq!(relayed.data["robot_id"], 2);
    assert_eq!(relayed.data["battery_id"], 3);
}

#[tokio::test]
async fn collect_store_failure_returns_structured_error() {
    let state = test_helpers::test_app_state_with_store(std::sync::Arc::new(test_helpers::FailingStore));
    let (sender, _rx) = connect(&state).await;

    let (_, text) = request_text("battery:collect", json!({ "robot_id": 1, "x": 0.0, "y": 0.0, "z": 0.0 }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].data["code"], "E_STORE");
    assert_eq!(frames[0].data["retryable"], true);
}

// =============================================================================
// ACTIONS
// =============================================================================

#[tokio::test]
async fn action_attack_replies_with_outcome_and_announces_hit() {
    let state = test_helpers::test_app_state();
    let (sender, mut sender_rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    let (_, text) = request_text("action:attack", json!({ "attacker_id": 1, "target_id": 2 }));
    let frames = process_inbound_text(&state, sender, &text).await;

    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].data["previous_health"], 100.0);
    assert_eq!(frames[0].data["health"], 90.0);
    assert_eq!(frames[0].data["damage"], 10.0);
    for rx in [&mut sender_rx, &mut peer_rx] {
        let hit = recv_notice(rx).await;
        assert_eq!(hit.syscall, "robot:attacked");
        assert_eq!(hit.data["attacker_id"], 1);
        assert_eq!(hit.data["target_id"], 2);
        assert_eq!(hit.data["damage"], 10.0);
    }
}

#[tokio::test]
async fn action_attack_out_of_range_is_an_error_without_notice() {
    let state = test_helpers::test_app_state();
    let (sender, _rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    let (_, text) = request_text("action:walk", json!({ "robot_id": 2, "x": 100.0, "y": 0.0, "z": 100.0 }));
    for _ in 0..5 {
        process_inbound_text(&state, sender, &text).await;
    }
    drain(&mut peer_rx);

    let (_, text) = request_text("action:attack", json!({ "attacker_id": 1, "target_id": 2 }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Error);
    assert_eq!(frames[0].data["code"], "E_OUT_OF_RANGE");
    assert_no_notice(&mut peer_rx).await;
}

#[tokio::test]
async fn action_walk_moves_robot_and_announces_position() {
    let state = test_helpers::test_app_state();
    let (sender, _rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    let (_, text) = request_text("action:walk", json!({ "robot_id": 1, "x": 0.0, "y": 0.0, "z": -10.0 }));
    let frames = process_inbound_text(&state, sender, &text).await;

    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].data["z"], -2.0);
    assert_eq!(frames[0].data["energy"], 79.5);
    assert_eq!(frames[0].data["energy_used"], 0.5);
    let moved = recv_notice(&mut peer_rx).await;
    assert_eq!(moved.syscall, "robot:position_updated");
    assert_eq!(moved.data["robot_id"], 1);
    assert_eq!(moved.data["z"], -2.0);
}

#[tokio::test]
async fn action_happiness_clamps_and_announces_state() {
    let state = test_helpers::test_app_state();
    let (sender, _rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    let (_, text) = request_text("action:happiness", json!({ "robot_id": 2, "happiness": 250.5 }));
    let frames = process_inbound_text(&state, sender, &text).await;

    assert_eq!(frames[0].data["previous_happiness"], 85);
    assert_eq!(frames[0].data["happiness"], 100);
    let updated = recv_notice(&mut peer_rx).await;
    assert_eq!(updated.syscall, "robot:state_updated");
    assert_eq!(updated.data["robot_id"], 2);
    assert_eq!(updated.data["state"]["happiness"], 100);
    assert_eq!(updated.data["state"]["max_energy"], 100.0);
}

#[tokio::test]
async fn action_chat_data_replies_to_sender_only() {
    let state = test_helpers::test_app_state();
    let (sender, mut sender_rx) = connect(&state).await;
    let (_peer, mut peer_rx) = connect(&state).await;

    let (_, text) = request_text("chat:send", json!({ "from_robot_id": 2, "text": "hi", "visible_to": [1] }));
    process_inbound_text(&state, sender, &text).await;
    drain(&mut sender_rx);
    drain(&mut peer_rx);

    let (_, text) = request_text("action:chat_data", json!({ "robot_id": 1 }));
    let frames = process_inbound_text(&state, sender, &text).await;

    assert_eq!(frames[0].status, Status::Done);
    assert_eq!(frames[0].data["robot"]["id"], 1);
    assert_eq!(frames[0].data["nearby"][0]["id"], 2);
    assert_eq!(frames[0].data["messages"][0]["text"], "hi");
    assert_no_notice(&mut peer_rx).await;
}

#[tokio::test]
async fn action_for_unknown_robot_and_op() {
    let state = test_helpers::test_app_state();
    let (sender, _rx) = connect(&state).await;

    let (_, text) = request_text("action:happiness", json!({ "robot_id": 77, "happiness": 10 }));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].data["code"], "E_ROBOT_NOT_FOUND");

    let (_, text) = request_text("action:dance", json!({}));
    let frames = process_inbound_text(&state, sender, &text).await;
    assert_eq!(frames[0].status, Status::Error);
}

// =============================================================================
// END TO END
// =============================================================================

type Client = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(state: AppState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, crate::routes::app(state)).await.unwrap();
    });
    format!("ws://{addr}/api/ws")
}

async fn next_frame(client: &mut Client) -> Frame {
    loop {
        let msg = timeout(Duration::from_secs(2), client.next())
            .await
            .expect("socket receive timed out")
            .expect("socket closed unexpectedly")
            .expect("socket error");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

#[tokio::test]
async fn socket_lifecycle_announces_register_and_disconnect() {
    let url = serve(test_helpers::test_app_state()).await;

    let (mut watcher, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let welcome = next_frame(&mut watcher).await;
    assert_eq!(welcome.syscall, "session:connected");
    assert!(welcome.data["connection_id"].as_str().is_some());
    assert!(welcome.data["connected_at"].as_i64().unwrap() > 0);

    let (mut robot, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    assert_eq!(next_frame(&mut robot).await.syscall, "session:connected");

    let (req_id, text) = request_text("robot:register", json!({ "robot_id": 5, "name": "Sparky" }));
    robot.send(WsMessage::text(text)).await.unwrap();

    let ack = next_frame(&mut robot).await;
    assert_eq!(ack.status, Status::Done);
    assert_eq!(ack.parent_id, Some(req_id));

    let connected = next_frame(&mut watcher).await;
    assert_eq!(connected.syscall, "robot:connected");
    assert_eq!(connected.data["name"], "Sparky");

    robot.close(None).await.unwrap();

    let gone = next_frame(&mut watcher).await;
    assert_eq!(gone.syscall, "robot:disconnected");
    assert_eq!(gone.data["robot_id"], 5);
}

#[tokio::test]
async fn socket_answers_bad_json_and_stays_open() {
    let url = serve(test_helpers::test_app_state()).await;
    let (mut client, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    next_frame(&mut client).await;

    client.send(WsMessage::text("nope")).await.unwrap();
    assert_eq!(next_frame(&mut client).await.syscall, "gateway:error");

    let (_, text) = request_text("robot:position", json!({ "robot_id": 1, "x": 0.0, "y": 0.0, "z": 0.0 }));
    client.send(WsMessage::text(text)).await.unwrap();
    assert_eq!(next_frame(&mut client).await.status, Status::Done);
    assert_eq!(next_frame(&mut client).await.syscall, "robot:position_updated");
}
