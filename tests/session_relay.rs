//! Session Relay Tests
//!
//! End-to-end flows through a running relay: a real WebSocket client on one
//! side and a mock realtime API on the other.

mod fixtures;
mod mock_upstream;

use futures_util::SinkExt;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

use fixtures::*;
use mock_upstream::{MockUpstream, UpstreamConnection};
use realtime_relay::AgentCatalog;

/// Connect a client for `session_id` and consume the initial session.update.
async fn open_session(
    upstream: &mut MockUpstream,
    addr: std::net::SocketAddr,
    session_id: &str,
) -> (Client, UpstreamConnection, Value) {
    let client = connect_session(addr, session_id).await;
    let mut conn = upstream.accept().await;
    let update = conn.expect_event("session.update").await;
    (client, conn, update)
}

fn user_item_created(item_id: &str, text: &str) -> Value {
    json!({
        "type": "conversation.item.created",
        "item": {
            "id": item_id,
            "type": "message",
            "role": "user",
            "content": [{"type": "input_text", "text": text}]
        }
    })
}

#[tokio::test]
async fn test_session_update_carries_agent_config() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;

    let (_client, _conn, update) = open_session(&mut upstream, addr, "cfg").await;

    let session = &update["session"];
    assert_eq!(session["input_audio_format"], "pcm16");
    assert_eq!(session["turn_detection"]["type"], "semantic_vad");
    assert_eq!(session["tool_choice"], "auto");
    let tools: Vec<&str> = session["tools"]
        .as_array()
        .expect("tools missing")
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        tools,
        vec!["get_current_time", "get_current_date", "get_weather"]
    );
}

#[tokio::test]
async fn test_text_message_round_trip() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "text").await;

    send_json(&mut client, json!({"type": "text", "text": "Hola"})).await;

    let create = conn.expect_event("conversation.item.create").await;
    assert_eq!(create["item"]["role"], "user");
    assert_eq!(create["item"]["content"][0]["type"], "input_text");
    assert_eq!(create["item"]["content"][0]["text"], "Hola");
    conn.expect_event("response.create").await;

    let ack = expect_type(&mut client, "client_info").await;
    assert_eq!(ack["info"], "text_enqueued");

    conn.send(user_item_created("u1", "Hola"));

    // raw upstream frame first, then derived history events
    let raw = next_json(&mut client).await;
    assert_eq!(raw["type"], "conversation.item.created");
    let added = expect_type(&mut client, "history_added").await;
    assert_eq!(added["item"]["item_id"], "u1");
    let updated = expect_type(&mut client, "history_updated").await;
    assert_eq!(updated["history"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_empty_text_is_rejected() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, _conn, _) = open_session(&mut upstream, addr, "empty").await;

    send_json(&mut client, json!({"type": "text", "text": ""})).await;

    let err = expect_type(&mut client, "error").await;
    assert_eq!(err["error"], "Empty text message.");
}

#[tokio::test]
async fn test_malformed_message_keeps_session_open() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "garbage").await;

    client
        .send(tokio_tungstenite::tungstenite::Message::Text(
            "not json".into(),
        ))
        .await
        .unwrap();
    expect_type(&mut client, "error").await;

    send_json(&mut client, json!({"type": "interrupt"})).await;
    conn.expect_event("response.cancel").await;
    assert_eq!(state.registry.list(), vec!["garbage".to_string()]);
}

#[tokio::test]
async fn test_audio_and_commit_are_forwarded() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "audio").await;

    send_json(&mut client, json!({"type": "audio", "data": [1, -1, 256]})).await;
    let append = conn.expect_event("input_audio_buffer.append").await;
    // little-endian PCM16: 01 00 ff ff 00 01
    assert_eq!(append["audio"], "AQD//wAB");

    send_json(&mut client, json!({"type": "commit_audio"})).await;
    conn.expect_event("input_audio_buffer.commit").await;
}

#[tokio::test]
async fn test_chunked_image_upload() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "img").await;

    send_json(
        &mut client,
        json!({"type": "image_start", "id": "img_1", "text": "What is this?"}),
    )
    .await;
    let ack = expect_type(&mut client, "client_info").await;
    assert_eq!(ack["info"], "image_start_ack");
    assert_eq!(ack["id"], "img_1");

    let mut expected_url = String::from("data:image/png;base64,");
    send_json(
        &mut client,
        json!({"type": "image_chunk", "id": "img_1", "chunk": "data:image/png;base64,"}),
    )
    .await;
    for _ in 0..9 {
        expected_url.push_str("QUJD");
        send_json(
            &mut client,
            json!({"type": "image_chunk", "id": "img_1", "chunk": "QUJD"}),
        )
        .await;
    }
    let ack = expect_type(&mut client, "client_info").await;
    assert_eq!(ack["info"], "image_chunk_ack");
    assert_eq!(ack["count"], 10);

    send_json(&mut client, json!({"type": "image_end", "id": "img_1"})).await;

    let create = conn.expect_event("conversation.item.create").await;
    let content = create["item"]["content"].as_array().unwrap();
    assert_eq!(content.len(), 2);
    assert_eq!(content[0]["type"], "input_image");
    assert_eq!(content[0]["image_url"], expected_url.as_str());
    assert_eq!(content[1]["type"], "input_text");
    assert_eq!(content[1]["text"], "What is this?");
    conn.expect_event("response.create").await;

    let enqueued = expect_type(&mut client, "client_info").await;
    assert_eq!(enqueued["info"], "image_enqueued");
    assert_eq!(enqueued["id"], "img_1");
    assert_eq!(enqueued["size"], expected_url.len());
}

#[tokio::test]
async fn test_legacy_image_uses_default_prompt() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "legacy").await;

    send_json(
        &mut client,
        json!({"type": "image", "data_url": "data:image/jpeg;base64,AAAA"}),
    )
    .await;

    let create = conn.expect_event("conversation.item.create").await;
    assert_eq!(
        create["item"]["content"][1]["text"],
        "Please describe this image."
    );
    let enqueued = expect_type(&mut client, "client_info").await;
    assert_eq!(enqueued["info"], "image_enqueued");
    assert!(enqueued.get("id").is_none());

    send_json(&mut client, json!({"type": "image"})).await;
    let err = expect_type(&mut client, "error").await;
    assert_eq!(err["error"], "No data_url for image message.");
}

#[tokio::test]
async fn test_orphan_chunk_is_ignored() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "orphan").await;

    send_json(
        &mut client,
        json!({"type": "image_chunk", "id": "nope", "chunk": "AAAA"}),
    )
    .await;
    send_json(&mut client, json!({"type": "text", "text": "still here"})).await;

    // nothing was sent for the orphan chunk
    let next = next_json(&mut client).await;
    assert_eq!(next["type"], "client_info");
    assert_eq!(next["info"], "text_enqueued");
    let create = conn.expect_event("conversation.item.create").await;
    assert_eq!(create["item"]["content"][0]["type"], "input_text");
}

#[tokio::test]
async fn test_image_end_for_unknown_id_reports_error() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, _conn, _) = open_session(&mut upstream, addr, "unknown-end").await;

    send_json(&mut client, json!({"type": "image_end", "id": "ghost"})).await;

    let err = expect_type(&mut client, "error").await;
    assert_eq!(err["error"], "Unknown image id for image_end.");
}

#[tokio::test]
async fn test_viewer_gets_snapshot_then_live_events() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, conn, _) = open_session(&mut upstream, addr, "watched").await;

    conn.send(user_item_created("u1", "first"));
    expect_type(&mut client, "history_updated").await;

    let mut viewer = connect_viewer(addr, "watched").await;
    let snapshot = next_json(&mut viewer).await;
    assert_eq!(snapshot["type"], "history_updated");
    assert_eq!(snapshot["history"].as_array().unwrap().len(), 1);
    assert_eq!(snapshot["history"][0]["item_id"], "u1");

    conn.send(json!({"type": "response.audio.done", "item_id": "a1"}));
    let raw = next_json(&mut viewer).await;
    assert_eq!(raw["type"], "response.audio.done");
    let end = next_json(&mut viewer).await;
    assert_eq!(end["type"], "audio_end");
}

#[tokio::test]
async fn test_viewer_does_not_see_client_acks() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, conn, _) = open_session(&mut upstream, addr, "acks").await;

    let mut viewer = connect_viewer(addr, "acks").await;
    expect_type(&mut viewer, "history_updated").await;

    send_json(&mut client, json!({"type": "text", "text": "Hola"})).await;
    expect_type(&mut client, "client_info").await;

    conn.send(json!({"type": "input_audio_buffer.speech_started"}));
    let first = next_json(&mut viewer).await;
    assert_eq!(first["type"], "input_audio_buffer.speech_started");
    let second = next_json(&mut viewer).await;
    assert_eq!(second["type"], "audio_interrupted");
}

#[tokio::test]
async fn test_viewer_for_unknown_session_is_closed() {
    let upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;

    let mut viewer = connect_viewer(addr, "missing").await;
    let frame = expect_close(&mut viewer).await.expect("close frame expected");
    assert_eq!(frame.code, CloseCode::Policy);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client_a, conn_a, _) = open_session(&mut upstream, addr, "a").await;
    let (mut client_b, conn_b, _) = open_session(&mut upstream, addr, "b").await;

    let mut viewer_b = connect_viewer(addr, "b").await;
    let snapshot = next_json(&mut viewer_b).await;
    assert_eq!(snapshot["type"], "history_updated");
    assert_eq!(snapshot["history"], json!([]));

    conn_a.send(user_item_created("only-a", "for a"));
    let raw = next_json(&mut client_a).await;
    assert_eq!(raw["item"]["id"], "only-a");
    expect_type(&mut client_a, "history_updated").await;

    send_json(&mut client_b, json!({"type": "text", "text": "b here"})).await;
    let first_for_b = next_json(&mut client_b).await;
    assert_eq!(first_for_b["type"], "client_info");
    assert_eq!(first_for_b["info"], "text_enqueued");

    // a's item never reached b's viewer: its next frames are b's own
    conn_b.send(json!({"type": "input_audio_buffer.speech_started"}));
    let first = next_json(&mut viewer_b).await;
    assert_eq!(first["type"], "input_audio_buffer.speech_started");
    let second = next_json(&mut viewer_b).await;
    assert_eq!(second["type"], "audio_interrupted");
}

#[tokio::test]
async fn test_viewer_input_is_not_forwarded() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "read-only").await;

    let mut viewer = connect_viewer(addr, "read-only").await;
    expect_type(&mut viewer, "history_updated").await;

    send_json(&mut viewer, json!({"type": "text", "text": "x"})).await;
    send_json(&mut viewer, json!({"type": "interrupt"})).await;
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    send_json(&mut client, json!({"type": "commit_audio"})).await;
    // the client's commit is the first thing upstream sees after session.update
    let next = conn.next_event().await.expect("upstream closed");
    assert_eq!(next["type"], "input_audio_buffer.commit");
}

#[tokio::test]
async fn test_duplicate_session_is_rejected() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = start_relay(&upstream.url).await;
    let (_client, _conn, _) = open_session(&mut upstream, addr, "dup").await;

    let mut second = connect_session(addr, "dup").await;
    let frame = expect_close(&mut second).await.expect("close frame expected");
    assert_eq!(frame.code, CloseCode::Policy);

    // the first session is untouched
    assert_eq!(state.registry.list(), vec!["dup".to_string()]);
}

#[tokio::test]
async fn test_client_close_tears_down_session() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "bye").await;

    let mut viewer = connect_viewer(addr, "bye").await;
    expect_type(&mut viewer, "history_updated").await;

    client.close(None).await.unwrap();

    conn.expect_closed().await;
    wait_for_removal(&state, "bye").await;
    let frame = expect_close(&mut viewer).await.expect("close frame expected");
    assert_eq!(frame.code, CloseCode::Normal);
}

#[tokio::test]
async fn test_upstream_close_ends_session() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = start_relay(&upstream.url).await;
    let (mut client, conn, _) = open_session(&mut upstream, addr, "dropped").await;

    conn.close();

    let err = expect_type(&mut client, "error").await;
    assert!(err["error"].as_str().unwrap().contains("closed"));
    let frame = expect_close(&mut client).await.expect("close frame expected");
    assert_eq!(frame.code, CloseCode::Error);
    wait_for_removal(&state, "dropped").await;
}

#[tokio::test]
async fn test_session_id_can_be_reused_after_close() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = start_relay(&upstream.url).await;

    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "again").await;
    client.close(None).await.unwrap();
    conn.expect_closed().await;
    wait_for_removal(&state, "again").await;

    let (_client, _conn, _) = open_session(&mut upstream, addr, "again").await;
    assert_eq!(state.registry.list(), vec!["again".to_string()]);
}

#[tokio::test]
async fn test_function_call_runs_tool() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "tools").await;

    conn.send(json!({
        "type": "response.output_item.added",
        "item": {"id": "fc1", "type": "function_call", "call_id": "c1", "name": "get_weather"}
    }));
    conn.send(json!({
        "type": "response.function_call_arguments.done",
        "item_id": "fc1",
        "call_id": "c1",
        "arguments": "{\"city\":\"Madrid\"}"
    }));

    let start = expect_type(&mut client, "tool_start").await;
    assert_eq!(start["tool"], "get_weather");
    let end = expect_type(&mut client, "tool_end").await;
    assert_eq!(end["output"], "The weather in Madrid is sunny.");

    let output = conn.expect_event("conversation.item.create").await;
    assert_eq!(output["item"]["type"], "function_call_output");
    assert_eq!(output["item"]["call_id"], "c1");
    assert_eq!(output["item"]["output"], "The weather in Madrid is sunny.");
    conn.expect_event("response.create").await;
}

#[tokio::test]
async fn test_unknown_tool_reports_error_output() {
    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay(&upstream.url).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "bad-tool").await;

    conn.send(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "c9",
        "name": "launch_rockets",
        "arguments": "{}"
    }));

    let end = expect_type(&mut client, "tool_end").await;
    assert!(end["output"].as_str().unwrap().starts_with("Error: "));
    let output = conn.expect_event("conversation.item.create").await;
    assert_eq!(output["item"]["call_id"], "c9");
}

#[tokio::test]
async fn test_handoff_switches_agent() {
    let catalog = AgentCatalog::from_yaml(
        r#"
starting_agent: triage
agents:
  - name: triage
    instructions: Route the user to the right specialist.
    handoffs: [weather]
  - name: weather
    instructions: Talk only about the weather.
    tools: [get_weather]
    handoff_description: Knows the forecast
"#,
    )
    .unwrap();

    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay_with_agents(&upstream.url, catalog).await;
    let (mut client, mut conn, update) = open_session(&mut upstream, addr, "handoff").await;

    assert_eq!(
        update["session"]["instructions"],
        "Route the user to the right specialist."
    );
    assert_eq!(update["session"]["tools"][0]["name"], "transfer_to_weather");

    conn.send(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "h1",
        "name": "transfer_to_weather",
        "arguments": "{}"
    }));

    let handoff = expect_type(&mut client, "handoff").await;
    assert_eq!(handoff["from"], "triage");
    assert_eq!(handoff["to"], "weather");
    let added = expect_type(&mut client, "history_added").await;
    assert_eq!(added["item"]["type"], "handoff");

    let update = conn.expect_event("session.update").await;
    assert_eq!(update["session"]["instructions"], "Talk only about the weather.");
    assert_eq!(update["session"]["tools"][0]["name"], "get_weather");

    let output = conn.expect_event("conversation.item.create").await;
    assert_eq!(output["item"]["call_id"], "h1");
    assert_eq!(output["item"]["output"], "{\"assistant\":\"weather\"}");
    conn.expect_event("response.create").await;
}

#[tokio::test]
async fn test_viewer_sees_agent_turns() {
    let catalog = AgentCatalog::from_yaml(
        r#"
starting_agent: triage
agents:
  - name: triage
    instructions: Route the user to the right specialist.
    handoffs: [weather]
  - name: weather
    instructions: Talk only about the weather.
"#,
    )
    .unwrap();

    let mut upstream = MockUpstream::start().await;
    let (addr, _state) = start_relay_with_agents(&upstream.url, catalog).await;
    let (mut client, mut conn, _) = open_session(&mut upstream, addr, "turns").await;
    let mut viewer = connect_viewer(addr, "turns").await;
    expect_type(&mut viewer, "history_updated").await;

    conn.send(json!({"type": "response.created", "response": {"id": "r1"}}));
    let raw = next_json(&mut viewer).await;
    assert_eq!(raw["type"], "response.created");
    let start = next_json(&mut viewer).await;
    assert_eq!(start, json!({"type": "agent_start", "agent": "triage"}));

    conn.send(json!({
        "type": "response.function_call_arguments.done",
        "call_id": "h1",
        "name": "transfer_to_weather",
        "arguments": "{}"
    }));
    expect_type(&mut client, "handoff").await;
    conn.expect_event("response.create").await;

    conn.send(json!({"type": "response.done", "response": {"id": "r2"}}));
    let end = expect_type(&mut viewer, "agent_end").await;
    assert_eq!(end["agent"], "weather");
}

#[tokio::test]
async fn test_shutdown_closes_upstream_connections() {
    let mut upstream = MockUpstream::start().await;
    let (addr, state) = start_relay(&upstream.url).await;
    let (mut client_a, mut conn_a, _) = open_session(&mut upstream, addr, "stop-a").await;
    let (_client_b, mut conn_b, _) = open_session(&mut upstream, addr, "stop-b").await;
    let mut viewer = connect_viewer(addr, "stop-a").await;
    expect_type(&mut viewer, "history_updated").await;

    assert!(state.shutdown(std::time::Duration::from_secs(5)).await);

    // every session task finished its teardown before shutdown returned
    conn_a.expect_closed().await;
    conn_b.expect_closed().await;
    assert!(state.registry.is_empty());
    let frame = expect_close(&mut client_a).await.expect("close frame expected");
    assert_eq!(frame.code, CloseCode::Normal);
}

#[tokio::test]
async fn test_invalid_session_id_is_closed() {
    let upstream = MockUpstream::start().await;
    let (addr, state) = start_relay(&upstream.url).await;

    let mut client = connect_session(addr, "bad!id").await;
    let frame = expect_close(&mut client).await.expect("close frame expected");
    assert_eq!(frame.code, CloseCode::Policy);
    assert!(state.registry.is_empty());
}
